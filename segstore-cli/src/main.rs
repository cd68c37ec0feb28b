use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "segstore")]
#[command(about = "segstore CLI - storage backend tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered backends and their layouts
    List,

    /// Write, read and delete a probe segment on a backend
    Probe {
        /// TOML file with the backend and `chunked` sections
        #[arg(short, long)]
        config: PathBuf,

        /// Backend name, e.g. FILESYSTEM or S3
        #[arg(short, long)]
        backend: String,

        /// Storage layout: chunked or rolling
        #[arg(short, long, default_value = "chunked")]
        layout: String,

        /// Container id for the chunked layout
        #[arg(long, default_value = "0")]
        container: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let registry = commands::registry();

    match cli.command {
        Commands::List => commands::run_list(&registry),
        Commands::Probe {
            config,
            backend,
            layout,
            container,
        } => {
            commands::run_probe(
                &registry,
                commands::ProbeOptions {
                    config,
                    backend,
                    layout,
                    container,
                },
            )
            .await?
        }
    }

    Ok(())
}
