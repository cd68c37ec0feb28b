//! Configuration sections and sources.
//!
//! Every configuration record declares the section key it is stored under
//! ([`ConfigSection::SECTION`]). A [`ConfigSource`] is a pure keyed lookup
//! from section key to a serde value; factories never parse configuration
//! files themselves.
//!
//! # TOML layout
//!
//! ```toml
//! [chunked]
//! max_chunk_size = 67108864
//!
//! [filesystem]
//! root = "/var/lib/segstore"
//!
//! [s3]
//! config_uri = "http://localhost:9000"
//! bucket = "segments"
//! prefix = "cluster-a/"
//! access_key = "minioadmin"
//! secret_key = "minioadmin"
//! ```

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::error::{Result, StorageError};

/// A typed configuration record stored under a fixed section key.
pub trait ConfigSection: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Section key, e.g. `chunked` or `s3`.
    const SECTION: &'static str;
}

/// Keyed source of configuration sections.
pub trait ConfigSource: Send + Sync {
    /// Look up the raw value of a section. `None` when the section is absent.
    fn get_section(&self, section: &str) -> Result<Option<serde_json::Value>>;
}

impl dyn ConfigSource + '_ {
    /// Look up and decode a typed section.
    pub fn get_config<T: ConfigSection>(&self) -> Result<Option<T>> {
        match self.get_section(T::SECTION)? {
            Some(value) => {
                let config = serde_json::from_value(value).map_err(|e| {
                    StorageError::Config(format!("Invalid [{}] section: {}", T::SECTION, e))
                })?;
                Ok(Some(config))
            }
            None => Ok(None),
        }
    }
}

/// Configuration of the chunked segment storage engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkedSegmentStorageConfig {
    /// Upper bound on the size of a single chunk in bytes
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,

    /// Append to the last chunk when the driver supports it
    #[serde(default = "default_true")]
    pub append_enabled: bool,

    /// Rolling length applied to segments created without an explicit policy
    #[serde(default = "default_rolling_length")]
    pub default_rolling_length: u64,
}

fn default_max_chunk_size() -> u64 {
    128 * 1024 * 1024 // 128 MiB
}

fn default_true() -> bool {
    true
}

fn default_rolling_length() -> u64 {
    u64::MAX
}

impl ChunkedSegmentStorageConfig {
    /// Default engine configuration.
    pub const DEFAULT: ChunkedSegmentStorageConfig = ChunkedSegmentStorageConfig {
        max_chunk_size: 128 * 1024 * 1024,
        append_enabled: true,
        default_rolling_length: u64::MAX,
    };

    /// Set the maximum chunk size.
    pub fn with_max_chunk_size(mut self, max_chunk_size: u64) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    /// Enable or disable appends to existing chunks.
    pub fn with_append_enabled(mut self, enabled: bool) -> Self {
        self.append_enabled = enabled;
        self
    }
}

impl Default for ChunkedSegmentStorageConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl ConfigSection for ChunkedSegmentStorageConfig {
    const SECTION: &'static str = "chunked";
}

/// In-memory configuration source.
///
/// Sections are added with [`ConfigSetup::with`]. Every lookup is recorded so
/// callers can inspect which sections a factory asked for, and in what order.
#[derive(Debug, Default)]
pub struct ConfigSetup {
    sections: HashMap<&'static str, serde_json::Value>,
    requested: Mutex<Vec<String>>,
}

impl ConfigSetup {
    /// Create an empty configuration source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a typed section.
    pub fn with<T: ConfigSection>(mut self, config: &T) -> Result<Self> {
        self.sections.insert(T::SECTION, serde_json::to_value(config)?);
        Ok(self)
    }

    /// Section keys looked up so far, in lookup order.
    pub fn requested_sections(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

impl ConfigSource for ConfigSetup {
    fn get_section(&self, section: &str) -> Result<Option<serde_json::Value>> {
        self.requested.lock().push(section.to_string());
        Ok(self.sections.get(section).cloned())
    }
}

/// Configuration source backed by a TOML document.
///
/// Top-level tables are sections.
#[derive(Debug, Clone)]
pub struct TomlConfigSource {
    table: toml::Table,
}

impl TomlConfigSource {
    /// Parse a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        let table: toml::Table =
            toml::from_str(content).map_err(|e| StorageError::Config(e.to_string()))?;
        Ok(Self { table })
    }

    /// Load a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading storage configuration from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Names of all sections present in the document.
    pub fn sections(&self) -> Vec<&str> {
        self.table.keys().map(String::as_str).collect()
    }
}

impl ConfigSource for TomlConfigSource {
    fn get_section(&self, section: &str) -> Result<Option<serde_json::Value>> {
        match self.table.get(section) {
            Some(value) => Ok(Some(serde_json::to_value(value)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChunkedSegmentStorageConfig::default();
        assert_eq!(config, ChunkedSegmentStorageConfig::DEFAULT);
        assert_eq!(config.max_chunk_size, 128 * 1024 * 1024);
        assert!(config.append_enabled);
        assert_eq!(config.default_rolling_length, u64::MAX);
    }

    #[test]
    fn test_config_setup_lookup_records_order() {
        let setup = ConfigSetup::new()
            .with(&ChunkedSegmentStorageConfig::DEFAULT)
            .unwrap();
        let source: &dyn ConfigSource = &setup;

        let engine = source.get_config::<ChunkedSegmentStorageConfig>().unwrap();
        assert_eq!(engine, Some(ChunkedSegmentStorageConfig::DEFAULT));
        assert!(source.get_section("missing").unwrap().is_none());

        assert_eq!(setup.requested_sections(), vec!["chunked", "missing"]);
    }

    #[test]
    fn test_toml_source_partial_section_uses_defaults() {
        let toml = r#"
            [chunked]
            max_chunk_size = 1024
        "#;
        let source = TomlConfigSource::parse(toml).unwrap();
        let source: &dyn ConfigSource = &source;
        let config = source
            .get_config::<ChunkedSegmentStorageConfig>()
            .unwrap()
            .unwrap();
        assert_eq!(config.max_chunk_size, 1024);
        assert!(config.append_enabled);
    }

    #[test]
    fn test_toml_source_invalid_section() {
        let toml = r#"
            [chunked]
            max_chunk_size = "large"
        "#;
        let source = TomlConfigSource::parse(toml).unwrap();
        let source: &dyn ConfigSource = &source;
        let result = source.get_config::<ChunkedSegmentStorageConfig>();
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[test]
    fn test_toml_source_parse_error() {
        let result = TomlConfigSource::parse("[chunked");
        assert!(matches!(result, Err(StorageError::Config(_))));
    }
}
