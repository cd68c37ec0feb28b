//! Backend drivers.
//!
//! Each backend supplies a [`ChunkStorage`](crate::traits::ChunkStorage)
//! driver, a configuration section and a [`StorageBackend`](crate::factory::StorageBackend)
//! marker that the generic factories are instantiated with.
//!
//! | Backend      | Layouts          | Feature |
//! |--------------|------------------|---------|
//! | `FILESYSTEM` | chunked, rolling | always  |
//! | `HDFS`       | chunked, rolling | `hdfs`  |
//! | `EXTENDEDS3` | chunked, rolling | `s3`    |
//! | `S3`         | chunked          | `s3`    |
//! | `AZURE`      | chunked          | `azure` |
//! | `GCP`        | chunked          | `gcp`   |

pub mod filesystem;

#[cfg(feature = "object-store")]
pub mod object;

#[cfg(feature = "s3")]
pub mod extended_s3;
#[cfg(feature = "s3")]
pub mod s3;

#[cfg(feature = "azure")]
pub mod azure;

#[cfg(feature = "gcp")]
pub mod gcp;

#[cfg(feature = "hdfs")]
pub mod hdfs;
