//! Storage error types.

use std::io;
use thiserror::Error;

use crate::descriptor::{LayoutType, StorageFactoryDescriptor};

/// Storage and factory errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A required constructor argument was not supplied
    #[error("Missing required argument: {0}")]
    NullArgument(&'static str),

    /// Creator asked for a descriptor it does not advertise
    #[error("Unrecognized storage factory descriptor: {0}")]
    UnrecognizedDescriptor(StorageFactoryDescriptor),

    /// Wrong adapter construction form for the factory's layout
    #[error("{operation} is not supported by the {layout} layout")]
    UnsupportedLayout {
        /// Layout of the factory that rejected the call
        layout: LayoutType,
        /// Name of the rejected operation
        operation: &'static str,
    },

    /// Backend driver could not be set up
    #[error("Backend {backend} unavailable: {reason}")]
    BackendUnavailable {
        /// Backend identifier
        backend: &'static str,
        /// Underlying cause
        reason: String,
    },

    /// Backend rejected or could not use the configured credentials
    #[error("Backend {backend} authentication failed: {reason}")]
    BackendAuthFailure {
        /// Backend identifier
        backend: &'static str,
        /// Underlying cause
        reason: String,
    },

    /// I/O error during storage operation
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Segment or chunk not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Segment or chunk already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Segment is sealed and cannot be modified
    #[error("Segment is sealed: {0}")]
    Sealed(String),

    /// Handle or chunk does not permit modification
    #[error("Read-only: {0}")]
    ReadOnly(String),

    /// Write or concat at an offset other than the current length
    #[error("Bad offset for {name}: expected {expected}, given {given}")]
    BadOffset {
        /// Segment or chunk name
        name: String,
        /// Offset the operation had to use
        expected: u64,
        /// Offset the caller supplied
        given: u64,
    },

    /// Compare-and-set on segment metadata lost a race
    #[error("Metadata conflict for {segment}: expected version {expected}, found {actual}")]
    MetadataConflict {
        /// Segment name
        segment: String,
        /// Version the writer based its update on
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// Argument outside the accepted range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage backend error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Operation not supported
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// JSON encoding of headers or configuration failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object store error
    #[cfg(feature = "object-store")]
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// WebHDFS transport error
    #[cfg(feature = "hdfs")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Check if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
            || matches!(self, StorageError::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }

    /// Check if this error reports a caller-side contract violation.
    ///
    /// These are permanent: retrying the same call cannot succeed.
    pub fn is_contract_error(&self) -> bool {
        matches!(
            self,
            StorageError::NullArgument(_)
                | StorageError::UnrecognizedDescriptor(_)
                | StorageError::UnsupportedLayout { .. }
        )
    }

    /// Check if the backend could not be reached or authenticated against.
    pub fn is_backend_fault(&self) -> bool {
        matches!(
            self,
            StorageError::BackendUnavailable { .. } | StorageError::BackendAuthFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        let err = StorageError::NotFound("test".to_string());
        assert!(err.is_not_found());

        let io_err = StorageError::Io(io::Error::new(io::ErrorKind::NotFound, "not found"));
        assert!(io_err.is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::UnsupportedLayout {
            layout: LayoutType::Chunked,
            operation: "create_storage_adapter",
        };
        assert_eq!(
            err.to_string(),
            "create_storage_adapter is not supported by the chunked layout"
        );

        let err = StorageError::NullArgument("executor");
        assert_eq!(err.to_string(), "Missing required argument: executor");
    }

    #[test]
    fn test_classification() {
        assert!(StorageError::NullArgument("backend_config").is_contract_error());
        assert!(!StorageError::NullArgument("backend_config").is_backend_fault());

        let auth = StorageError::BackendAuthFailure {
            backend: "GCP",
            reason: "bad key".to_string(),
        };
        assert!(auth.is_backend_fault());
        assert!(!auth.is_contract_error());
    }
}
