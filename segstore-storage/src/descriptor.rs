//! Storage factory descriptors.
//!
//! A descriptor is the `(backend name, layout type)` pair a creator
//! advertises and a registry uses to pick a factory.
//!
//! # Examples
//!
//! ```
//! use segstore_storage::{LayoutType, StorageFactoryDescriptor};
//!
//! let descriptor = StorageFactoryDescriptor::new("FILESYSTEM", LayoutType::Chunked);
//! assert_eq!(descriptor.to_string(), "FILESYSTEM/chunked");
//! assert_eq!(LayoutType::parse("rolling"), Some(LayoutType::Rolling));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical layout generation of a storage adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutType {
    /// Immutable append chunks tracked through an external metadata store
    Chunked,
    /// Legacy rolling files addressed by name, no external metadata
    Rolling,
}

impl fmt::Display for LayoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutType::Chunked => write!(f, "chunked"),
            LayoutType::Rolling => write!(f, "rolling"),
        }
    }
}

impl LayoutType {
    /// Parse layout from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "chunked" | "chunked_storage" | "simple" => Some(LayoutType::Chunked),
            "rolling" | "rolling_storage" | "legacy" => Some(LayoutType::Rolling),
            _ => None,
        }
    }
}

/// Immutable `(backend name, layout)` pair.
///
/// Backend names are case-exact identifiers such as `FILESYSTEM` or `S3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageFactoryDescriptor {
    /// Backend identifier
    pub name: String,
    /// Layout the factory produces
    pub layout: LayoutType,
}

impl StorageFactoryDescriptor {
    /// Create a new descriptor.
    pub fn new(name: impl Into<String>, layout: LayoutType) -> Self {
        Self {
            name: name.into(),
            layout,
        }
    }

    /// Descriptor for a chunked-layout factory.
    pub fn chunked(name: impl Into<String>) -> Self {
        Self::new(name, LayoutType::Chunked)
    }

    /// Descriptor for a rolling-layout factory.
    pub fn rolling(name: impl Into<String>) -> Self {
        Self::new(name, LayoutType::Rolling)
    }
}

impl fmt::Display for StorageFactoryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_descriptor_equality_is_structural() {
        let a = StorageFactoryDescriptor::chunked("HDFS");
        let b = StorageFactoryDescriptor::new("HDFS".to_string(), LayoutType::Chunked);
        assert_eq!(a, b);
        assert_ne!(a, StorageFactoryDescriptor::rolling("HDFS"));
        assert_ne!(a, StorageFactoryDescriptor::chunked("hdfs"));

        let set: HashSet<_> = [a.clone(), b, StorageFactoryDescriptor::rolling("HDFS")]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_layout_parse() {
        assert_eq!(LayoutType::parse("CHUNKED"), Some(LayoutType::Chunked));
        assert_eq!(LayoutType::parse("legacy"), Some(LayoutType::Rolling));
        assert_eq!(LayoutType::parse("tiered"), None);
    }

    #[test]
    fn test_layout_serde_names() {
        let json = serde_json::to_string(&LayoutType::Rolling).unwrap();
        assert_eq!(json, "\"rolling\"");
        let layout: LayoutType = serde_json::from_str("\"chunked\"").unwrap();
        assert_eq!(layout, LayoutType::Chunked);
    }
}
