//! Error types for the record registry

use bootherd_manifest::ManifestError;
use std::path::PathBuf;
use thiserror::Error;

/// Error type for registry operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record rejected by `put`
    #[error("invalid record: {0}")]
    Validation(#[source] ManifestError),

    /// Manifest file could not be decoded
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },

    /// File or directory access failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Record could not be encoded for persistence
    #[error("failed to encode record {id}: {source}")]
    Encode {
        id: String,
        #[source]
        source: ManifestError,
    },

    /// Identifier cannot be used as a file name
    #[error("record id not usable for persistence: {0}")]
    InvalidId(String),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::Validation(ManifestError::MissingField("ipv4"));
        assert_eq!(err.to_string(), "invalid record: missing required field: ipv4");

        let err = StoreError::Io {
            path: PathBuf::from("/etc/bootherd/manifests"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("/etc/bootherd/manifests"));

        let err = StoreError::InvalidId("../etc".to_string());
        assert!(err.to_string().contains("../etc"));
    }
}
