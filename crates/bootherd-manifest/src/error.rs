//! Error types for provisioning records
//!
//! Covers record decoding and validation as well as the dispatch-time
//! failures of mount resolution.

use thiserror::Error;

/// Error type for record and mount operations
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Hardware address text could not be parsed
    #[error("invalid hardware address: {0}")]
    InvalidHardwareAddress(String),

    /// A field required for registration is missing
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// YAML record could not be decoded or encoded
    #[error("YAML record error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON record could not be decoded or encoded
    #[error("JSON record error: {0}")]
    Json(#[from] serde_json::Error),

    /// No rule of the record answers the request path
    #[error("no mount matches path: {0}")]
    NoMount(String),

    /// The selected rule has no content source
    #[error("mount {0} has no proxy, content or local directory")]
    EmptyMount(String),

    /// The selected rule has more than one content source
    #[error("mount {0} sets more than one of proxy, content and local directory")]
    AmbiguousMount(String),

    /// Proxy target is not a valid URL
    #[error("invalid proxy target {target}: {source}")]
    InvalidProxy {
        target: String,
        #[source]
        source: url::ParseError,
    },

    /// Request path resolves outside of the mount's directory
    #[error("requested path escapes mount directory: {0}")]
    InvalidHostPath(String),
}

/// Result type for record operations
pub type Result<T> = std::result::Result<T, ManifestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ManifestError::NoMount("boot/ipxe.efi".to_string());
        assert_eq!(err.to_string(), "no mount matches path: boot/ipxe.efi");

        let err = ManifestError::MissingField("ipv4");
        assert_eq!(err.to_string(), "missing required field: ipv4");

        let err = ManifestError::EmptyMount("/kernel".to_string());
        assert!(err.to_string().contains("/kernel"));
    }
}
