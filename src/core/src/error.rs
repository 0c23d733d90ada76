use thiserror::Error;

/// Errors raised while setting up or operating the verifier.
///
/// Expected verification outcomes (bad signatures, policy rejections,
/// malformed evidence) are not errors at this level: they are reported
/// as [`crate::tee::VerificationFailure`] inside a verification result.
#[derive(Error, Debug)]
pub enum AttestError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Hex-encoded field could not be decoded
    #[error("Invalid hex in {field}: {message}")]
    InvalidHex { field: String, message: String },

    /// Provider could not be constructed
    #[error("Provider error: {provider} - {message}")]
    ProviderError { provider: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AttestError {
    fn from(err: serde_json::Error) -> Self {
        AttestError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for AttestError {
    fn from(err: serde_yaml::Error) -> Self {
        AttestError::SerializationError(err.to_string())
    }
}

/// Result type alias for verifier setup operations
pub type Result<T> = std::result::Result<T, AttestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = AttestError::ConfigError("Missing required field".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: Missing required field"
        );
    }

    #[test]
    fn test_invalid_hex_display() {
        let error = AttestError::InvalidHex {
            field: "enclave_identity".to_string(),
            message: "expected 32 bytes, got 4".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid hex in enclave_identity: expected 32 bytes, got 4"
        );
    }

    #[test]
    fn test_provider_error_display() {
        let error = AttestError::ProviderError {
            provider: "sgx".to_string(),
            message: "attestation_service_url is required".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Provider error: sgx - attestation_service_url is required"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: AttestError = io_error.into();
        assert!(matches!(error, AttestError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let error: AttestError = result.unwrap_err().into();
        assert!(matches!(error, AttestError::SerializationError(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: AttestError = result.unwrap_err().into();
        assert!(matches!(error, AttestError::SerializationError(_)));
    }

    #[test]
    fn test_other_error_display() {
        let error = AttestError::Other("Unknown error occurred".to_string());
        assert_eq!(error.to_string(), "Unknown error occurred");
    }
}
