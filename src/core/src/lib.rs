//! TEE Attest Core - shared types for attestation verification
//!
//! Vocabulary shared by the verification runtime and the CLI: error
//! types, configuration, measurements and verification results.

pub mod config;
pub mod error;
pub mod tee;

// Re-export commonly used types
pub use config::{
    CacheConfig, FirmwareVersion, MinSecurityLevel, MinTcbPolicy, NetworkConfig, NitroConfig,
    ProviderConfig, SecurityPolicy, SevConfig, SgxConfig, VerifierConfig,
};
pub use error::{AttestError, Result};
pub use tee::{
    Digest32, ErrorKind, ExpectedMeasurements, HexBytes, Level, Measurements, Provider,
    ReportSummary, SecurityLevel, VerificationFailure, VerificationResult,
};

/// TEE Attest version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
