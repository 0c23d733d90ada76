//! TEE Attest Runtime - attestation verification engine.
//!
//! Parses and verifies Intel SGX DCAP quotes, AMD SEV-SNP reports and
//! AWS Nitro attestation documents, then applies caller measurements and
//! organizational policy through a single [`Orchestrator`].

#![allow(clippy::result_large_err)]

pub mod metrics;
pub mod tee;

// Re-export common types
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use tee::{
    AttestationProvider, AttestationReport, Orchestrator, PolicyEngine, ProviderRegistry,
    ReportCache, VerificationStage,
};
pub use tee::{AmdKdsClient, IasClient, QuoteStatusService};
pub use tee::{NitroProvider, SevProvider, SgxProvider};

/// TEE Attest Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
