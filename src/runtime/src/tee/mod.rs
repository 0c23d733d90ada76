//! TEE (Trusted Execution Environment) attestation verification.
//!
//! - `providers`: SGX DCAP, SEV-SNP and Nitro adapters behind one trait.
//! - `certs`: X.509 chain verification shared by every vendor.
//! - `kds` / `quote_status`: vendor services (AMD KDS, SGX quote status).
//! - `measurement`: caller-expected identities and versions.
//! - `policy`: organizational acceptance rules.
//! - `cache`: parsed report cache.
//! - `orchestrator`: the full verification pipeline.

pub mod cache;
pub mod certs;
pub mod kds;
pub mod measurement;
pub mod net;
pub mod orchestrator;
pub mod policy;
pub mod providers;
pub mod quote_status;
pub mod report;
pub mod simulate;
pub mod util;

#[cfg(test)]
pub(crate) mod testutil;

pub use cache::ReportCache;
pub use kds::{AmdKdsClient, CertificateChain};
pub use measurement::verify_measurements;
pub use orchestrator::{Orchestrator, VerificationStage};
pub use policy::PolicyEngine;
pub use providers::{
    AttestationProvider, NitroProvider, ProviderAdapter, ProviderRegistry, SevProvider,
    SgxProvider,
};
pub use quote_status::{IasClient, QuoteStatusService};
pub use report::{AttestationReport, ParsedEvidence};
pub use simulate::{build_simulated_report, is_simulated_report};
pub use util::decode_evidence;
