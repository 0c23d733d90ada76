//! TEE provider adapters.
//!
//! Each adapter turns vendor evidence into a normalized
//! [`AttestationReport`] and verifies the vendor's cryptographic chain of
//! trust. The set of providers is closed, so dispatch is a `match` over
//! [`ProviderAdapter`] rather than a trait object.

pub mod nitro;
pub mod sev;
pub mod sgx;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tee_attest_core::config::{NetworkConfig, ProviderConfig, VerifierConfig};
use tee_attest_core::error::Result;
use tee_attest_core::tee::{
    ErrorKind, Measurements, Provider, SecurityLevel, VerificationFailure,
};

use super::report::{AttestationReport, ParsedEvidence};
use super::util::sha256;

pub use nitro::NitroProvider;
pub use sev::SevProvider;
pub use sgx::SgxProvider;

/// Vendor-specific parsing and verification.
#[async_trait]
pub trait AttestationProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Structural parsing of decoded evidence. Fails only with
    /// `MalformedEvidence`; performs no cryptographic checks.
    fn parse_attestation(&self, evidence: &[u8]) -> std::result::Result<AttestationReport, VerificationFailure>;

    /// Verify the vendor chain of trust for a report this adapter parsed.
    async fn verify_attestation(&self, report: &AttestationReport) -> std::result::Result<(), VerificationFailure>;
}

/// Closed set of registered adapters.
pub enum ProviderAdapter {
    Sgx(SgxProvider),
    Sev(SevProvider),
    Nitro(NitroProvider),
}

impl ProviderAdapter {
    /// Build an adapter with its production vendor clients.
    pub fn from_config(config: &ProviderConfig, network: &NetworkConfig) -> Result<Self> {
        Ok(match config {
            ProviderConfig::Sgx(c) => ProviderAdapter::Sgx(SgxProvider::from_config(c.clone(), network)?),
            ProviderConfig::Sev(c) => ProviderAdapter::Sev(SevProvider::from_config(c.clone(), network)),
            ProviderConfig::Nitro(c) => ProviderAdapter::Nitro(NitroProvider::new(c.clone())),
        })
    }
}

#[async_trait]
impl AttestationProvider for ProviderAdapter {
    fn provider(&self) -> Provider {
        match self {
            ProviderAdapter::Sgx(p) => p.provider(),
            ProviderAdapter::Sev(p) => p.provider(),
            ProviderAdapter::Nitro(p) => p.provider(),
        }
    }

    fn parse_attestation(&self, evidence: &[u8]) -> std::result::Result<AttestationReport, VerificationFailure> {
        match self {
            ProviderAdapter::Sgx(p) => p.parse_attestation(evidence),
            ProviderAdapter::Sev(p) => p.parse_attestation(evidence),
            ProviderAdapter::Nitro(p) => p.parse_attestation(evidence),
        }
    }

    async fn verify_attestation(&self, report: &AttestationReport) -> std::result::Result<(), VerificationFailure> {
        if report.provider != self.provider() {
            return Err(VerificationFailure::malformed(format!(
                "{} report handed to {} adapter",
                report.provider,
                self.provider()
            )));
        }
        match self {
            ProviderAdapter::Sgx(p) => p.verify_attestation(report).await,
            ProviderAdapter::Sev(p) => p.verify_attestation(report).await,
            ProviderAdapter::Nitro(p) => p.verify_attestation(report).await,
        }
    }
}

impl From<SgxProvider> for ProviderAdapter {
    fn from(p: SgxProvider) -> Self {
        ProviderAdapter::Sgx(p)
    }
}

impl From<SevProvider> for ProviderAdapter {
    fn from(p: SevProvider) -> Self {
        ProviderAdapter::Sev(p)
    }
}

impl From<NitroProvider> for ProviderAdapter {
    fn from(p: NitroProvider) -> Self {
        ProviderAdapter::Nitro(p)
    }
}

/// Provider lookup table, built once and read-only afterwards.
#[derive(Default)]
pub struct ProviderRegistry {
    adapters: HashMap<Provider, ProviderAdapter>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &VerifierConfig) -> Result<Self> {
        let mut registry = Self::new();
        for provider in &config.providers {
            registry.register(ProviderAdapter::from_config(provider, &config.network)?);
        }
        Ok(registry)
    }

    /// Register an adapter, replacing any previous one for the same provider.
    pub fn register(&mut self, adapter: impl Into<ProviderAdapter>) -> Option<ProviderAdapter> {
        let adapter = adapter.into();
        self.adapters.insert(adapter.provider(), adapter)
    }

    pub fn with(mut self, adapter: impl Into<ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<&ProviderAdapter> {
        self.adapters.get(&provider)
    }

    /// Resolve a caller-supplied provider name to a registered adapter.
    pub fn resolve(&self, name: &str) -> std::result::Result<&ProviderAdapter, VerificationFailure> {
        let unsupported = || {
            VerificationFailure::new(
                ErrorKind::UnsupportedProvider,
                format!("provider '{}' is not supported", name),
            )
        };
        let provider: Provider = name.parse().map_err(|_| unsupported())?;
        self.get(provider).ok_or_else(unsupported)
    }

    /// Registered providers, sorted.
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.adapters.keys().copied().collect();
        providers.sort();
        providers
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Assemble a report from an adapter's parse output.
pub(crate) fn build_report(
    evidence: &[u8],
    timestamp: DateTime<Utc>,
    measurements: Measurements,
    security_level: SecurityLevel,
    report_data: Vec<u8>,
    parsed: ParsedEvidence,
) -> AttestationReport {
    AttestationReport {
        id: hex::encode(sha256(evidence)),
        timestamp,
        provider: parsed.provider(),
        measurements,
        security_level,
        report_data,
        raw_evidence: Arc::from(evidence),
        evidence: parsed,
    }
}

/// Fail with `MalformedEvidence` when a report reaches the wrong adapter.
pub(crate) fn wrong_evidence(expected: Provider) -> VerificationFailure {
    VerificationFailure::malformed(format!("evidence is not {} evidence", expected))
}
