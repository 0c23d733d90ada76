//! Parsed attestation report shared between pipeline stages.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tee_attest_core::tee::{Measurements, Provider, ReportSummary, SecurityLevel};

use super::providers::nitro::NitroDocument;
use super::providers::sev::SnpEvidence;
use super::providers::sgx::SgxQuote;

/// Provider-specific structure produced by `parse_attestation` and
/// consumed by the same provider's `verify_attestation`.
#[derive(Debug, Clone)]
pub enum ParsedEvidence {
    Sgx(SgxQuote),
    Sev(SnpEvidence),
    Nitro(NitroDocument),
}

impl ParsedEvidence {
    pub fn provider(&self) -> Provider {
        match self {
            ParsedEvidence::Sgx(_) => Provider::Sgx,
            ParsedEvidence::Sev(_) => Provider::Sev,
            ParsedEvidence::Nitro(_) => Provider::Nitro,
        }
    }
}

/// Immutable result of parsing one piece of evidence.
///
/// Shared through `Arc` between the cache and in-flight verifications;
/// never mutated after construction.
#[derive(Clone)]
pub struct AttestationReport {
    /// Lowercase hex SHA-256 of the decoded evidence
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub provider: Provider,
    pub measurements: Measurements,
    pub security_level: SecurityLevel,
    /// User-bound data (REPORT_DATA, or Nitro user_data/nonce)
    pub report_data: Vec<u8>,
    /// Decoded evidence kept for audit only
    pub raw_evidence: Arc<[u8]>,
    pub evidence: ParsedEvidence,
}

impl AttestationReport {
    /// Non-sensitive view returned to callers, stamped with the parse time
    /// or, for Nitro, the document's own timestamp.
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            id: self.id.clone(),
            timestamp: self.timestamp,
            provider: self.provider,
            measurements: self.measurements,
            security_level: self.security_level.clone(),
        }
    }

    /// Summary for a verification completed at `verified_at`.
    ///
    /// SGX quotes and SNP reports carry no time of their own, so they take
    /// `verified_at`; Nitro documents keep the time the NSM signed them.
    pub fn summary_at(&self, verified_at: DateTime<Utc>) -> ReportSummary {
        let timestamp = match self.evidence {
            ParsedEvidence::Nitro(_) => self.timestamp,
            ParsedEvidence::Sgx(_) | ParsedEvidence::Sev(_) => verified_at,
        };
        ReportSummary {
            timestamp,
            ..self.summary()
        }
    }
}

impl fmt::Debug for AttestationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestationReport")
            .field("id", &self.id)
            .field("timestamp", &self.timestamp)
            .field("provider", &self.provider)
            .field("measurements", &self.measurements)
            .field("security_level", &self.security_level)
            .field("raw_evidence_len", &self.raw_evidence.len())
            .finish_non_exhaustive()
    }
}
