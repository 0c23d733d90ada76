//! Shared vocabulary for TEE attestation verification.
//!
//! These are plain value types: providers, normalized measurements,
//! security levels, and the structured verdict handed back to callers.
//! The verification logic itself lives in the runtime crate.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AttestError, Result};

/// TEE hardware vendor that produced a piece of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Intel SGX (DCAP ECDSA quotes)
    Sgx,
    /// AMD SEV-SNP attestation reports
    Sev,
    /// AWS Nitro Enclaves attestation documents
    Nitro,
}

impl Provider {
    /// All supported providers, in registration order.
    pub const ALL: [Provider; 3] = [Provider::Sgx, Provider::Sev, Provider::Nitro];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Sgx => "sgx",
            Provider::Sev => "sev",
            Provider::Nitro => "nitro",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AttestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sgx" => Ok(Provider::Sgx),
            "sev" | "sev-snp" | "snp" => Ok(Provider::Sev),
            "nitro" => Ok(Provider::Nitro),
            other => Err(AttestError::ConfigError(format!(
                "unknown TEE provider '{}'",
                other
            ))),
        }
    }
}

fn strip_hex_prefix(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// A fixed-width 32-byte value: enclave/signer identities and
/// SHA-256 certificate fingerprints. Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Digest32(pub [u8; 32]);

impl Digest32 {
    pub const LEN: usize = 32;

    /// Build from a slice that must be exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Decode from hex, accepting an optional `0x` prefix and any case.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(strip_hex_prefix(s)).map_err(|e| AttestError::InvalidHex {
            field: "digest".to_string(),
            message: e.to_string(),
        })?;
        Self::from_slice(&bytes).ok_or_else(|| AttestError::InvalidHex {
            field: "digest".to_string(),
            message: format!("expected {} bytes, got {}", Self::LEN, bytes.len()),
        })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; 32]> for Digest32 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Digest32 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Digest32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest32({})", self.to_hex())
    }
}

impl FromStr for Digest32 {
    type Err = AttestError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Digest32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Variable-length bytes serialized as lowercase hex.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct HexBytes(pub Vec<u8>);

impl HexBytes {
    pub fn from_hex(s: &str) -> Result<Self> {
        hex::decode(strip_hex_prefix(s))
            .map(Self)
            .map_err(|e| AttestError::InvalidHex {
                field: "bytes".to_string(),
                message: e.to_string(),
            })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexBytes({})", self.to_hex())
    }
}

impl FromStr for HexBytes {
    type Err = AttestError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Normalized, vendor-independent identity of the attested workload.
///
/// Every provider fills all four fields; 48-byte vendor measurements are
/// reduced to 32 bytes with SHA-256 by the provider adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurements {
    /// MRENCLAVE / launch measurement / PCR0
    pub enclave_identity: Digest32,
    /// MRSIGNER / author key digest / PCR1
    pub signer_identity: Digest32,
    pub product_id: u32,
    pub security_version: u32,
}

/// Coarse security classification derived from a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    pub fn from_score(score: u8) -> Self {
        match score {
            s if s >= 8 => Level::High,
            s if s >= 5 => Level::Medium,
            _ => Level::Low,
        }
    }

    /// Lowest score that still classifies as this level.
    pub fn min_score(&self) -> u8 {
        match self {
            Level::High => 8,
            Level::Medium => 5,
            Level::Low => 0,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::High => "high",
            Level::Medium => "medium",
            Level::Low => "low",
        };
        f.write_str(s)
    }
}

/// Security summary of a report, consumed by the policy engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityLevel {
    pub level: Level,
    /// 0 (untrustworthy) to 10 (hardware-attested production enclave)
    pub score: u8,
    /// Tags explaining how the score was reached, e.g. `debug-mode`
    pub factors: BTreeSet<String>,
}

impl SecurityLevel {
    pub const MAX_SCORE: u8 = 10;

    /// Build a level from a score; scores above 10 are clamped.
    pub fn from_score<I, S>(score: u8, factors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let score = score.min(Self::MAX_SCORE);
        Self {
            level: Level::from_score(score),
            score,
            factors: factors.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_factor(&self, factor: &str) -> bool {
        self.factors.contains(factor)
    }
}

/// Operator-supplied baseline a report must match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedMeasurements {
    pub enclave_identity: Digest32,
    pub signer_identity: Digest32,
    #[serde(default)]
    pub min_product_id: u32,
    #[serde(default)]
    pub min_security_version: u32,
    /// Bytes the evidence's user data must start with (nonce or result hash).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_data: Option<HexBytes>,
}

impl ExpectedMeasurements {
    pub fn new(enclave_identity: Digest32, signer_identity: Digest32) -> Self {
        Self {
            enclave_identity,
            signer_identity,
            min_product_id: 0,
            min_security_version: 0,
            report_data: None,
        }
    }

    pub fn with_min_versions(mut self, min_product_id: u32, min_security_version: u32) -> Self {
        self.min_product_id = min_product_id;
        self.min_security_version = min_security_version;
        self
    }

    pub fn with_report_data(mut self, report_data: impl Into<Vec<u8>>) -> Self {
        self.report_data = Some(HexBytes(report_data.into()));
        self
    }
}

/// Non-sensitive subset of a verified report returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub provider: Provider,
    pub measurements: Measurements,
    pub security_level: SecurityLevel,
}

/// Reason a verification did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    MalformedEvidence,
    UnsupportedProvider,
    SignatureInvalid,
    UntrustedQuoteStatus,
    StaleRevokedKey,
    VerificationServiceUnavailable,
    EnclaveMismatch,
    SignerMismatch,
    VersionTooOld,
    InsufficientSecurityLevel,
    EnclaveNotAllowed,
    SignerNotTrusted,
    ReportDataMismatch,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 13] = [
        ErrorKind::MalformedEvidence,
        ErrorKind::UnsupportedProvider,
        ErrorKind::SignatureInvalid,
        ErrorKind::UntrustedQuoteStatus,
        ErrorKind::StaleRevokedKey,
        ErrorKind::VerificationServiceUnavailable,
        ErrorKind::EnclaveMismatch,
        ErrorKind::SignerMismatch,
        ErrorKind::VersionTooOld,
        ErrorKind::InsufficientSecurityLevel,
        ErrorKind::EnclaveNotAllowed,
        ErrorKind::SignerNotTrusted,
        ErrorKind::ReportDataMismatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedEvidence => "MalformedEvidence",
            ErrorKind::UnsupportedProvider => "UnsupportedProvider",
            ErrorKind::SignatureInvalid => "SignatureInvalid",
            ErrorKind::UntrustedQuoteStatus => "UntrustedQuoteStatus",
            ErrorKind::StaleRevokedKey => "StaleRevokedKey",
            ErrorKind::VerificationServiceUnavailable => "VerificationServiceUnavailable",
            ErrorKind::EnclaveMismatch => "EnclaveMismatch",
            ErrorKind::SignerMismatch => "SignerMismatch",
            ErrorKind::VersionTooOld => "VersionTooOld",
            ErrorKind::InsufficientSecurityLevel => "InsufficientSecurityLevel",
            ErrorKind::EnclaveNotAllowed => "EnclaveNotAllowed",
            ErrorKind::SignerNotTrusted => "SignerNotTrusted",
            ErrorKind::ReportDataMismatch => "ReportDataMismatch",
        }
    }

    /// Only transient service failures are worth retrying; every other
    /// kind is deterministic for the same evidence.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::VerificationServiceUnavailable)
    }

    /// Genuine evidence rejected by organizational policy rather than
    /// by a cryptographic or measurement check.
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            ErrorKind::InsufficientSecurityLevel
                | ErrorKind::EnclaveNotAllowed
                | ErrorKind::SignerNotTrusted
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed verification step: kind, message, and audit-safe details.
///
/// `details` only ever carries public values (identities, versions,
/// statuses), never raw evidence or key material.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct VerificationFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl VerificationFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedEvidence, message)
    }

    pub fn signature_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SignatureInvalid, message)
    }

    pub fn stale_key(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StaleRevokedKey, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::VerificationServiceUnavailable, message)
    }
}

/// Verdict of a single `verify` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportSummary>,
}

impl VerificationResult {
    pub fn verified(report: ReportSummary) -> Self {
        Self {
            success: true,
            error_kind: None,
            message: None,
            details: None,
            report: Some(report),
        }
    }

    pub fn failed(failure: VerificationFailure) -> Self {
        let details = match failure.details {
            serde_json::Value::Null => None,
            other => Some(other),
        };
        Self {
            success: false,
            error_kind: Some(failure.kind),
            message: Some(failure.message),
            details,
            report: None,
        }
    }
}

impl From<VerificationFailure> for VerificationResult {
    fn from(failure: VerificationFailure) -> Self {
        Self::failed(failure)
    }
}

impl From<std::result::Result<ReportSummary, VerificationFailure>> for VerificationResult {
    fn from(outcome: std::result::Result<ReportSummary, VerificationFailure>) -> Self {
        match outcome {
            Ok(report) => Self::verified(report),
            Err(failure) => Self::failed(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("sgx".parse::<Provider>().unwrap(), Provider::Sgx);
        assert_eq!("SEV".parse::<Provider>().unwrap(), Provider::Sev);
        assert_eq!("sev-snp".parse::<Provider>().unwrap(), Provider::Sev);
        assert_eq!(" nitro ".parse::<Provider>().unwrap(), Provider::Nitro);
        assert!("tdx".parse::<Provider>().is_err());
    }

    #[test]
    fn test_provider_serde() {
        for (provider, expected) in [
            (Provider::Sgx, "\"sgx\""),
            (Provider::Sev, "\"sev\""),
            (Provider::Nitro, "\"nitro\""),
        ] {
            assert_eq!(serde_json::to_string(&provider).unwrap(), expected);
        }
    }

    #[test]
    fn test_digest_from_hex() {
        let hex_str = "ab".repeat(32);
        let digest = Digest32::from_hex(&hex_str).unwrap();
        assert_eq!(digest.0, [0xAB; 32]);
        assert_eq!(digest.to_hex(), hex_str);

        let prefixed = format!("0x{}", "AB".repeat(32));
        assert_eq!(Digest32::from_hex(&prefixed).unwrap(), digest);
    }

    #[test]
    fn test_digest_wrong_length() {
        let err = Digest32::from_hex("abcd").unwrap_err();
        assert!(err.to_string().contains("expected 32 bytes, got 2"));
        assert!(Digest32::from_hex("zz".repeat(32).as_str()).is_err());
    }

    #[test]
    fn test_digest_serde() {
        let digest = Digest32([0x01; 32]);
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let parsed: Digest32 = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, digest);
    }

    #[test]
    fn test_level_from_score() {
        assert_eq!(Level::from_score(10), Level::High);
        assert_eq!(Level::from_score(8), Level::High);
        assert_eq!(Level::from_score(7), Level::Medium);
        assert_eq!(Level::from_score(5), Level::Medium);
        assert_eq!(Level::from_score(4), Level::Low);
        assert_eq!(Level::from_score(0), Level::Low);
    }

    #[test]
    fn test_security_level_clamps_score() {
        let level = SecurityLevel::from_score(42, ["sgx-enclave"]);
        assert_eq!(level.score, 10);
        assert_eq!(level.level, Level::High);
        assert!(level.has_factor("sgx-enclave"));
    }

    #[test]
    fn test_measurements_serialize_camel_case() {
        let m = Measurements {
            enclave_identity: Digest32([1; 32]),
            signer_identity: Digest32([2; 32]),
            product_id: 3,
            security_version: 4,
        };
        let value = serde_json::to_value(m).unwrap();
        assert_eq!(value["enclaveIdentity"], "01".repeat(32));
        assert_eq!(value["signerIdentity"], "02".repeat(32));
        assert_eq!(value["productId"], 3);
        assert_eq!(value["securityVersion"], 4);
    }

    #[test]
    fn test_error_kind_display_matches_serde() {
        for kind in ErrorKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }

    #[test]
    fn test_error_kind_retryable() {
        for kind in ErrorKind::ALL {
            assert_eq!(
                kind.is_retryable(),
                kind == ErrorKind::VerificationServiceUnavailable
            );
        }
    }

    #[test]
    fn test_error_kind_policy_rejection() {
        assert!(ErrorKind::SignerNotTrusted.is_policy_rejection());
        assert!(ErrorKind::EnclaveNotAllowed.is_policy_rejection());
        assert!(!ErrorKind::SignatureInvalid.is_policy_rejection());
        assert!(!ErrorKind::EnclaveMismatch.is_policy_rejection());
    }

    #[test]
    fn test_verification_failure_display() {
        let failure = VerificationFailure::signature_invalid("QE report signature mismatch");
        assert_eq!(
            failure.to_string(),
            "SignatureInvalid: QE report signature mismatch"
        );
    }

    #[test]
    fn test_failed_result_json_shape() {
        let failure = VerificationFailure::new(ErrorKind::UntrustedQuoteStatus, "status REVOKED")
            .with_details(serde_json::json!({ "status": "REVOKED" }));
        let result = VerificationResult::from(failure);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["errorKind"], "UntrustedQuoteStatus");
        assert_eq!(value["details"]["status"], "REVOKED");
        assert!(value.get("report").is_none());
    }

    #[test]
    fn test_failed_result_without_details() {
        let result = VerificationResult::failed(VerificationFailure::malformed("empty"));
        assert!(result.details.is_none());
        assert_eq!(result.error_kind, Some(ErrorKind::MalformedEvidence));
    }

    #[test]
    fn test_expected_measurements_builder() {
        let expected = ExpectedMeasurements::new(Digest32([1; 32]), Digest32([2; 32]))
            .with_min_versions(3, 4)
            .with_report_data(vec![0xAA, 0xBB]);
        assert_eq!(expected.min_product_id, 3);
        assert_eq!(expected.min_security_version, 4);
        assert_eq!(expected.report_data.unwrap().as_slice(), &[0xAA, 0xBB]);
    }

    #[test]
    fn test_expected_measurements_defaults() {
        let json = format!(
            r#"{{"enclaveIdentity":"{}","signerIdentity":"{}"}}"#,
            "aa".repeat(32),
            "bb".repeat(32)
        );
        let expected: ExpectedMeasurements = serde_json::from_str(&json).unwrap();
        assert_eq!(expected.min_product_id, 0);
        assert_eq!(expected.min_security_version, 0);
        assert!(expected.report_data.is_none());
    }
}
