//! AWS Nitro Enclaves adapter.
//!
//! Evidence is the NSM attestation document: a COSE_Sign1 structure whose
//! CBOR payload carries the PCRs, the signing certificate and the CA
//! bundle (root first).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ciborium::value::Value;
use coset::{iana, Algorithm, CborSerializable, CoseSign1, TaggedCborSerializable};
use tee_attest_core::config::NitroConfig;
use tee_attest_core::tee::{
    ErrorKind, Measurements, Provider, SecurityLevel, VerificationFailure,
};

use super::{build_report, wrong_evidence, AttestationProvider};
use crate::tee::certs::{self, ChainCert, ChainPolicy};
use crate::tee::report::{AttestationReport, ParsedEvidence};
use crate::tee::util::{constant_time_eq, sha256_digest};

/// Parsed attestation document.
#[derive(Debug, Clone)]
pub struct NitroDocument {
    pub module_id: String,
    pub digest: String,
    pub timestamp: DateTime<Utc>,
    pub pcrs: BTreeMap<u8, Vec<u8>>,
    /// Signing certificate (chain leaf)
    pub certificate: ChainCert,
    /// CA bundle, root first
    pub cabundle: Vec<ChainCert>,
    pub public_key: Option<Vec<u8>>,
    pub user_data: Option<Vec<u8>>,
    pub nonce: Option<Vec<u8>>,
    pub sign1: CoseSign1,
}

fn malformed(message: impl Into<String>) -> VerificationFailure {
    VerificationFailure::malformed(message)
}

fn bytes_field(value: &Value, name: &str) -> Result<Vec<u8>, VerificationFailure> {
    value
        .as_bytes()
        .cloned()
        .ok_or_else(|| malformed(format!("attestation document field '{}' is not a byte string", name)))
}

/// Optional byte fields may be absent or CBOR null.
fn optional_bytes_field(value: Option<&Value>, name: &str) -> Result<Option<Vec<u8>>, VerificationFailure> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => bytes_field(v, name).map(Some),
    }
}

fn parse_pcrs(value: &Value) -> Result<BTreeMap<u8, Vec<u8>>, VerificationFailure> {
    let entries = value
        .as_map()
        .ok_or_else(|| malformed("attestation document field 'pcrs' is not a map"))?;

    let mut pcrs = BTreeMap::new();
    for (key, value) in entries {
        let index = key
            .as_integer()
            .and_then(|i| u8::try_from(i).ok())
            .ok_or_else(|| malformed("PCR index is not a small integer"))?;
        pcrs.insert(index, bytes_field(value, "pcrs")?);
    }
    Ok(pcrs)
}

impl NitroDocument {
    pub fn parse(evidence: &[u8]) -> Result<Self, VerificationFailure> {
        let sign1 = CoseSign1::from_tagged_slice(evidence)
            .or_else(|_| CoseSign1::from_slice(evidence))
            .map_err(|e| malformed(format!("invalid COSE_Sign1: {:?}", e)))?;

        let payload = sign1
            .payload
            .as_deref()
            .ok_or_else(|| malformed("COSE_Sign1 has no payload"))?;
        let payload: Value = ciborium::de::from_reader(payload)
            .map_err(|e| malformed(format!("invalid CBOR payload: {}", e)))?;
        let entries = payload
            .as_map()
            .ok_or_else(|| malformed("attestation document payload is not a map"))?;

        let mut fields: BTreeMap<&str, &Value> = BTreeMap::new();
        for (key, value) in entries {
            if let Some(name) = key.as_text() {
                fields.insert(name, value);
            }
        }
        let required = |name: &str| {
            fields
                .get(name)
                .copied()
                .ok_or_else(|| malformed(format!("attestation document is missing '{}'", name)))
        };

        let module_id = required("module_id")?
            .as_text()
            .ok_or_else(|| malformed("attestation document field 'module_id' is not text"))?
            .to_string();
        let digest = required("digest")?
            .as_text()
            .ok_or_else(|| malformed("attestation document field 'digest' is not text"))?
            .to_string();

        let timestamp_ms = required("timestamp")?
            .as_integer()
            .and_then(|i| i64::try_from(i).ok())
            .ok_or_else(|| malformed("attestation document field 'timestamp' is not an integer"))?;
        let timestamp = Utc
            .timestamp_millis_opt(timestamp_ms)
            .single()
            .ok_or_else(|| malformed(format!("timestamp {} is out of range", timestamp_ms)))?;

        let pcrs = parse_pcrs(required("pcrs")?)?;
        for index in [0u8, 1] {
            if !pcrs.contains_key(&index) {
                return Err(malformed(format!("attestation document is missing PCR{}", index)));
            }
        }

        let certificate = ChainCert::from_der(&bytes_field(required("certificate")?, "certificate")?)?;
        let cabundle = required("cabundle")?
            .as_array()
            .ok_or_else(|| malformed("attestation document field 'cabundle' is not an array"))?
            .iter()
            .map(|v| ChainCert::from_der(&bytes_field(v, "cabundle")?))
            .collect::<Result<Vec<_>, _>>()?;
        if cabundle.is_empty() {
            return Err(malformed("attestation document has an empty CA bundle"));
        }

        Ok(Self {
            module_id,
            digest,
            timestamp,
            pcrs,
            certificate,
            cabundle,
            public_key: optional_bytes_field(fields.get("public_key").copied(), "public_key")?,
            user_data: optional_bytes_field(fields.get("user_data").copied(), "user_data")?,
            nonce: optional_bytes_field(fields.get("nonce").copied(), "nonce")?,
            sign1,
        })
    }

    pub fn pcr(&self, index: u8) -> &[u8] {
        self.pcrs.get(&index).map(Vec::as_slice).unwrap_or_default()
    }

    /// Leaf first, root last.
    pub fn chain(&self) -> Vec<ChainCert> {
        std::iter::once(self.certificate.clone())
            .chain(self.cabundle.iter().rev().cloned())
            .collect()
    }
}

/// Score a Nitro enclave. An all-zero PCR0 means the enclave runs in
/// debug mode and its measurements are meaningless.
pub fn security_level(doc: &NitroDocument) -> SecurityLevel {
    if doc.pcr(0).iter().all(|&b| b == 0) {
        return SecurityLevel::from_score(0, ["nitro-enclave", "debug-mode"]);
    }
    SecurityLevel::from_score(8, ["nitro-enclave"])
}

/// AWS Nitro provider.
pub struct NitroProvider {
    config: NitroConfig,
}

impl NitroProvider {
    pub fn new(config: NitroConfig) -> Self {
        Self { config }
    }

    fn verify_cose_signature(&self, doc: &NitroDocument) -> Result<(), VerificationFailure> {
        let leaf_key = doc
            .certificate
            .public_key()
            .ok_or_else(|| VerificationFailure::signature_invalid("signing certificate has no public key"))?;

        let verify: fn(&[u8], &[u8], &[u8]) -> bool = match &doc.sign1.protected.header.alg {
            Some(Algorithm::Assigned(iana::Algorithm::ES384)) => certs::verify_p384_raw,
            Some(Algorithm::Assigned(iana::Algorithm::ES256)) => certs::verify_p256_raw,
            other => {
                return Err(VerificationFailure::signature_invalid(format!(
                    "unsupported COSE algorithm {:?}",
                    other
                )))
            }
        };

        doc.sign1.verify_signature(b"", |signature, data| {
            if verify(leaf_key, data, signature) {
                Ok(())
            } else {
                Err(VerificationFailure::signature_invalid(
                    "attestation document signature is invalid",
                ))
            }
        })
    }

    fn check_pcrs(&self, doc: &NitroDocument) -> Result<(), VerificationFailure> {
        for (index, expected) in &self.config.expected_pcrs {
            let actual = doc.pcrs.get(index);
            let matches = actual
                .map(|actual| constant_time_eq(actual, expected.as_slice()))
                .unwrap_or(false);
            if !matches {
                return Err(VerificationFailure::new(
                    ErrorKind::EnclaveMismatch,
                    format!("PCR{} does not match the expected value", index),
                )
                .with_details(serde_json::json!({
                    "pcrIndex": index,
                    "expected": expected.to_hex(),
                    "actual": actual.map(hex::encode),
                })));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AttestationProvider for NitroProvider {
    fn provider(&self) -> Provider {
        Provider::Nitro
    }

    fn parse_attestation(&self, evidence: &[u8]) -> Result<AttestationReport, VerificationFailure> {
        let doc = NitroDocument::parse(evidence)?;

        let measurements = Measurements {
            enclave_identity: sha256_digest(doc.pcr(0)),
            signer_identity: sha256_digest(doc.pcr(1)),
            product_id: 0,
            security_version: 0,
        };
        let level = security_level(&doc);
        let report_data = doc
            .user_data
            .clone()
            .or_else(|| doc.nonce.clone())
            .unwrap_or_default();

        Ok(build_report(
            evidence,
            doc.timestamp,
            measurements,
            level,
            report_data,
            ParsedEvidence::Nitro(doc),
        ))
    }

    async fn verify_attestation(&self, report: &AttestationReport) -> Result<(), VerificationFailure> {
        let ParsedEvidence::Nitro(doc) = &report.evidence else {
            return Err(wrong_evidence(Provider::Nitro));
        };

        certs::verify_chain(
            &doc.chain(),
            &ChainPolicy {
                trusted_roots: &self.config.root_ca_fingerprints,
                revoked_serials: &[],
                now: Utc::now(),
            },
        )?;
        self.verify_cose_signature(doc)?;
        tracing::debug!(report_id = %report.id, module_id = %doc.module_id, "Nitro document signature verified");

        self.check_pcrs(doc)
    }
}
