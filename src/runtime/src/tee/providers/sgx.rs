//! Intel SGX DCAP (ECDSA quote v3) adapter.
//!
//! Quote layout:
//!
//! ```text
//! header (48) | ISV report body (384) | sig_data_len (4) | sig_data
//! sig_data = ISV sig (64) | attest key (64) | QE report (384) | QE sig (64)
//!          | qe_auth_len (2) | qe_auth | cert_type (2) | cert_len (4) | cert_data
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tee_attest_core::config::{NetworkConfig, SgxConfig};
use tee_attest_core::error::{AttestError, Result};
use tee_attest_core::tee::{
    Digest32, ErrorKind, Measurements, Provider, SecurityLevel, VerificationFailure,
};

use super::{build_report, wrong_evidence, AttestationProvider};
use crate::tee::certs::{self, parse_pem_chain, ChainCert, ChainPolicy};
use crate::tee::quote_status::{
    normalize_status, IasClient, QuoteStatusService, SIGNATURE_INVALID_STATUS,
};
use crate::tee::report::{AttestationReport, ParsedEvidence};
use crate::tee::util::{constant_time_eq, sha256, ByteReader};

pub const QUOTE_VERSION: u16 = 3;
pub const ATT_KEY_TYPE_ECDSA_P256: u16 = 2;
pub const TEE_TYPE_SGX: u32 = 0;
pub const CERT_TYPE_PCK_CHAIN: u16 = 5;

pub const HEADER_SIZE: usize = 48;
pub const REPORT_BODY_SIZE: usize = 384;

/// SGX enclave attribute flags.
pub mod attributes {
    pub const DEBUG: u64 = 0x02;
    pub const MODE64BIT: u64 = 0x04;
    pub const PROVISIONKEY: u64 = 0x10;
}

#[derive(Debug, Clone)]
pub struct QuoteHeader {
    pub version: u16,
    pub att_key_type: u16,
    pub tee_type: u32,
    pub qe_svn: u16,
    pub pce_svn: u16,
    pub qe_vendor_id: [u8; 16],
    pub user_data: [u8; 20],
}

/// SGX report body, shared by the ISV enclave and the quoting enclave.
#[derive(Debug, Clone)]
pub struct ReportBody {
    pub cpu_svn: [u8; 16],
    pub misc_select: u32,
    pub flags: u64,
    pub xfrm: u64,
    pub mr_enclave: [u8; 32],
    pub mr_signer: [u8; 32],
    pub isv_prod_id: u16,
    pub isv_svn: u16,
    pub report_data: [u8; 64],
}

impl ReportBody {
    fn parse(reader: &mut ByteReader<'_>, what: &str) -> std::result::Result<Self, VerificationFailure> {
        let cpu_svn = reader.take_array(&format!("{}.cpu_svn", what))?;
        let misc_select = reader.u32_le(&format!("{}.misc_select", what))?;
        reader.skip(28, &format!("{}.reserved1", what))?;
        let flags = reader.u64_le(&format!("{}.attributes.flags", what))?;
        let xfrm = reader.u64_le(&format!("{}.attributes.xfrm", what))?;
        let mr_enclave = reader.take_array(&format!("{}.mr_enclave", what))?;
        reader.skip(32, &format!("{}.reserved2", what))?;
        let mr_signer = reader.take_array(&format!("{}.mr_signer", what))?;
        reader.skip(96, &format!("{}.reserved3", what))?;
        let isv_prod_id = reader.u16_le(&format!("{}.isv_prod_id", what))?;
        let isv_svn = reader.u16_le(&format!("{}.isv_svn", what))?;
        reader.skip(60, &format!("{}.reserved4", what))?;
        let report_data = reader.take_array(&format!("{}.report_data", what))?;

        Ok(Self {
            cpu_svn,
            misc_select,
            flags,
            xfrm,
            mr_enclave,
            mr_signer,
            isv_prod_id,
            isv_svn,
            report_data,
        })
    }

    pub fn is_debug(&self) -> bool {
        self.flags & attributes::DEBUG != 0
    }
}

/// Parsed DCAP quote.
#[derive(Debug, Clone)]
pub struct SgxQuote {
    pub header: QuoteHeader,
    pub body: ReportBody,
    /// Header and ISV body, the bytes covered by the ISV signature
    pub signed_region: Vec<u8>,
    pub isv_signature: [u8; 64],
    /// Raw P-256 attestation key (x || y)
    pub attestation_key: [u8; 64],
    pub qe_report: ReportBody,
    pub qe_report_raw: Vec<u8>,
    pub qe_report_signature: [u8; 64],
    pub qe_auth_data: Vec<u8>,
    /// PCK leaf first, root last
    pub pck_chain: Vec<ChainCert>,
}

impl SgxQuote {
    pub fn parse(quote: &[u8]) -> std::result::Result<Self, VerificationFailure> {
        let mut reader = ByteReader::new(quote);

        let version = reader.u16_le("header.version")?;
        let att_key_type = reader.u16_le("header.att_key_type")?;
        let tee_type = reader.u32_le("header.tee_type")?;
        let qe_svn = reader.u16_le("header.qe_svn")?;
        let pce_svn = reader.u16_le("header.pce_svn")?;
        let qe_vendor_id = reader.take_array("header.qe_vendor_id")?;
        let user_data = reader.take_array("header.user_data")?;

        if version != QUOTE_VERSION {
            return Err(VerificationFailure::malformed(format!(
                "unsupported quote version {} (expected {})",
                version, QUOTE_VERSION
            )));
        }
        if att_key_type != ATT_KEY_TYPE_ECDSA_P256 {
            return Err(VerificationFailure::malformed(format!(
                "unsupported attestation key type {}",
                att_key_type
            )));
        }
        if tee_type != TEE_TYPE_SGX {
            return Err(VerificationFailure::malformed(format!(
                "unexpected TEE type {:#x} in SGX quote",
                tee_type
            )));
        }

        let body = ReportBody::parse(&mut reader, "isv_report")?;
        let signed_region = quote[..HEADER_SIZE + REPORT_BODY_SIZE].to_vec();

        let sig_data_len = reader.u32_le("signature_data_len")? as usize;
        if sig_data_len != reader.remaining() {
            return Err(VerificationFailure::malformed(format!(
                "signature data length {} does not match remaining {} bytes",
                sig_data_len,
                reader.remaining()
            )));
        }

        let isv_signature = reader.take_array("isv_signature")?;
        let attestation_key = reader.take_array("attestation_key")?;
        let qe_start = reader.position();
        let qe_report = ReportBody::parse(&mut reader, "qe_report")?;
        let qe_report_raw = quote[qe_start..reader.position()].to_vec();
        let qe_report_signature = reader.take_array("qe_report_signature")?;

        let qe_auth_len = reader.u16_le("qe_auth_data_len")? as usize;
        let qe_auth_data = reader.take(qe_auth_len, "qe_auth_data")?.to_vec();

        let cert_type = reader.u16_le("certification_data_type")?;
        let cert_len = reader.u32_le("certification_data_size")? as usize;
        let cert_data = reader.take(cert_len, "certification_data")?;
        if reader.remaining() != 0 {
            return Err(VerificationFailure::malformed(format!(
                "{} trailing bytes after certification data",
                reader.remaining()
            )));
        }
        if cert_type != CERT_TYPE_PCK_CHAIN {
            return Err(VerificationFailure::malformed(format!(
                "unsupported certification data type {} (expected PCK chain)",
                cert_type
            )));
        }
        let pck_chain = parse_pem_chain(cert_data)?;

        Ok(Self {
            header: QuoteHeader {
                version,
                att_key_type,
                tee_type,
                qe_svn,
                pce_svn,
                qe_vendor_id,
                user_data,
            },
            body,
            signed_region,
            isv_signature,
            attestation_key,
            qe_report,
            qe_report_raw,
            qe_report_signature,
            qe_auth_data,
            pck_chain,
        })
    }

    fn attestation_key_sec1(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(65);
        key.push(0x04);
        key.extend_from_slice(&self.attestation_key);
        key
    }
}

/// Score an SGX enclave from its attribute flags.
pub fn security_level(body: &ReportBody) -> SecurityLevel {
    let mut score: u8 = 9;
    let mut factors = vec!["sgx-enclave"];

    if body.flags & attributes::MODE64BIT == 0 {
        score -= 1;
        factors.push("32-bit-mode");
    }
    if body.flags & attributes::PROVISIONKEY != 0 {
        score -= 1;
        factors.push("provision-key-access");
    }
    if body.is_debug() {
        score = score.min(2);
        factors.push("debug-mode");
    }

    SecurityLevel::from_score(score, factors)
}

/// SGX DCAP provider.
pub struct SgxProvider {
    config: SgxConfig,
    status_service: Arc<dyn QuoteStatusService>,
    trusted_statuses: Vec<String>,
}

impl SgxProvider {
    pub fn new(config: SgxConfig, status_service: Arc<dyn QuoteStatusService>) -> Self {
        let trusted_statuses = config
            .trusted_statuses
            .iter()
            .map(|s| normalize_status(s))
            .collect();
        Self {
            config,
            status_service,
            trusted_statuses,
        }
    }

    /// Build with an HTTP quote status client. A status endpoint is
    /// mandatory: quotes cannot be checked for revocation without one.
    /// Its responses are only believed when signed under a pinned root.
    pub fn from_config(config: SgxConfig, network: &NetworkConfig) -> Result<Self> {
        let provider_error = |message: &str| AttestError::ProviderError {
            provider: Provider::Sgx.to_string(),
            message: message.to_string(),
        };
        let url = config
            .attestation_service_url
            .clone()
            .ok_or_else(|| provider_error("attestation_service_url is required"))?;
        if config.ias_signing_root_fingerprints.is_empty() {
            return Err(provider_error("ias_signing_root_fingerprints is required"));
        }
        let client = IasClient::new(
            url,
            config.api_key.clone(),
            config.ias_signing_root_fingerprints.clone(),
            network.clone(),
        );
        Ok(Self::new(config, Arc::new(client)))
    }

    fn check_status(&self, status: &str) -> std::result::Result<(), VerificationFailure> {
        let status = normalize_status(status);
        if status == SIGNATURE_INVALID_STATUS {
            return Err(VerificationFailure::signature_invalid(
                "quote status service rejected the quote signature",
            )
            .with_details(serde_json::json!({ "status": status })));
        }
        if !self.trusted_statuses.iter().any(|s| *s == status) {
            return Err(VerificationFailure::new(
                ErrorKind::UntrustedQuoteStatus,
                format!("quote status {} is not trusted", status),
            )
            .with_details(serde_json::json!({
                "status": status,
                "trusted": self.trusted_statuses,
            })));
        }
        Ok(())
    }
}

#[async_trait]
impl AttestationProvider for SgxProvider {
    fn provider(&self) -> Provider {
        Provider::Sgx
    }

    fn parse_attestation(&self, evidence: &[u8]) -> std::result::Result<AttestationReport, VerificationFailure> {
        let quote = SgxQuote::parse(evidence)?;

        let measurements = Measurements {
            enclave_identity: Digest32(quote.body.mr_enclave),
            signer_identity: Digest32(quote.body.mr_signer),
            product_id: u32::from(quote.body.isv_prod_id),
            security_version: u32::from(quote.body.isv_svn),
        };
        let level = security_level(&quote.body);
        let report_data = quote.body.report_data.to_vec();

        Ok(build_report(
            evidence,
            Utc::now(),
            measurements,
            level,
            report_data,
            ParsedEvidence::Sgx(quote),
        ))
    }

    async fn verify_attestation(&self, report: &AttestationReport) -> std::result::Result<(), VerificationFailure> {
        let ParsedEvidence::Sgx(quote) = &report.evidence else {
            return Err(wrong_evidence(Provider::Sgx));
        };

        // PCK certificate chain up to a pinned Intel root
        certs::verify_chain(
            &quote.pck_chain,
            &ChainPolicy {
                trusted_roots: &self.config.root_ca_fingerprints,
                revoked_serials: &self.config.revoked_serials,
                now: Utc::now(),
            },
        )?;

        // QE report signed by the PCK leaf
        let pck_key = quote
            .pck_chain
            .first()
            .and_then(|leaf| leaf.public_key())
            .ok_or_else(|| VerificationFailure::signature_invalid("PCK certificate has no public key"))?;
        if !certs::verify_p256_raw(pck_key, &quote.qe_report_raw, &quote.qe_report_signature) {
            return Err(VerificationFailure::signature_invalid(
                "QE report signature does not verify against the PCK certificate",
            ));
        }

        // QE report binds the attestation key
        let mut binding_input = quote.attestation_key.to_vec();
        binding_input.extend_from_slice(&quote.qe_auth_data);
        if !constant_time_eq(&quote.qe_report.report_data[..32], &sha256(&binding_input)) {
            return Err(VerificationFailure::signature_invalid(
                "QE report data does not bind the attestation key",
            ));
        }

        // ISV enclave report signed by the attestation key
        if !certs::verify_p256_raw(
            &quote.attestation_key_sec1(),
            &quote.signed_region,
            &quote.isv_signature,
        ) {
            return Err(VerificationFailure::signature_invalid(
                "ISV enclave report signature is invalid",
            ));
        }

        let status = self
            .status_service
            .quote_status(&report.raw_evidence)
            .await?;
        tracing::debug!(report_id = %report.id, status = %status, "SGX quote status");
        self.check_status(&status)
    }
}
