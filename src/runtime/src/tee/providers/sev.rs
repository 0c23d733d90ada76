//! AMD SEV-SNP adapter.
//!
//! Evidence is the 1184-byte SNP attestation report, optionally followed
//! by the DER-encoded VCEK, ASK and ARK certificates. When the
//! certificates are not embedded they are fetched from AMD KDS.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tee_attest_core::config::{NetworkConfig, SevConfig};
use tee_attest_core::tee::{
    ErrorKind, Measurements, Provider, SecurityLevel, VerificationFailure,
};

use super::{build_report, wrong_evidence, AttestationProvider};
use crate::tee::certs::{self, parse_der_sequence, ChainCert, ChainPolicy};
use crate::tee::kds::AmdKdsClient;
use crate::tee::report::{AttestationReport, ParsedEvidence};
use crate::tee::simulate::is_simulated_report;
use crate::tee::util::sha256_digest;

/// SNP attestation report size in bytes.
pub const SNP_REPORT_SIZE: usize = 1184;

/// Lowest report version with the v2 field layout.
pub const MIN_REPORT_VERSION: u32 = 2;

/// Field offsets within the SNP report.
pub mod offsets {
    pub const VERSION: usize = 0x00;
    pub const GUEST_SVN: usize = 0x04;
    pub const POLICY: usize = 0x08;
    pub const FAMILY_ID: usize = 0x10;
    pub const IMAGE_ID: usize = 0x20;
    pub const VMPL: usize = 0x30;
    pub const CURRENT_TCB: usize = 0x38;
    pub const FLAGS: usize = 0x48;
    pub const REPORT_DATA: usize = 0x50;
    pub const MEASUREMENT: usize = 0x90;
    pub const ID_KEY_DIGEST: usize = 0xE0;
    pub const AUTHOR_KEY_DIGEST: usize = 0x110;
    pub const REPORTED_TCB: usize = 0x180;
    pub const CHIP_ID: usize = 0x1A0;
    pub const CURRENT_BUILD: usize = 0x1E8;
    pub const CURRENT_MINOR: usize = 0x1E9;
    pub const CURRENT_MAJOR: usize = 0x1EA;
    pub const SIGNATURE: usize = 0x2A0;
}

/// Guest policy bits.
pub mod policy_bits {
    pub const SMT: u64 = 1 << 16;
    pub const MIGRATE_MA: u64 = 1 << 18;
    pub const DEBUG: u64 = 1 << 19;
}

/// FLAGS bit 0: signer is identified by the author key.
const AUTHOR_KEY_EN: u32 = 0x1;

/// Width of each little-endian R and S field in the signature block.
const SIG_COMPONENT_LEN: usize = 72;
const P384_SCALAR_LEN: usize = 48;

/// TCB version components (SPL values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TcbVersion {
    pub boot_loader: u8,
    pub tee: u8,
    pub snp: u8,
    pub microcode: u8,
}

impl TcbVersion {
    /// Decode from the raw 8-byte TCB field.
    pub fn from_bytes(bytes: &[u8; 8]) -> Self {
        Self {
            boot_loader: bytes[0],
            tee: bytes[1],
            snp: bytes[6],
            microcode: bytes[7],
        }
    }
}

/// Parsed SNP attestation report.
#[derive(Debug, Clone)]
pub struct SnpReport {
    pub version: u32,
    pub guest_svn: u32,
    pub policy: u64,
    pub family_id: [u8; 16],
    pub image_id: [u8; 16],
    pub vmpl: u32,
    pub current_tcb: TcbVersion,
    pub flags: u32,
    pub report_data: [u8; 64],
    pub measurement: [u8; 48],
    pub id_key_digest: [u8; 48],
    pub author_key_digest: [u8; 48],
    pub reported_tcb: TcbVersion,
    pub chip_id: [u8; 64],
    pub current_build: u8,
    pub current_minor: u8,
    pub current_major: u8,
}

fn field<const N: usize>(raw: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&raw[offset..offset + N]);
    out
}

impl SnpReport {
    /// Parse the fixed-size report. `raw` must be at least
    /// [`SNP_REPORT_SIZE`] bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, VerificationFailure> {
        if raw.len() < SNP_REPORT_SIZE {
            return Err(VerificationFailure::malformed(format!(
                "SNP report too short: {} bytes, expected {}",
                raw.len(),
                SNP_REPORT_SIZE
            )));
        }

        Ok(Self {
            version: u32::from_le_bytes(field(raw, offsets::VERSION)),
            guest_svn: u32::from_le_bytes(field(raw, offsets::GUEST_SVN)),
            policy: u64::from_le_bytes(field(raw, offsets::POLICY)),
            family_id: field(raw, offsets::FAMILY_ID),
            image_id: field(raw, offsets::IMAGE_ID),
            vmpl: u32::from_le_bytes(field(raw, offsets::VMPL)),
            current_tcb: TcbVersion::from_bytes(&field(raw, offsets::CURRENT_TCB)),
            flags: u32::from_le_bytes(field(raw, offsets::FLAGS)),
            report_data: field(raw, offsets::REPORT_DATA),
            measurement: field(raw, offsets::MEASUREMENT),
            id_key_digest: field(raw, offsets::ID_KEY_DIGEST),
            author_key_digest: field(raw, offsets::AUTHOR_KEY_DIGEST),
            reported_tcb: TcbVersion::from_bytes(&field(raw, offsets::REPORTED_TCB)),
            chip_id: field(raw, offsets::CHIP_ID),
            current_build: raw[offsets::CURRENT_BUILD],
            current_minor: raw[offsets::CURRENT_MINOR],
            current_major: raw[offsets::CURRENT_MAJOR],
        })
    }

    pub fn is_debug(&self) -> bool {
        self.policy & policy_bits::DEBUG != 0
    }

    pub fn product_id(&self) -> u32 {
        u32::from(u16::from_le_bytes([self.image_id[0], self.image_id[1]]))
    }

    pub fn measurements(&self) -> Measurements {
        let signer = if self.flags & AUTHOR_KEY_EN != 0 {
            &self.author_key_digest
        } else {
            &self.id_key_digest
        };
        Measurements {
            enclave_identity: sha256_digest(&self.measurement),
            signer_identity: sha256_digest(signer),
            product_id: self.product_id(),
            security_version: self.guest_svn,
        }
    }
}

/// Report plus whatever certificates travelled with it.
#[derive(Debug, Clone)]
pub struct SnpEvidence {
    pub report: SnpReport,
    /// The 1184 report bytes, signature included
    pub raw_report: Vec<u8>,
    /// VCEK, ASK, ARK when embedded in the evidence
    pub certs: Option<Vec<ChainCert>>,
    pub simulated: bool,
}

impl SnpEvidence {
    pub fn parse(evidence: &[u8]) -> Result<Self, VerificationFailure> {
        let report = SnpReport::parse(evidence)?;
        let simulated = is_simulated_report(evidence);
        if !simulated && report.version < MIN_REPORT_VERSION {
            return Err(VerificationFailure::malformed(format!(
                "unsupported SNP report version {}",
                report.version
            )));
        }

        let trailing = &evidence[SNP_REPORT_SIZE..];
        let certs = if trailing.is_empty() {
            None
        } else {
            let certs = parse_der_sequence(trailing)?;
            if certs.len() != 3 {
                return Err(VerificationFailure::malformed(format!(
                    "expected VCEK, ASK and ARK after the report, found {} certificates",
                    certs.len()
                )));
            }
            Some(certs)
        };

        Ok(Self {
            report,
            raw_report: evidence[..SNP_REPORT_SIZE].to_vec(),
            certs,
            simulated,
        })
    }

    /// Big-endian `r || s` from the little-endian signature block.
    fn signature(&self) -> Option<[u8; 2 * P384_SCALAR_LEN]> {
        let block = &self.raw_report[offsets::SIGNATURE..];
        let mut sig = [0u8; 2 * P384_SCALAR_LEN];
        for (i, component) in block.chunks(SIG_COMPONENT_LEN).take(2).enumerate() {
            let (scalar, padding) = component.split_at(P384_SCALAR_LEN);
            if padding.iter().any(|&b| b != 0) {
                return None;
            }
            let out = &mut sig[i * P384_SCALAR_LEN..(i + 1) * P384_SCALAR_LEN];
            out.copy_from_slice(scalar);
            out.reverse();
        }
        Some(sig)
    }
}

/// Score an SNP guest from its policy.
pub fn security_level(evidence: &SnpEvidence) -> SecurityLevel {
    if evidence.simulated {
        return SecurityLevel::from_score(1, ["simulated"]);
    }

    let policy = evidence.report.policy;
    let mut score: u8 = 8;
    let mut factors = vec!["sev-snp-vm"];

    if policy & policy_bits::SMT != 0 {
        score -= 1;
        factors.push("smt-allowed");
    }
    if policy & policy_bits::MIGRATE_MA != 0 {
        score -= 1;
        factors.push("migration-agent-allowed");
    }
    if policy & policy_bits::DEBUG != 0 {
        score = score.min(2);
        factors.push("debug-mode");
    }

    SecurityLevel::from_score(score, factors)
}

/// SEV-SNP provider.
pub struct SevProvider {
    config: SevConfig,
    kds: Option<AmdKdsClient>,
}

impl SevProvider {
    pub fn new(config: SevConfig, kds: Option<AmdKdsClient>) -> Self {
        Self { config, kds }
    }

    pub fn from_config(config: SevConfig, network: &NetworkConfig) -> Self {
        let kds = AmdKdsClient::new(
            config.kds_url.clone(),
            &config.product,
            config.cert_cache_dir.clone(),
            network.clone(),
        );
        Self::new(config, Some(kds))
    }

    async fn resolve_chain(&self, evidence: &SnpEvidence) -> Result<Vec<ChainCert>, VerificationFailure> {
        if let Some(certs) = &evidence.certs {
            return Ok(certs.clone());
        }

        let Some(kds) = &self.kds else {
            return Err(VerificationFailure::service_unavailable(
                "report carries no certificates and no AMD KDS client is configured",
            ));
        };

        let chain = kds
            .fetch_cert_chain(&evidence.report.chip_id, &evidence.report.reported_tcb)
            .await?;
        [chain.vcek, chain.ask, chain.ark]
            .iter()
            .map(|der| {
                ChainCert::from_der(der).map_err(|e| {
                    VerificationFailure::service_unavailable(format!(
                        "AMD KDS returned an unusable certificate: {}",
                        e.message
                    ))
                })
            })
            .collect()
    }

    fn check_versions(&self, report: &SnpReport) -> Result<(), VerificationFailure> {
        if let Some(min) = &self.config.min_firmware {
            if (report.current_major, report.current_minor) < (min.major, min.minor) {
                return Err(VerificationFailure::new(
                    ErrorKind::VersionTooOld,
                    format!(
                        "firmware {}.{} is older than required {}.{}",
                        report.current_major, report.current_minor, min.major, min.minor
                    ),
                )
                .with_details(serde_json::json!({
                    "expectedMinApiMajor": min.major,
                    "expectedMinApiMinor": min.minor,
                    "actualApiMajor": report.current_major,
                    "actualApiMinor": report.current_minor,
                })));
            }
        }

        if let Some(min_tcb) = &self.config.min_tcb {
            let tcb = &report.reported_tcb;
            let components = [
                ("bootLoader", min_tcb.boot_loader, tcb.boot_loader),
                ("tee", min_tcb.tee, tcb.tee),
                ("snp", min_tcb.snp, tcb.snp),
                ("microcode", min_tcb.microcode, tcb.microcode),
            ];
            for (name, min, actual) in components {
                let Some(min) = min else { continue };
                if actual < min {
                    return Err(VerificationFailure::new(
                        ErrorKind::VersionTooOld,
                        format!("TCB component {} is {} (minimum {})", name, actual, min),
                    )
                    .with_details(serde_json::json!({
                        "component": name,
                        "expectedMin": min,
                        "actual": actual,
                    })));
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl AttestationProvider for SevProvider {
    fn provider(&self) -> Provider {
        Provider::Sev
    }

    fn parse_attestation(&self, evidence: &[u8]) -> Result<AttestationReport, VerificationFailure> {
        let snp = SnpEvidence::parse(evidence)?;
        let measurements = snp.report.measurements();
        let level = security_level(&snp);
        let report_data = snp.report.report_data.to_vec();

        Ok(build_report(
            evidence,
            Utc::now(),
            measurements,
            level,
            report_data,
            ParsedEvidence::Sev(snp),
        ))
    }

    async fn verify_attestation(&self, report: &AttestationReport) -> Result<(), VerificationFailure> {
        let ParsedEvidence::Sev(snp) = &report.evidence else {
            return Err(wrong_evidence(Provider::Sev));
        };

        if snp.simulated {
            if !self.config.allow_simulated {
                return Err(VerificationFailure::signature_invalid(
                    "simulated SNP report rejected: simulated evidence is not allowed",
                ));
            }
            tracing::warn!(
                report_id = %report.id,
                "Accepting simulated SNP report without signature or chain verification"
            );
            return self.check_versions(&snp.report);
        }

        let chain = self.resolve_chain(snp).await?;
        certs::verify_chain(
            &chain,
            &ChainPolicy {
                trusted_roots: &self.config.ark_fingerprints,
                revoked_serials: &self.config.revoked_serials,
                now: Utc::now(),
            },
        )?;

        let vcek_key = chain
            .first()
            .and_then(|vcek| vcek.public_key())
            .ok_or_else(|| VerificationFailure::signature_invalid("VCEK has no public key"))?;
        let signature = snp.signature().ok_or_else(|| {
            VerificationFailure::signature_invalid("SNP signature has non-zero padding")
        })?;
        if !certs::verify_p384_raw(vcek_key, &snp.raw_report[..offsets::SIGNATURE], &signature) {
            return Err(VerificationFailure::signature_invalid(
                "SNP report signature does not verify against the VCEK",
            ));
        }

        self.check_versions(&snp.report)
    }
}
