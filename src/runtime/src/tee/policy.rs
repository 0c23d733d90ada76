//! Organizational acceptance policy.
//!
//! Applied after the vendor chain and the caller's measurements have been
//! checked. Checks short-circuit in order: security level, enclave
//! allow-list, signer allow-list. Empty allow-lists accept anything.

use tee_attest_core::config::SecurityPolicy;
use tee_attest_core::tee::{ErrorKind, VerificationFailure};

use super::report::AttestationReport;
use super::util::contains_constant_time;

/// Evaluates reports against a [`SecurityPolicy`].
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    policy: SecurityPolicy,
}

impl PolicyEngine {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Minimum score a report must reach.
    pub fn required_score(&self) -> u8 {
        self.policy.min_security_level.min_score()
    }

    pub fn evaluate_attestation(&self, report: &AttestationReport) -> Result<(), VerificationFailure> {
        let level = &report.security_level;
        let required = self.required_score();
        if level.score < required {
            return Err(VerificationFailure::new(
                ErrorKind::InsufficientSecurityLevel,
                format!("security score {} below required {}", level.score, required),
            )
            .with_details(serde_json::json!({
                "requiredScore": required,
                "actualScore": level.score,
                "level": level.level,
                "factors": level.factors,
            })));
        }

        let identity = &report.measurements;
        if !self.policy.allowed_enclaves.is_empty()
            && !contains_constant_time(&self.policy.allowed_enclaves, &identity.enclave_identity)
        {
            return Err(VerificationFailure::new(
                ErrorKind::EnclaveNotAllowed,
                "enclave is not in the allowed list",
            )
            .with_details(serde_json::json!({
                "enclaveIdentity": identity.enclave_identity.to_hex(),
            })));
        }

        if !self.policy.trusted_signers.is_empty()
            && !contains_constant_time(&self.policy.trusted_signers, &identity.signer_identity)
        {
            return Err(VerificationFailure::new(
                ErrorKind::SignerNotTrusted,
                "signer is not in the trusted list",
            )
            .with_details(serde_json::json!({
                "signerIdentity": identity.signer_identity.to_hex(),
            })));
        }

        Ok(())
    }
}
