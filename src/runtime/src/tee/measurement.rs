//! Measurement verification against caller expectations.

use tee_attest_core::tee::{ErrorKind, ExpectedMeasurements, VerificationFailure};

use super::report::AttestationReport;
use super::util::constant_time_eq;

/// Compare a verified report's identities and versions with what the
/// caller expects. Identity comparisons are constant-time.
pub fn verify_measurements(
    report: &AttestationReport,
    expected: &ExpectedMeasurements,
) -> Result<(), VerificationFailure> {
    let actual = &report.measurements;

    if !constant_time_eq(
        actual.enclave_identity.as_bytes(),
        expected.enclave_identity.as_bytes(),
    ) {
        return Err(VerificationFailure::new(
            ErrorKind::EnclaveMismatch,
            "enclave identity does not match the expected value",
        )
        .with_details(serde_json::json!({
            "expected": expected.enclave_identity.to_hex(),
            "actual": actual.enclave_identity.to_hex(),
        })));
    }

    if !constant_time_eq(
        actual.signer_identity.as_bytes(),
        expected.signer_identity.as_bytes(),
    ) {
        return Err(VerificationFailure::new(
            ErrorKind::SignerMismatch,
            "signer identity does not match the expected value",
        )
        .with_details(serde_json::json!({
            "expected": expected.signer_identity.to_hex(),
            "actual": actual.signer_identity.to_hex(),
        })));
    }

    if actual.product_id < expected.min_product_id
        || actual.security_version < expected.min_security_version
    {
        return Err(VerificationFailure::new(
            ErrorKind::VersionTooOld,
            format!(
                "product {} / security version {} below required {} / {}",
                actual.product_id,
                actual.security_version,
                expected.min_product_id,
                expected.min_security_version
            ),
        )
        .with_details(serde_json::json!({
            "expectedMinProductId": expected.min_product_id,
            "actualProductId": actual.product_id,
            "expectedMinIsvSvn": expected.min_security_version,
            "actualIsvSvn": actual.security_version,
        })));
    }

    // The bound value is a prefix of the report data: SGX and SEV carry
    // 64 bytes, callers usually bind a 32-byte nonce or hash.
    if let Some(bound) = &expected.report_data {
        let bound = bound.as_slice();
        let matches = report.report_data.len() >= bound.len()
            && constant_time_eq(&report.report_data[..bound.len()], bound);
        if !matches {
            return Err(VerificationFailure::new(
                ErrorKind::ReportDataMismatch,
                "report data does not carry the expected binding",
            )
            .with_details(serde_json::json!({
                "expectedLength": bound.len(),
                "actualLength": report.report_data.len(),
            })));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tee::providers::{AttestationProvider, SevProvider};
    use crate::tee::simulate::{build_simulated_report, simulated_id_key_digest, simulated_measurement};
    use crate::tee::util::sha256_digest;
    use tee_attest_core::config::SevConfig;

    fn report(report_data: [u8; 64]) -> AttestationReport {
        SevProvider::new(
            SevConfig {
                allow_simulated: true,
                ..Default::default()
            },
            None,
        )
        .parse_attestation(&build_simulated_report(&report_data))
        .unwrap()
    }

    fn expected() -> ExpectedMeasurements {
        ExpectedMeasurements::new(
            sha256_digest(&simulated_measurement()),
            sha256_digest(&simulated_id_key_digest()),
        )
    }

    #[test]
    fn test_matching_measurements() {
        assert!(verify_measurements(&report([0; 64]), &expected()).is_ok());
    }

    #[test]
    fn test_enclave_mismatch() {
        let mut exp = expected();
        exp.enclave_identity.0[31] ^= 1;
        let err = verify_measurements(&report([0; 64]), &exp).unwrap_err();
        assert_eq!(err.kind, ErrorKind::EnclaveMismatch);
        assert_eq!(err.details["expected"], exp.enclave_identity.to_hex());
    }

    #[test]
    fn test_signer_mismatch() {
        let mut exp = expected();
        exp.signer_identity.0[0] ^= 1;
        let err = verify_measurements(&report([0; 64]), &exp).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SignerMismatch);
    }

    #[test]
    fn test_enclave_checked_before_signer() {
        let mut exp = expected();
        exp.enclave_identity.0[0] ^= 1;
        exp.signer_identity.0[0] ^= 1;
        let err = verify_measurements(&report([0; 64]), &exp).unwrap_err();
        assert_eq!(err.kind, ErrorKind::EnclaveMismatch);
    }

    #[test]
    fn test_security_version_too_old() {
        // simulated reports carry guest SVN 1
        let exp = expected().with_min_versions(0, 2);
        let err = verify_measurements(&report([0; 64]), &exp).unwrap_err();
        assert_eq!(err.kind, ErrorKind::VersionTooOld);
        assert_eq!(err.details["expectedMinIsvSvn"], 2);
        assert_eq!(err.details["actualIsvSvn"], 1);
    }

    #[test]
    fn test_product_id_too_old() {
        let exp = expected().with_min_versions(2, 0);
        let err = verify_measurements(&report([0; 64]), &exp).unwrap_err();
        assert_eq!(err.kind, ErrorKind::VersionTooOld);
        assert_eq!(err.details["actualProductId"], 1);
    }

    #[test]
    fn test_versions_at_minimum_pass() {
        let exp = expected().with_min_versions(1, 1);
        assert!(verify_measurements(&report([0; 64]), &exp).is_ok());
    }

    #[test]
    fn test_report_data_prefix_binding() {
        let mut data = [0u8; 64];
        data[..32].copy_from_slice(&[0xC4; 32]);
        let report = report(data);

        let exp = expected().with_report_data(vec![0xC4; 32]);
        assert!(verify_measurements(&report, &exp).is_ok());

        let exp = expected().with_report_data(vec![0xC5; 32]);
        let err = verify_measurements(&report, &exp).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReportDataMismatch);

        let exp = expected().with_report_data(vec![0xC4; 65]);
        let err = verify_measurements(&report, &exp).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReportDataMismatch);
    }
}
