//! Simulated SEV-SNP attestation for development and testing.
//!
//! Simulated reports have the real field layout but a marker version
//! (0xA3) and an all-zero signature. The SEV adapter accepts them only
//! when `allow_simulated` is set, and scores them at 1.

use super::providers::sev::{offsets, SNP_REPORT_SIZE};

/// Simulated SNP report version marker.
/// Real SNP reports use version 2; simulated reports use 0xA3 to distinguish.
pub const SIMULATED_REPORT_VERSION: u32 = 0xA3;

/// Simulated chip ID (all 0xA3 bytes, clearly fake).
pub const SIMULATED_CHIP_ID: [u8; 64] = [0xA3; 64];

/// Firmware version stamped into simulated reports (major, minor, build).
pub const SIMULATED_FIRMWARE: (u8, u8, u8) = (1, 55, 0);

/// Deterministic fake launch measurement.
pub fn simulated_measurement() -> [u8; 48] {
    let mut measurement = [0u8; 48];
    for (i, byte) in measurement.iter_mut().enumerate() {
        *byte = (i as u8).wrapping_mul(0xA3);
    }
    measurement
}

/// Deterministic fake ID key digest.
pub fn simulated_id_key_digest() -> [u8; 48] {
    [0x5A; 48]
}

/// Build a simulated 1184-byte SNP report with the given report_data.
///
/// Measurement, TCB, firmware and policy fields are populated so that
/// measurement and version checks still work against simulated evidence.
pub fn build_simulated_report(report_data: &[u8; 64]) -> Vec<u8> {
    let mut report = vec![0u8; SNP_REPORT_SIZE];

    report[offsets::VERSION..offsets::VERSION + 4]
        .copy_from_slice(&SIMULATED_REPORT_VERSION.to_le_bytes());
    report[offsets::GUEST_SVN..offsets::GUEST_SVN + 4].copy_from_slice(&1u32.to_le_bytes());

    // no debug, no SMT, no migration agent
    report[offsets::POLICY..offsets::POLICY + 8].copy_from_slice(&0u64.to_le_bytes());

    // image_id: product id 1
    report[offsets::IMAGE_ID] = 1;

    let tcb = [3u8, 0, 0, 0, 0, 0, 8, 115];
    report[offsets::CURRENT_TCB..offsets::CURRENT_TCB + 8].copy_from_slice(&tcb);
    report[offsets::REPORTED_TCB..offsets::REPORTED_TCB + 8].copy_from_slice(&tcb);

    report[offsets::REPORT_DATA..offsets::REPORT_DATA + 64].copy_from_slice(report_data);
    report[offsets::MEASUREMENT..offsets::MEASUREMENT + 48]
        .copy_from_slice(&simulated_measurement());
    report[offsets::ID_KEY_DIGEST..offsets::ID_KEY_DIGEST + 48]
        .copy_from_slice(&simulated_id_key_digest());
    report[offsets::CHIP_ID..offsets::CHIP_ID + 64].copy_from_slice(&SIMULATED_CHIP_ID);

    let (major, minor, build) = SIMULATED_FIRMWARE;
    report[offsets::CURRENT_BUILD] = build;
    report[offsets::CURRENT_MINOR] = minor;
    report[offsets::CURRENT_MAJOR] = major;

    // signature at 0x2A0 (512 bytes) left as zeros

    report
}

/// Check if an SNP report is a simulated report (version == 0xA3).
pub fn is_simulated_report(report: &[u8]) -> bool {
    report
        .get(offsets::VERSION..offsets::VERSION + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        == Some(SIMULATED_REPORT_VERSION)
}
