//! `tee-attest simulate` command - Emit a simulated SEV-SNP report.
//!
//! The report carries a marker version and no signature, so it only
//! verifies against an SEV adapter configured with `allow_simulated`.

use clap::Args;
use tee_attest_core::HexBytes;
use tee_attest_runtime::tee::build_simulated_report;

#[derive(Args)]
pub struct SimulateArgs {
    /// Data to bind into REPORT_DATA (hex, up to 64 bytes, zero-padded)
    #[arg(long)]
    pub report_data: Option<String>,
}

fn report_data(arg: Option<&str>) -> Result<[u8; 64], Box<dyn std::error::Error>> {
    let mut report_data = [0u8; 64];
    if let Some(hex) = arg {
        let bytes = HexBytes::from_hex(hex)?;
        if bytes.as_slice().len() > report_data.len() {
            return Err(format!(
                "report data is {} bytes, at most 64 fit in a report",
                bytes.as_slice().len()
            )
            .into());
        }
        report_data[..bytes.as_slice().len()].copy_from_slice(bytes.as_slice());
    }
    Ok(report_data)
}

pub async fn execute(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let report_data = report_data(args.report_data.as_deref())?;
    println!("{}", hex::encode(build_simulated_report(&report_data)));
    Ok(())
}
