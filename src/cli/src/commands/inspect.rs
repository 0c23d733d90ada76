//! `tee-attest inspect` command - Parse evidence without verifying it.

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use tee_attest_core::ReportSummary;

use super::{load_orchestrator, read_evidence};

#[derive(Args)]
pub struct InspectArgs {
    /// Verifier config file (YAML, or JSON with a .json extension)
    #[arg(long, short)]
    pub config: PathBuf,

    /// TEE provider: sgx, sev or nitro
    #[arg(long, short)]
    pub provider: String,

    /// Evidence file (binary or hex)
    #[arg(long, short)]
    pub evidence: PathBuf,
}

/// JSON output for the inspect command.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InspectOutput {
    #[serde(flatten)]
    summary: ReportSummary,
    /// User-bound data carried by the evidence (hex)
    report_data: String,
    evidence_len: usize,
}

pub async fn execute(args: InspectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = load_orchestrator(&args.config)?;
    let evidence = read_evidence(&args.evidence)?;

    let report = orchestrator.parse_only(&evidence, &args.provider)?;
    let output = InspectOutput {
        summary: report.summary(),
        report_data: hex::encode(&report.report_data),
        evidence_len: report.raw_evidence.len(),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
