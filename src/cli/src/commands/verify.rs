//! `tee-attest verify` command - Verify attestation evidence.
//!
//! Loads a verifier config, runs the evidence through the full pipeline
//! (vendor chain, measurements, policy) and prints the verdict as JSON.
//! Exits with status 1 when the evidence is rejected.

use std::path::PathBuf;

use clap::Args;
use tee_attest_core::{Digest32, ExpectedMeasurements, HexBytes};

use super::{load_orchestrator, read_evidence};

#[derive(Args)]
pub struct VerifyArgs {
    /// Verifier config file (YAML, or JSON with a .json extension)
    #[arg(long, short)]
    pub config: PathBuf,

    /// TEE provider: sgx, sev or nitro
    #[arg(long, short)]
    pub provider: String,

    /// Evidence file (binary or hex)
    #[arg(long, short)]
    pub evidence: PathBuf,

    /// Expected enclave identity (SHA-256, hex)
    #[arg(long)]
    pub enclave: String,

    /// Expected signer identity (SHA-256, hex)
    #[arg(long)]
    pub signer: String,

    /// Minimum product id
    #[arg(long, default_value_t = 0)]
    pub min_product_id: u32,

    /// Minimum security version
    #[arg(long, default_value_t = 0)]
    pub min_svn: u32,

    /// Data the evidence must bind, as a prefix of its report data (hex)
    #[arg(long)]
    pub report_data: Option<String>,

    /// Only output the verification result (true/false)
    #[arg(long, short)]
    pub quiet: bool,
}

impl VerifyArgs {
    fn expected(&self) -> Result<ExpectedMeasurements, Box<dyn std::error::Error>> {
        let mut expected = ExpectedMeasurements::new(
            Digest32::from_hex(&self.enclave)?,
            Digest32::from_hex(&self.signer)?,
        )
        .with_min_versions(self.min_product_id, self.min_svn);
        if let Some(report_data) = &self.report_data {
            expected = expected.with_report_data(HexBytes::from_hex(report_data)?.0);
        }
        Ok(expected)
    }
}

pub async fn execute(args: VerifyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let expected = args.expected()?;
    let orchestrator = load_orchestrator(&args.config)?;
    let evidence = read_evidence(&args.evidence)?;

    let result = orchestrator
        .verify(&evidence, &args.provider, &expected)
        .await;

    if args.quiet {
        println!("{}", result.success);
        if let (false, Some(message)) = (result.success, &result.message) {
            eprintln!("  {}", message);
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    if !result.success {
        std::process::exit(1);
    }

    Ok(())
}
