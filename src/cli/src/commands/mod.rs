//! CLI command definitions and dispatch.

mod inspect;
mod simulate;
mod verify;
mod version;

use std::path::Path;

use clap::{Parser, Subcommand};
use tee_attest_core::VerifierConfig;
use tee_attest_runtime::Orchestrator;

/// TEE Attest - verify SGX, SEV-SNP and Nitro attestation evidence.
#[derive(Parser)]
#[command(name = "tee-attest", version, about)]
pub struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Verify evidence against expected measurements and policy
    Verify(verify::VerifyArgs),
    /// Parse evidence and print its measurements without verifying it
    Inspect(inspect::InspectArgs),
    /// Print a simulated SEV-SNP report as hex
    Simulate(simulate::SimulateArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Verify(args) => verify::execute(args).await,
        Command::Inspect(args) => inspect::execute(args).await,
        Command::Simulate(args) => simulate::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}

/// Load a verifier config and build the orchestrator from it.
pub(crate) fn load_orchestrator(path: &Path) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let config = VerifierConfig::from_file(path)?;
    tracing::debug!(
        config = %path.display(),
        providers = config.providers.len(),
        "Verifier config loaded"
    );
    Ok(Orchestrator::from_config(&config)?)
}

/// Read an evidence file. Binary and hex-encoded files are both accepted.
pub(crate) fn read_evidence(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    std::fs::read(path)
        .map_err(|e| format!("Failed to read evidence file {}: {}", path.display(), e).into())
}
