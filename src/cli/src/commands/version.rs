//! `tee-attest version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("tee-attest version {}", tee_attest_core::VERSION);
    Ok(())
}
