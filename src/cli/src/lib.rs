//! TEE Attest CLI - verify and inspect attestation evidence.

pub mod commands;
