use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AttestError, Result};
use crate::tee::{Digest32, HexBytes, Level, Provider};

/// Top-level verifier configuration.
///
/// Loaded once at startup and handed to the orchestrator; nothing is read
/// from the environment afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Provider adapters to register, one per TEE type
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Organizational policy applied after cryptographic checks
    #[serde(flatten)]
    pub policy: SecurityPolicy,

    /// Parsed report cache bounds
    #[serde(default)]
    pub cache: CacheConfig,

    /// Outbound vendor service settings
    #[serde(default)]
    pub network: NetworkConfig,
}

impl VerifierConfig {
    /// Load a configuration file. `.json` files are parsed as JSON,
    /// everything else as YAML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AttestError::ConfigError(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make every verification fail or
    /// silently trust unanchored chains.
    pub fn validate(&self) -> Result<()> {
        let mut seen = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let kind = provider.provider();
            if seen.contains(&kind) {
                return Err(AttestError::ConfigError(format!(
                    "provider '{}' configured more than once",
                    kind
                )));
            }
            seen.push(kind);
            provider.validate()?;
        }

        self.policy.validate()?;

        if self.cache.max_entries == 0 {
            return Err(AttestError::ConfigError(
                "cache.max_entries must be greater than zero".to_string(),
            ));
        }
        if self.network.timeout_ms == 0 {
            return Err(AttestError::ConfigError(
                "network.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Provider adapter configuration, tagged by TEE type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum ProviderConfig {
    Sgx(SgxConfig),
    Sev(SevConfig),
    Nitro(NitroConfig),
}

impl ProviderConfig {
    pub fn provider(&self) -> Provider {
        match self {
            ProviderConfig::Sgx(_) => Provider::Sgx,
            ProviderConfig::Sev(_) => Provider::Sev,
            ProviderConfig::Nitro(_) => Provider::Nitro,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            ProviderConfig::Sgx(c) => c.validate(),
            ProviderConfig::Sev(c) => c.validate(),
            ProviderConfig::Nitro(c) => c.validate(),
        }
    }
}

fn provider_error(provider: Provider, message: &str) -> AttestError {
    AttestError::ProviderError {
        provider: provider.to_string(),
        message: message.to_string(),
    }
}

/// Intel SGX DCAP adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SgxConfig {
    /// SHA-256 fingerprints of accepted PCK chain roots (DER)
    pub root_ca_fingerprints: Vec<Digest32>,

    /// Quote statuses treated as trustworthy
    #[serde(default = "default_trusted_statuses")]
    pub trusted_statuses: Vec<String>,

    /// IAS-style quote status endpoint
    #[serde(default)]
    pub attestation_service_url: Option<String>,

    /// Subscription key sent as `Ocp-Apim-Subscription-Key`
    #[serde(default)]
    pub api_key: Option<String>,

    /// SHA-256 fingerprints of accepted roots for the service's
    /// report signing certificate (DER)
    #[serde(default)]
    pub ias_signing_root_fingerprints: Vec<Digest32>,

    /// Certificate serial numbers (big-endian hex) known to be revoked
    #[serde(default)]
    pub revoked_serials: Vec<HexBytes>,
}

fn default_trusted_statuses() -> Vec<String> {
    vec!["OK".to_string()]
}

impl SgxConfig {
    pub fn new(root_ca_fingerprints: Vec<Digest32>) -> Self {
        Self {
            root_ca_fingerprints,
            trusted_statuses: default_trusted_statuses(),
            attestation_service_url: None,
            api_key: None,
            ias_signing_root_fingerprints: Vec::new(),
            revoked_serials: Vec::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.root_ca_fingerprints.is_empty() {
            return Err(provider_error(
                Provider::Sgx,
                "root_ca_fingerprints must not be empty",
            ));
        }
        if self.trusted_statuses.is_empty() {
            return Err(provider_error(
                Provider::Sgx,
                "trusted_statuses must not be empty",
            ));
        }
        if self.attestation_service_url.is_some() && self.ias_signing_root_fingerprints.is_empty() {
            return Err(provider_error(
                Provider::Sgx,
                "ias_signing_root_fingerprints must not be empty when attestation_service_url is set",
            ));
        }
        Ok(())
    }
}

/// AMD SEV-SNP adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SevConfig {
    /// SHA-256 fingerprints of accepted ARK certificates (DER)
    #[serde(default)]
    pub ark_fingerprints: Vec<Digest32>,

    /// CPU generation used for KDS lookups ("milan" or "genoa")
    #[serde(default = "default_product")]
    pub product: String,

    /// AMD Key Distribution Service base URL
    #[serde(default = "default_kds_url")]
    pub kds_url: String,

    /// Directory for caching fetched certificate chains
    #[serde(default)]
    pub cert_cache_dir: Option<PathBuf>,

    /// Minimum firmware (API) version
    #[serde(default)]
    pub min_firmware: Option<FirmwareVersion>,

    /// Minimum reported TCB components
    #[serde(default)]
    pub min_tcb: Option<MinTcbPolicy>,

    /// Accept simulated (unsigned) reports. Development only.
    #[serde(default)]
    pub allow_simulated: bool,

    /// Certificate serial numbers (big-endian hex) known to be revoked
    #[serde(default)]
    pub revoked_serials: Vec<HexBytes>,
}

fn default_product() -> String {
    "milan".to_string()
}

fn default_kds_url() -> String {
    "https://kds.amd.com".to_string()
}

impl Default for SevConfig {
    fn default() -> Self {
        Self {
            ark_fingerprints: Vec::new(),
            product: default_product(),
            kds_url: default_kds_url(),
            cert_cache_dir: None,
            min_firmware: None,
            min_tcb: None,
            allow_simulated: false,
            revoked_serials: Vec::new(),
        }
    }
}

impl SevConfig {
    fn validate(&self) -> Result<()> {
        // Simulation-only setups have no hardware root to pin.
        if self.ark_fingerprints.is_empty() && !self.allow_simulated {
            return Err(provider_error(
                Provider::Sev,
                "ark_fingerprints must not be empty",
            ));
        }
        match self.product.to_ascii_lowercase().as_str() {
            "milan" | "genoa" => Ok(()),
            other => Err(provider_error(
                Provider::Sev,
                &format!("unknown product '{}'", other),
            )),
        }
    }
}

/// SEV firmware API version (`current_major.current_minor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

/// Minimum TCB (Trusted Computing Base) version requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinTcbPolicy {
    /// Minimum boot loader SVN.
    #[serde(default)]
    pub boot_loader: Option<u8>,
    /// Minimum TEE (PSP) SVN.
    #[serde(default)]
    pub tee: Option<u8>,
    /// Minimum SNP firmware SVN.
    #[serde(default)]
    pub snp: Option<u8>,
    /// Minimum CPU microcode SVN.
    #[serde(default)]
    pub microcode: Option<u8>,
}

/// AWS Nitro Enclaves adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NitroConfig {
    /// SHA-256 fingerprints of accepted root certificates (cabundle[0])
    pub root_ca_fingerprints: Vec<Digest32>,

    /// PCR index to exact expected value
    #[serde(default)]
    pub expected_pcrs: BTreeMap<u8, HexBytes>,
}

impl NitroConfig {
    pub fn new(root_ca_fingerprints: Vec<Digest32>) -> Self {
        Self {
            root_ca_fingerprints,
            expected_pcrs: BTreeMap::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.root_ca_fingerprints.is_empty() {
            return Err(provider_error(
                Provider::Nitro,
                "root_ca_fingerprints must not be empty",
            ));
        }
        if let Some(index) = self.expected_pcrs.keys().find(|i| **i > 31) {
            return Err(provider_error(
                Provider::Nitro,
                &format!("PCR index {} out of range", index),
            ));
        }
        Ok(())
    }
}

/// Minimum security level: either a level name or a raw 0-10 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MinSecurityLevel {
    Level(Level),
    Score(u8),
}

impl MinSecurityLevel {
    pub fn min_score(&self) -> u8 {
        match self {
            MinSecurityLevel::Level(level) => level.min_score(),
            MinSecurityLevel::Score(score) => *score,
        }
    }
}

impl Default for MinSecurityLevel {
    fn default() -> Self {
        MinSecurityLevel::Level(Level::Medium)
    }
}

/// Organizational acceptance policy. Empty allow-lists mean "any".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityPolicy {
    #[serde(default)]
    pub min_security_level: MinSecurityLevel,

    #[serde(default)]
    pub allowed_enclaves: Vec<Digest32>,

    #[serde(default)]
    pub trusted_signers: Vec<Digest32>,
}

impl SecurityPolicy {
    fn validate(&self) -> Result<()> {
        if let MinSecurityLevel::Score(score) = self.min_security_level {
            if score > 10 {
                return Err(AttestError::ConfigError(format!(
                    "min_security_level score {} exceeds 10",
                    score
                )));
            }
        }
        Ok(())
    }
}

/// Report cache bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of parsed reports kept
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Seconds a parsed report stays valid
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_max_entries() -> usize {
    1024
}

fn default_ttl_secs() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Outbound HTTP settings for vendor attestation services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt; 0 disables retrying
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}
