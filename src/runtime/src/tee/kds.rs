//! AMD certificate chain fetching and caching.
//!
//! Fetches VCEK, ASK, and ARK certificates from the AMD Key Distribution
//! Service (KDS) when a report arrives without its certificate chain.
//! Certificates are cached locally to avoid repeated network requests.
//! Everything fetched here is untrusted until the chain verifies.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tee_attest_core::config::NetworkConfig;

use super::certs::{parse_pem_chain, ChainCert};
use super::net::{call_with_retry, ServiceError};
use super::providers::sev::TcbVersion;

/// AMD KDS VCEK endpoint path.
const AMD_KDS_VCEK_PATH: &str = "vcek/v1";

/// AMD product name for Milan (3rd gen EPYC).
const PRODUCT_MILAN: &str = "Milan";

/// AMD product name for Genoa (4th gen EPYC).
const PRODUCT_GENOA: &str = "Genoa";

/// DER certificates for one chip: VCEK (leaf), ASK, ARK (root).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateChain {
    pub vcek: Vec<u8>,
    pub ask: Vec<u8>,
    pub ark: Vec<u8>,
}

/// Client for fetching certificates from AMD KDS.
pub struct AmdKdsClient {
    /// HTTP client for KDS requests.
    http: reqwest::Client,
    base_url: String,
    product: &'static str,
    /// Local cache directory for certificates.
    cache_dir: Option<PathBuf>,
    network: NetworkConfig,
}

impl AmdKdsClient {
    pub fn new(
        base_url: impl Into<String>,
        product: &str,
        cache_dir: Option<PathBuf>,
        network: NetworkConfig,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(network.timeout())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            product: Self::product_name(product),
            cache_dir,
            network,
        }
    }

    /// Fetch the complete certificate chain for verifying an SNP report.
    ///
    /// Tries the local cache first, then falls back to AMD KDS.
    pub async fn fetch_cert_chain(
        &self,
        chip_id: &[u8],
        tcb: &TcbVersion,
    ) -> Result<CertificateChain, ServiceError> {
        let chip_hex = hex::encode(chip_id);

        if let Some(cached) = self.load_from_cache(&chip_hex, tcb).await {
            tracing::debug!(
                chip_id = &chip_hex[..chip_hex.len().min(16)],
                "Using cached certificate chain"
            );
            return Ok(cached);
        }

        let vcek = call_with_retry(&self.network, "amd-kds-vcek", || {
            self.fetch_vcek(&chip_hex, tcb)
        })
        .await?;
        let (ask, ark) =
            call_with_retry(&self.network, "amd-kds-cert-chain", || self.fetch_ask_ark()).await?;

        let chain = CertificateChain { vcek, ask, ark };
        self.save_to_cache(&chip_hex, tcb, &chain).await;
        Ok(chain)
    }

    fn vcek_url(&self, chip_hex: &str, tcb: &TcbVersion) -> String {
        format!(
            "{}/{}/{}/{}?blSPL={}&teeSPL={}&snpSPL={}&ucodeSPL={}",
            self.base_url,
            AMD_KDS_VCEK_PATH,
            self.product,
            chip_hex,
            tcb.boot_loader,
            tcb.tee,
            tcb.snp,
            tcb.microcode,
        )
    }

    fn cert_chain_url(&self) -> String {
        format!(
            "{}/{}/{}/cert_chain",
            self.base_url, AMD_KDS_VCEK_PATH, self.product
        )
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ServiceError::Status(response.status().as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Fetch the VCEK certificate. KDS serves it as DER.
    async fn fetch_vcek(&self, chip_hex: &str, tcb: &TcbVersion) -> Result<Vec<u8>, ServiceError> {
        let url = self.vcek_url(chip_hex, tcb);
        tracing::debug!(url = %url, "Fetching VCEK from AMD KDS");
        let body = self.get(&url).await?;

        if body.starts_with(b"-----BEGIN") {
            let mut certs = Self::split_pem_bundle(&body, 1)?;
            return Ok(certs.remove(0).der);
        }
        ChainCert::from_der(&body)
            .map(|c| c.der)
            .map_err(|e| ServiceError::InvalidResponse(e.message))
    }

    /// Fetch the ASK and ARK certificates (PEM bundle, ASK first).
    async fn fetch_ask_ark(&self) -> Result<(Vec<u8>, Vec<u8>), ServiceError> {
        let url = self.cert_chain_url();
        tracing::debug!(url = %url, "Fetching ASK+ARK from AMD KDS");
        let body = self.get(&url).await?;

        let mut certs = Self::split_pem_bundle(&body, 2)?.into_iter();
        match (certs.next(), certs.next()) {
            (Some(ask), Some(ark)) => Ok((ask.der, ark.der)),
            _ => Err(ServiceError::InvalidResponse(
                "cert_chain response is missing ASK or ARK".to_string(),
            )),
        }
    }

    fn split_pem_bundle(bundle: &[u8], expected: usize) -> Result<Vec<ChainCert>, ServiceError> {
        let certs =
            parse_pem_chain(bundle).map_err(|e| ServiceError::InvalidResponse(e.message))?;
        if certs.len() < expected {
            return Err(ServiceError::InvalidResponse(format!(
                "Expected {} certificates in PEM bundle, found {}",
                expected,
                certs.len()
            )));
        }
        Ok(certs)
    }

    /// Try to load a cached certificate chain.
    async fn load_from_cache(&self, chip_hex: &str, tcb: &TcbVersion) -> Option<CertificateChain> {
        let cache_dir = self.cache_dir.as_ref()?;
        let cache_path = cache_dir.join(Self::cache_key(chip_hex, tcb));

        let data = tokio::fs::read(&cache_path).await.ok()?;
        serde_json::from_slice(&data).ok()
    }

    /// Save a certificate chain to the local cache.
    pub(crate) async fn save_to_cache(
        &self,
        chip_hex: &str,
        tcb: &TcbVersion,
        chain: &CertificateChain,
    ) {
        let Some(cache_dir) = &self.cache_dir else {
            return;
        };

        if let Err(e) = tokio::fs::create_dir_all(cache_dir).await {
            tracing::warn!("Failed to create cert cache dir: {}", e);
            return;
        }

        let cache_path = cache_dir.join(Self::cache_key(chip_hex, tcb));
        match serde_json::to_vec(chain) {
            Ok(data) => {
                if let Err(e) = tokio::fs::write(&cache_path, &data).await {
                    tracing::warn!("Failed to cache certificate chain: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!("Failed to serialize certificate chain for cache: {}", e);
            }
        }
    }

    /// Generate a cache key from chip ID and TCB version.
    fn cache_key(chip_hex: &str, tcb: &TcbVersion) -> String {
        let short_id = &chip_hex[..chip_hex.len().min(16)];
        format!(
            "snp_certs_{}_bl{}_tee{}_snp{}_uc{}.json",
            short_id, tcb.boot_loader, tcb.tee, tcb.snp, tcb.microcode,
        )
    }

    /// Get the product name string for AMD KDS.
    pub fn product_name(generation: &str) -> &'static str {
        match generation.to_lowercase().as_str() {
            "genoa" => PRODUCT_GENOA,
            _ => PRODUCT_MILAN,
        }
    }
}
