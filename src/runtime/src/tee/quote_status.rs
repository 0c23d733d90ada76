//! SGX quote status lookup.
//!
//! The status service is the only SGX check that cannot be done offline:
//! it tells us whether the platform's keys or TCB have been revoked. Its
//! answer is only as good as its authenticity, so every report must be
//! signed by a certificate chaining to a pinned root and must echo the
//! quote that was submitted.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as b64;
use base64::Engine;
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use tee_attest_core::config::NetworkConfig;
use tee_attest_core::tee::Digest32;

use super::certs::{parse_pem_chain, verify_chain, verify_rsa_pkcs1_sha256, ChainPolicy};
use super::net::{call_with_retry, ServiceError};
use super::util::constant_time_eq;

/// Status reported for a quote whose signature the service rejected.
pub const SIGNATURE_INVALID_STATUS: &str = "SIGNATURE_INVALID";

const SIGNATURE_HEADER: &str = "X-IASReport-Signature";
const SIGNING_CERT_HEADER: &str = "X-IASReport-Signing-Certificate";

/// Quote header plus report body, as echoed in `isvEnclaveQuoteBody`.
const QUOTE_BODY_LEN: usize = 432;

/// Source of truth for SGX quote status (`OK`, `REVOKED`, ...).
#[async_trait]
pub trait QuoteStatusService: Send + Sync {
    /// Look up the status of a binary DCAP quote.
    async fn quote_status(&self, quote: &[u8]) -> Result<String, ServiceError>;
}

/// Canonical form used for status comparisons.
pub fn normalize_status(status: &str) -> String {
    status.trim().to_ascii_uppercase()
}

#[derive(Serialize)]
struct QuoteRequest<'a> {
    #[serde(rename = "isvEnclaveQuote")]
    isv_enclave_quote: &'a str,
}

#[derive(Deserialize)]
struct VerificationReport {
    #[serde(rename = "isvEnclaveQuoteStatus")]
    isv_enclave_quote_status: String,
    #[serde(rename = "isvEnclaveQuoteBody")]
    isv_enclave_quote_body: String,
}

/// HTTP client for an IAS-style attestation report endpoint.
pub struct IasClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    /// Accepted roots for the report signing certificate
    signing_roots: Vec<Digest32>,
    network: NetworkConfig,
}

impl IasClient {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        signing_roots: Vec<Digest32>,
        network: NetworkConfig,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(network.timeout())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            url: url.into(),
            api_key,
            signing_roots,
            network,
        }
    }

    async fn request_once(&self, quote: &[u8], encoded: &str) -> Result<String, ServiceError> {
        let mut request = self.http.post(&self.url).json(&QuoteRequest {
            isv_enclave_quote: encoded,
        });
        if let Some(key) = &self.api_key {
            request = request.header("Ocp-Apim-Subscription-Key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status(status.as_u16()));
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let signature = header(SIGNATURE_HEADER);
        let certificates = header(SIGNING_CERT_HEADER);
        let body = response.bytes().await?;

        verify_report_response(
            &body,
            signature.as_deref(),
            certificates.as_deref(),
            quote,
            &self.signing_roots,
            Utc::now(),
        )
    }
}

#[async_trait]
impl QuoteStatusService for IasClient {
    async fn quote_status(&self, quote: &[u8]) -> Result<String, ServiceError> {
        let encoded = b64.encode(quote);
        tracing::debug!(url = %self.url, quote_len = quote.len(), "Requesting SGX quote status");
        call_with_retry(&self.network, "sgx-quote-status", || {
            self.request_once(quote, &encoded)
        })
        .await
    }
}

/// Authenticate a verification report and return its quote status.
///
/// The signing chain comes URL-encoded in `certificates` and must end in
/// one of `signing_roots`; `signature` is the base64 RSA-SHA256 signature
/// over the raw body. Authentication failures are
/// [`ServiceError::Untrusted`].
fn verify_report_response(
    body: &[u8],
    signature: Option<&str>,
    certificates: Option<&str>,
    quote: &[u8],
    signing_roots: &[Digest32],
    now: DateTime<Utc>,
) -> Result<String, ServiceError> {
    let certificates = certificates
        .ok_or_else(|| ServiceError::Untrusted(format!("missing {} header", SIGNING_CERT_HEADER)))?;
    let pem = percent_decode_str(certificates).decode_utf8().map_err(|e| {
        ServiceError::Untrusted(format!("signing certificate header is not UTF-8: {}", e))
    })?;
    let chain = parse_pem_chain(pem.as_bytes())
        .map_err(|e| ServiceError::Untrusted(format!("signing certificate: {}", e.message)))?;
    verify_chain(
        &chain,
        &ChainPolicy {
            trusted_roots: signing_roots,
            revoked_serials: &[],
            now,
        },
    )
    .map_err(|e| ServiceError::Untrusted(format!("report signing chain: {}", e.message)))?;

    let signature = signature
        .ok_or_else(|| ServiceError::Untrusted(format!("missing {} header", SIGNATURE_HEADER)))?;
    let signature = b64
        .decode(signature.trim())
        .map_err(|e| ServiceError::Untrusted(format!("report signature is not base64: {}", e)))?;
    let signing_key = chain
        .first()
        .and_then(|cert| cert.public_key())
        .ok_or_else(|| ServiceError::Untrusted("signing certificate has no public key".into()))?;
    if !verify_rsa_pkcs1_sha256(signing_key, body, &signature) {
        return Err(ServiceError::Untrusted(
            "report signature does not verify against the signing certificate".into(),
        ));
    }

    let report: VerificationReport = serde_json::from_slice(body)
        .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
    let echoed = b64
        .decode(&report.isv_enclave_quote_body)
        .map_err(|e| ServiceError::Untrusted(format!("isvEnclaveQuoteBody is not base64: {}", e)))?;
    if !constant_time_eq(&echoed, &quote[..quote.len().min(QUOTE_BODY_LEN)]) {
        return Err(ServiceError::Untrusted(
            "report was issued for a different quote".into(),
        ));
    }

    Ok(report.isv_enclave_quote_status)
}
