//! Bounded, retrying calls to vendor attestation services.
//!
//! Every outbound request runs under `tokio::time::timeout`; transient
//! failures are retried with exponential backoff (doubling, capped).

use std::future::Future;
use std::time::Duration;

use tee_attest_core::config::NetworkConfig;
use tee_attest_core::tee::VerificationFailure;

/// Failure talking to a vendor service. Surfaces to callers as
/// `VerificationServiceUnavailable`, except for responses that fail
/// authentication, which are `SignatureInvalid`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("service returned HTTP {0}")]
    Status(u16),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("unauthenticated response: {0}")]
    Untrusted(String),
}

impl ServiceError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Timeout(_) | ServiceError::Transport(_) => true,
            ServiceError::Status(code) => *code == 429 || *code >= 500,
            ServiceError::InvalidResponse(_) | ServiceError::Untrusted(_) => false,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            ServiceError::Status(status.as_u16())
        } else if err.is_decode() {
            ServiceError::InvalidResponse(err.to_string())
        } else {
            ServiceError::Transport(err.to_string())
        }
    }
}

impl From<ServiceError> for VerificationFailure {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Untrusted(_) => VerificationFailure::signature_invalid(err.to_string()),
            _ => VerificationFailure::service_unavailable(err.to_string()),
        }
    }
}

/// Run `call` with a per-attempt timeout, retrying transient failures.
///
/// `network.max_retries` counts retries after the first attempt.
pub async fn call_with_retry<T, F, Fut>(
    network: &NetworkConfig,
    operation: &str,
    mut call: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let timeout = network.timeout();
    let mut delay = network.initial_backoff();
    let mut attempt = 0u32;

    loop {
        let outcome = match tokio::time::timeout(timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout(timeout)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < network.max_retries => {
                attempt += 1;
                tracing::warn!(
                    operation,
                    attempt,
                    max_retries = network.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Vendor service call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(network.max_backoff());
            }
            Err(e) => {
                tracing::warn!(operation, attempts = attempt + 1, error = %e, "Vendor service call failed");
                return Err(e);
            }
        }
    }
}
