//! Verification pipeline.
//!
//! `verify` drives one piece of evidence through every stage:
//!
//! ```text
//! Start -> Parsed -> ProviderVerified -> MeasurementsVerified -> PolicyEvaluated -> Success
//!   \________\______________\___________________\____________________\______-> Failed
//! ```
//!
//! Parsed reports are cached by content id before verification, so
//! repeated submissions of the same evidence skip parsing. Verification
//! itself is never cached: vendor status can change between calls, and
//! the returned summary is stamped with the time of this verification.
//!
//! Failure metrics are keyed by the stage that rejected the evidence:
//! an unknown provider fails `start`, unparsable evidence fails `parsed`,
//! a vendor rejection fails `provider_verified` and so on.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tee_attest_core::config::{CacheConfig, SecurityPolicy, VerifierConfig};
use tee_attest_core::error::Result;
use tee_attest_core::tee::{
    ExpectedMeasurements, Provider, ReportSummary, VerificationFailure, VerificationResult,
};

use super::cache::ReportCache;
use super::measurement::verify_measurements;
use super::policy::PolicyEngine;
use super::providers::{AttestationProvider, ProviderAdapter, ProviderRegistry};
use super::report::AttestationReport;
use super::util::{decode_evidence, sha256};
use crate::metrics::{MetricsCollector, MetricsSnapshot};

/// Pipeline position, used in logs and failure metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStage {
    Start,
    Parsed,
    ProviderVerified,
    MeasurementsVerified,
    PolicyEvaluated,
    Success,
    Failed,
}

impl VerificationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStage::Start => "start",
            VerificationStage::Parsed => "parsed",
            VerificationStage::ProviderVerified => "provider_verified",
            VerificationStage::MeasurementsVerified => "measurements_verified",
            VerificationStage::PolicyEvaluated => "policy_evaluated",
            VerificationStage::Success => "success",
            VerificationStage::Failed => "failed",
        }
    }
}

impl fmt::Display for VerificationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejection together with where it happened.
struct Rejection {
    provider: Option<Provider>,
    report_id: Option<String>,
    /// Stage that rejected the evidence
    stage: VerificationStage,
    failure: VerificationFailure,
}

/// Attestation verification orchestrator.
///
/// `Send + Sync`; share it behind an `Arc` and call `verify` concurrently.
pub struct Orchestrator {
    registry: ProviderRegistry,
    cache: ReportCache,
    policy: PolicyEngine,
    metrics: MetricsCollector,
}

impl Orchestrator {
    pub fn new(registry: ProviderRegistry, policy: SecurityPolicy, cache: &CacheConfig) -> Self {
        Self {
            registry,
            cache: ReportCache::new(cache),
            policy: PolicyEngine::new(policy),
            metrics: MetricsCollector::new(),
        }
    }

    /// Build the orchestrator and every configured adapter.
    pub fn from_config(config: &VerifierConfig) -> Result<Self> {
        config.validate()?;
        let registry = ProviderRegistry::from_config(config)?;
        tracing::debug!(providers = ?registry.providers(), "Attestation providers registered");
        Ok(Self::new(registry, config.policy.clone(), &config.cache))
    }

    /// Verify evidence end to end. Expected failures are reported in the
    /// result, never as panics or errors.
    pub async fn verify(
        &self,
        evidence: &[u8],
        provider: &str,
        expected: &ExpectedMeasurements,
    ) -> VerificationResult {
        match self.run(evidence, provider, expected).await {
            Ok(summary) => {
                self.metrics.record_success(summary.provider);
                tracing::info!(
                    provider = %summary.provider,
                    report_id = %summary.id,
                    stage = %VerificationStage::Success,
                    score = summary.security_level.score,
                    "Attestation verified"
                );
                VerificationResult::verified(summary)
            }
            Err(rejection) => {
                self.metrics
                    .record_failure(rejection.provider, rejection.failure.kind, rejection.stage);
                tracing::warn!(
                    provider = %provider,
                    report_id = rejection.report_id.as_deref().unwrap_or("-"),
                    stage = %VerificationStage::Failed,
                    rejected_at = %rejection.stage,
                    error_kind = %rejection.failure.kind,
                    "Attestation rejected: {}",
                    rejection.failure.message
                );
                VerificationResult::failed(rejection.failure)
            }
        }
    }

    async fn run(
        &self,
        evidence: &[u8],
        provider_name: &str,
        expected: &ExpectedMeasurements,
    ) -> std::result::Result<ReportSummary, Rejection> {
        let adapter = self.registry.resolve(provider_name).map_err(|failure| Rejection {
            provider: None,
            report_id: None,
            stage: VerificationStage::Start,
            failure,
        })?;
        let provider = adapter.provider();

        let report = self.load_report(adapter, evidence).map_err(|failure| Rejection {
            provider: Some(provider),
            report_id: None,
            stage: VerificationStage::Parsed,
            failure,
        })?;
        let reject = |stage: VerificationStage| {
            let report_id = report.id.clone();
            move |failure: VerificationFailure| Rejection {
                provider: Some(provider),
                report_id: Some(report_id),
                stage,
                failure,
            }
        };
        tracing::debug!(provider = %provider, report_id = %report.id, stage = %VerificationStage::Parsed, "Evidence parsed");

        adapter
            .verify_attestation(&report)
            .await
            .map_err(reject(VerificationStage::ProviderVerified))?;
        tracing::debug!(report_id = %report.id, stage = %VerificationStage::ProviderVerified, "Vendor chain of trust verified");

        verify_measurements(&report, expected)
            .map_err(reject(VerificationStage::MeasurementsVerified))?;
        tracing::debug!(report_id = %report.id, stage = %VerificationStage::MeasurementsVerified, "Measurements match");

        self.policy
            .evaluate_attestation(&report)
            .map_err(reject(VerificationStage::PolicyEvaluated))?;
        tracing::debug!(report_id = %report.id, stage = %VerificationStage::PolicyEvaluated, "Policy satisfied");

        Ok(report.summary_at(Utc::now()))
    }

    /// Cached report for this evidence, or a freshly parsed one that is
    /// inserted before any verification runs.
    fn load_report(
        &self,
        adapter: &ProviderAdapter,
        evidence: &[u8],
    ) -> std::result::Result<Arc<AttestationReport>, VerificationFailure> {
        let decoded = decode_evidence(evidence)?;
        let id = hex::encode(sha256(&decoded));

        if let Some(report) = self
            .cache
            .get(&id)
            .filter(|r| r.provider == adapter.provider())
        {
            self.metrics.record_cache_hit();
            tracing::debug!(report_id = %id, "Report cache hit");
            return Ok(report);
        }
        self.metrics.record_cache_miss();

        let report = adapter.parse_attestation(&decoded)?;
        Ok(self.cache.insert(report))
    }

    /// Parse evidence without verifying or caching it.
    pub fn parse_only(
        &self,
        evidence: &[u8],
        provider: &str,
    ) -> std::result::Result<AttestationReport, VerificationFailure> {
        let adapter = self.registry.resolve(provider)?;
        let decoded = decode_evidence(evidence)?;
        adapter.parse_attestation(&decoded)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn policy(&self) -> &SecurityPolicy {
        self.policy.policy()
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.registry.providers()
    }
}
