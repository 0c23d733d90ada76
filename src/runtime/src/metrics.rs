//! Verification metrics.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tee_attest_core::tee::{ErrorKind, Provider};

use crate::tee::orchestrator::VerificationStage;

/// Per-provider counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCounts {
    pub verifications: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Point-in-time view of the collector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Time the collector was created
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,

    pub total_verifications: u64,
    pub successes: u64,
    pub failures: u64,

    /// Failures keyed by error kind name
    pub failures_by_kind: BTreeMap<String, u64>,

    /// Failures keyed by the stage that rejected the evidence
    pub failures_by_stage: BTreeMap<String, u64>,

    pub by_provider: BTreeMap<String, ProviderCounts>,

    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl MetricsSnapshot {
    /// Fraction of report lookups served from the cache.
    pub fn cache_hit_ratio(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

/// Metrics collector
pub struct MetricsCollector {
    metrics: Mutex<MetricsSnapshot>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new(MetricsSnapshot {
                started_at: Some(chrono::Utc::now()),
                ..Default::default()
            }),
        }
    }

    /// Get current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.lock().clone()
    }

    pub fn record_success(&self, provider: Provider) {
        let mut metrics = self.metrics.lock();
        metrics.total_verifications += 1;
        metrics.successes += 1;
        let counts = metrics
            .by_provider
            .entry(provider.as_str().to_string())
            .or_default();
        counts.verifications += 1;
        counts.successes += 1;
    }

    /// Record a rejected verification. `provider` is `None` when the
    /// provider name itself was not recognised.
    pub fn record_failure(&self, provider: Option<Provider>, kind: ErrorKind, stage: VerificationStage) {
        let mut metrics = self.metrics.lock();
        metrics.total_verifications += 1;
        metrics.failures += 1;
        *metrics
            .failures_by_kind
            .entry(kind.as_str().to_string())
            .or_default() += 1;
        *metrics
            .failures_by_stage
            .entry(stage.as_str().to_string())
            .or_default() += 1;
        if let Some(provider) = provider {
            let counts = metrics
                .by_provider
                .entry(provider.as_str().to_string())
                .or_default();
            counts.verifications += 1;
            counts.failures += 1;
        }
    }

    pub fn record_cache_hit(&self) {
        self.metrics.lock().cache_hits += 1;
    }

    pub fn record_cache_miss(&self) {
        self.metrics.lock().cache_misses += 1;
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
