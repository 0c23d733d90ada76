//! In-memory cache of parsed attestation reports.
//!
//! Reports are keyed by content id (SHA-256 of the decoded evidence), so
//! identical evidence is parsed once. Entries are bounded by count, with
//! least-recently-used eviction, and expire lazily after a TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tee_attest_core::config::CacheConfig;

use super::report::AttestationReport;

struct CacheEntry {
    report: Arc<AttestationReport>,
    inserted_at: Instant,
    /// Monotonic access tick for LRU ordering
    last_access: u64,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Bounded LRU + TTL cache of parsed reports.
pub struct ReportCache {
    state: Mutex<CacheState>,
    max_entries: usize,
    ttl: Duration,
}

impl ReportCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                tick: 0,
            }),
            max_entries: config.max_entries.max(1),
            ttl: config.ttl(),
        }
    }

    /// Look up a report by content id. Expired entries are dropped.
    pub fn get(&self, id: &str) -> Option<Arc<AttestationReport>> {
        self.get_at(id, Instant::now())
    }

    fn get_at(&self, id: &str, now: Instant) -> Option<Arc<AttestationReport>> {
        let mut state = self.state.lock();
        let expired = match state.entries.get(id) {
            None => return None,
            Some(entry) => now.saturating_duration_since(entry.inserted_at) >= self.ttl,
        };
        if expired {
            state.entries.remove(id);
            tracing::debug!(report_id = %id, "Cached report expired");
            return None;
        }

        let tick = state.next_tick();
        let entry = state.entries.get_mut(id)?;
        entry.last_access = tick;
        Some(entry.report.clone())
    }

    /// Insert a report, returning the cached copy.
    ///
    /// Idempotent by content id: when a live entry already exists it is
    /// kept and returned, so concurrent callers share one report.
    pub fn insert(&self, report: AttestationReport) -> Arc<AttestationReport> {
        self.insert_at(report, Instant::now())
    }

    fn insert_at(&self, report: AttestationReport, now: Instant) -> Arc<AttestationReport> {
        let mut state = self.state.lock();
        let tick = state.next_tick();

        if let Some(entry) = state.entries.get_mut(&report.id) {
            if now.saturating_duration_since(entry.inserted_at) < self.ttl {
                entry.last_access = tick;
                return entry.report.clone();
            }
        }

        if !state.entries.contains_key(&report.id) && state.entries.len() >= self.max_entries {
            let ttl = self.ttl;
            state
                .entries
                .retain(|_, e| now.saturating_duration_since(e.inserted_at) < ttl);
        }
        while !state.entries.contains_key(&report.id) && state.entries.len() >= self.max_entries {
            let Some(oldest) = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            state.entries.remove(&oldest);
            tracing::debug!(report_id = %oldest, "Evicted least recently used report");
        }

        let report = Arc::new(report);
        state.entries.insert(
            report.id.clone(),
            CacheEntry {
                report: report.clone(),
                inserted_at: now,
                last_access: tick,
            },
        );
        report
    }

    pub fn invalidate(&self, id: &str) -> bool {
        self.state.lock().entries.remove(id).is_some()
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Number of entries, including expired ones not yet looked up.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
