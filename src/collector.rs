//! Shared collector contract: fetch error taxonomy and per-collector stats.
//!
//! Every source variant exposes the same shape to the orchestrator: an async
//! `fetch` that yields a normalized aircraft list, `None` when the source is
//! disabled or rate-gated, or a [`FetchError`] the orchestrator logs without
//! aborting the cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Failure kinds a collector surfaces for logging and metrics. None of them
/// is fatal; the cycle proceeds without that source's data.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("collector '{collector}' timed out after {timeout:?}")]
    Timeout { collector: String, timeout: Duration },
    #[error("collector '{collector}' failed to reach {endpoint}: {source}")]
    Connection {
        collector: String,
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("collector '{collector}' got status {status} from {endpoint}")]
    Status {
        collector: String,
        endpoint: String,
        status: reqwest::StatusCode,
    },
}

/// Per-collector counters, observability only.
#[derive(Debug, Default)]
pub struct CollectorStats {
    pub requests: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    /// Unix millis of the last fetch attempt.
    pub last_fetch_ms: AtomicU64,
    pub last_aircraft_count: AtomicU64,
}

impl CollectorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, aircraft_count: usize) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.last_aircraft_count
            .store(aircraft_count as u64, Ordering::Relaxed);
        self.last_fetch_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.last_fetch_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        StatsSnapshot {
            requests,
            successes,
            failures: self.failures.load(Ordering::Relaxed),
            success_rate: if requests > 0 {
                successes as f64 / requests as f64 * 100.0
            } else {
                0.0
            },
            last_fetch_ms: self.last_fetch_ms.load(Ordering::Relaxed),
            last_aircraft_count: self.last_aircraft_count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub last_fetch_ms: u64,
    pub last_aircraft_count: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_track_success_rate() {
        let stats = CollectorStats::new();
        stats.record_success(12);
        stats.record_success(8);
        stats.record_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.requests, 3);
        assert_eq!(snap.successes, 2);
        assert_eq!(snap.failures, 1);
        assert!((snap.success_rate - 66.666).abs() < 0.01);
        assert_eq!(snap.last_aircraft_count, 8);
        assert!(snap.last_fetch_ms > 0);
    }
}
