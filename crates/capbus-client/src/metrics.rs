//! Client-side invocation counters.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use capbus_core::ErrorCode;
use capbus_core::InvocationResult;
use parking_lot::Mutex;
use serde::Serialize;

/// Counters kept by the telemetry middleware. Cheap to share behind `Arc`.
#[derive(Default)]
pub struct InvocationMetrics {
    invocations: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    by_code: Mutex<BTreeMap<ErrorCode, u64>>,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Total invocations attempted.
    pub invocations: u64,
    /// Invocations that returned ok.
    pub successes: u64,
    /// Invocations that returned an error.
    pub failures: u64,
    /// Error counts keyed by wire code.
    pub errors_by_code: BTreeMap<String, u64>,
}

impl InvocationMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one settled invocation.
    pub fn record(&self, result: &InvocationResult) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(_) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                *self.by_code.lock().entry(err.error.code).or_insert(0) += 1;
            }
        }
    }

    /// Snapshot the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            errors_by_code: self
                .by_code
                .lock()
                .iter()
                .map(|(code, count)| (code.as_str().to_string(), *count))
                .collect(),
        }
    }
}
