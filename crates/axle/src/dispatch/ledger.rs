//! Cumulative capability-probe latency per kernel library.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Mutex-guarded ledger of cumulative probe time, keyed by kernel library
/// name. Reset at the start of each compilation; accumulation happens
/// regardless of probe outcome.
#[derive(Debug, Default)]
pub struct ProbeCostLedger {
    entries: Mutex<HashMap<String, Duration>>,
}

impl ProbeCostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, library: &str, elapsed: Duration) {
        let mut entries = self.entries.lock().expect("probe ledger poisoned");
        let slot = entries.entry(library.to_string()).or_default();
        *slot = slot.saturating_add(elapsed);
    }

    pub fn reset(&self) {
        self.entries.lock().expect("probe ledger poisoned").clear();
    }

    /// Cumulative probe time recorded for one library so far.
    pub fn cost_of(&self, library: &str) -> Duration {
        self.entries
            .lock()
            .expect("probe ledger poisoned")
            .get(library)
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Per-library totals sorted by library name.
    pub fn snapshot(&self) -> Vec<(String, Duration)> {
        let entries = self.entries.lock().expect("probe ledger poisoned");
        let mut rows: Vec<(String, Duration)> =
            entries.iter().map(|(k, v)| (k.clone(), *v)).collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    pub fn total(&self) -> Duration {
        self.entries
            .lock()
            .expect("probe ledger poisoned")
            .values()
            .fold(Duration::ZERO, |acc, v| acc.saturating_add(*v))
    }
}
