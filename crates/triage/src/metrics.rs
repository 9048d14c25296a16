//! Per-run metrics capability.
//!
//! Counters are process-wide and append-only, so plain atomic increments are
//! enough. The recorder is injected into each run instead of being ambient.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::debug;

/// Sink for triage counters.
pub trait MetricsRecorder: Send + Sync {
    fn alert_handled(&self, investigation: &str);
    fn restriction_set(&self, investigation: &str);
    fn restriction_removed(&self, investigation: &str);
    fn advisory_sent(&self, investigation: &str);
    fn escalated(&self, investigation: &str);
    fn silenced(&self, investigation: &str);
    fn infrastructure_retry(&self, investigation: &str);
}

/// Atomic counter implementation of [`MetricsRecorder`].
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    alerts_handled: AtomicU64,
    restrictions_set: AtomicU64,
    restrictions_removed: AtomicU64,
    advisories_sent: AtomicU64,
    escalations: AtomicU64,
    silences: AtomicU64,
    infrastructure_retries: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub alerts_handled: u64,
    pub restrictions_set: u64,
    pub restrictions_removed: u64,
    pub advisories_sent: u64,
    pub escalations: u64,
    pub silences: u64,
    pub infrastructure_retries: u64,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            alerts_handled: self.alerts_handled.load(Ordering::Relaxed),
            restrictions_set: self.restrictions_set.load(Ordering::Relaxed),
            restrictions_removed: self.restrictions_removed.load(Ordering::Relaxed),
            advisories_sent: self.advisories_sent.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            silences: self.silences.load(Ordering::Relaxed),
            infrastructure_retries: self.infrastructure_retries.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, name: &'static str, investigation: &str) {
        let value = counter.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(metric = name, investigation, value, "Counter incremented");
    }
}

impl MetricsRecorder for AtomicMetrics {
    fn alert_handled(&self, investigation: &str) {
        Self::bump(&self.alerts_handled, "alerts_handled", investigation);
    }

    fn restriction_set(&self, investigation: &str) {
        Self::bump(&self.restrictions_set, "restrictions_set", investigation);
    }

    fn restriction_removed(&self, investigation: &str) {
        Self::bump(&self.restrictions_removed, "restrictions_removed", investigation);
    }

    fn advisory_sent(&self, investigation: &str) {
        Self::bump(&self.advisories_sent, "advisories_sent", investigation);
    }

    fn escalated(&self, investigation: &str) {
        Self::bump(&self.escalations, "escalations", investigation);
    }

    fn silenced(&self, investigation: &str) {
        Self::bump(&self.silences, "silences", investigation);
    }

    fn infrastructure_retry(&self, investigation: &str) {
        Self::bump(&self.infrastructure_retries, "infrastructure_retries", investigation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_increments() {
        let metrics = AtomicMetrics::new();
        metrics.alert_handled("a");
        metrics.alert_handled("b");
        metrics.restriction_set("a");
        metrics.silenced("a");

        let snap = metrics.snapshot();
        assert_eq!(snap.alerts_handled, 2);
        assert_eq!(snap.restrictions_set, 1);
        assert_eq!(snap.silences, 1);
        assert_eq!(snap.escalations, 0);
    }
}
