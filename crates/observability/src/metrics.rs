//! Counters shared across request handlers.
//!
//! The sink is passed around as `Arc<dyn MetricsSink>`; there is no global
//! registry.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Every counter the service maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    AuthFailures,
    PermissionDenials,
    RateLimited,
    AuditWrites,
    AuditWriteFailures,
    WebhooksApplied,
    WebhooksDuplicate,
    WebhooksIgnored,
    WebhookSignatureFailures,
}

impl Counter {
    pub const ALL: [Counter; 9] = [
        Counter::AuthFailures,
        Counter::PermissionDenials,
        Counter::RateLimited,
        Counter::AuditWrites,
        Counter::AuditWriteFailures,
        Counter::WebhooksApplied,
        Counter::WebhooksDuplicate,
        Counter::WebhooksIgnored,
        Counter::WebhookSignatureFailures,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Counter::AuthFailures => "auth_failures",
            Counter::PermissionDenials => "permission_denials",
            Counter::RateLimited => "rate_limited",
            Counter::AuditWrites => "audit_writes",
            Counter::AuditWriteFailures => "audit_write_failures",
            Counter::WebhooksApplied => "webhooks_applied",
            Counter::WebhooksDuplicate => "webhooks_duplicate",
            Counter::WebhooksIgnored => "webhooks_ignored",
            Counter::WebhookSignatureFailures => "webhook_signature_failures",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

pub trait MetricsSink: Send + Sync + 'static {
    fn increment(&self, counter: Counter);

    fn snapshot(&self) -> MetricsSnapshot;
}

/// Point-in-time counter values, serialized as `{ "name": value, ... }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MetricsSnapshot(pub std::collections::BTreeMap<&'static str, u64>);

impl MetricsSnapshot {
    pub fn get(&self, counter: Counter) -> u64 {
        self.0.get(counter.name()).copied().unwrap_or(0)
    }
}

/// Lock-free counters.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: [AtomicU64; Counter::ALL.len()],
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, counter: Counter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot(Counter::ALL.iter().map(|c| (c.name(), self.get(*c))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counts_per_counter() {
        let metrics = InMemoryMetrics::new();
        metrics.increment(Counter::AuditWriteFailures);
        metrics.increment(Counter::AuditWriteFailures);
        metrics.increment(Counter::RateLimited);

        let snap = metrics.snapshot();
        assert_eq!(snap.get(Counter::AuditWriteFailures), 2);
        assert_eq!(snap.get(Counter::RateLimited), 1);
        assert_eq!(snap.get(Counter::WebhooksApplied), 0);
        assert_eq!(snap.0.len(), Counter::ALL.len());
    }

    #[test]
    fn shared_across_threads() {
        let metrics: Arc<dyn MetricsSink> = Arc::new(InMemoryMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        m.increment(Counter::AuthFailures);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().get(Counter::AuthFailures), 1000);
    }

    #[test]
    fn snapshot_serializes_by_name() {
        let metrics = InMemoryMetrics::new();
        metrics.increment(Counter::WebhooksDuplicate);
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["webhooks_duplicate"], 1);
    }
}
