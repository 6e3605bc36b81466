//! In-process counters per backend and operation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::instrument::{Instrumentation, Operation, OperationEvent, Outcome};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub backend: String,
    pub operation: Operation,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    unreadable: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub unreadable: u64,
    pub errors: u64,
}

impl CounterSnapshot {
    fn add(&mut self, other: &CounterSnapshot) {
        self.requests += other.requests;
        self.hits += other.hits;
        self.misses += other.misses;
        self.unreadable += other.unreadable;
        self.errors += other.errors;
    }
}

/// Request, hit, miss and error counters keyed by backend and operation.
#[derive(Default)]
pub struct MetricsInstrumentation {
    counters: DashMap<MetricKey, Counters>,
}

impl MetricsInstrumentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<MetricKey, CounterSnapshot> {
        self.counters
            .iter()
            .map(|entry| {
                let c = entry.value();
                (
                    entry.key().clone(),
                    CounterSnapshot {
                        requests: c.requests.load(Ordering::Relaxed),
                        hits: c.hits.load(Ordering::Relaxed),
                        misses: c.misses.load(Ordering::Relaxed),
                        unreadable: c.unreadable.load(Ordering::Relaxed),
                        errors: c.errors.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }

    /// Counters for `operation` summed over every backend.
    pub fn totals(&self, operation: Operation) -> CounterSnapshot {
        let mut total = CounterSnapshot::default();
        for (key, snapshot) in self.snapshot() {
            if key.operation == operation {
                total.add(&snapshot);
            }
        }
        total
    }

    pub fn reset(&self) {
        self.counters.clear();
    }
}

impl Instrumentation for MetricsInstrumentation {
    fn on_finish(&self, event: &OperationEvent<'_>) {
        let key = MetricKey {
            backend: event.backend.to_string(),
            operation: event.operation,
        };
        let counters = self.counters.entry(key).or_default();
        counters.requests.fetch_add(1, Ordering::Relaxed);
        match event.outcome {
            Outcome::Hit => {
                counters.hits.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Miss => {
                counters.misses.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Unreadable => {
                counters.misses.fetch_add(1, Ordering::Relaxed);
                counters.unreadable.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Batch { hits, misses } => {
                counters.hits.fetch_add(hits, Ordering::Relaxed);
                counters.misses.fetch_add(misses, Ordering::Relaxed);
            }
            Outcome::Failed(_) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Success => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::time::Duration;

    fn finish(metrics: &MetricsInstrumentation, backend: &str, operation: Operation, outcome: Outcome) {
        metrics.on_finish(&OperationEvent {
            operation,
            backend,
            namespace: "ns",
            key: None,
            outcome,
            duration: Duration::ZERO,
        });
    }

    #[test]
    fn test_counts_per_outcome() {
        let metrics = MetricsInstrumentation::new();
        finish(&metrics, "memory", Operation::Get, Outcome::Hit);
        finish(&metrics, "memory", Operation::Get, Outcome::Miss);
        finish(&metrics, "memory", Operation::Get, Outcome::Unreadable);
        finish(
            &metrics,
            "memory",
            Operation::Get,
            Outcome::Failed(ErrorKind::StoreUnavailable),
        );

        let get = metrics.totals(Operation::Get);
        assert_eq!(
            get,
            CounterSnapshot {
                requests: 4,
                hits: 1,
                misses: 2,
                unreadable: 1,
                errors: 1,
            }
        );
    }

    #[test]
    fn test_batch_counts_and_backends_are_separate() {
        let metrics = MetricsInstrumentation::new();
        finish(
            &metrics,
            "redis",
            Operation::GetMany,
            Outcome::Batch { hits: 3, misses: 2 },
        );
        finish(&metrics, "disk", Operation::GetMany, Outcome::Batch { hits: 1, misses: 0 });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), 2);
        let redis = snapshot[&MetricKey {
            backend: "redis".into(),
            operation: Operation::GetMany,
        }];
        assert_eq!((redis.requests, redis.hits, redis.misses), (1, 3, 2));
        assert_eq!(metrics.totals(Operation::GetMany).hits, 4);

        metrics.reset();
        assert!(metrics.snapshot().is_empty());
    }
}
