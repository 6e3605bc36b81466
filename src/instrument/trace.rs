//! Structured `tracing` events for every finished operation.

use tracing::{debug, trace, warn};

use crate::instrument::{Instrumentation, Operation, OperationEvent, Outcome};

/// Emits one event per operation on the `kvcache::ops` target. Failures are
/// warnings, unreadable payloads are debug events, everything else is trace.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingInstrumentation;

impl Instrumentation for TracingInstrumentation {
    fn on_start(&self, operation: Operation, backend: &str, key: Option<&str>) {
        trace!(
            target: "kvcache::ops",
            operation = operation.as_str(),
            backend,
            key = key.unwrap_or(""),
            "Operation started"
        );
    }

    fn on_finish(&self, event: &OperationEvent<'_>) {
        let key = event.key.unwrap_or("");
        let duration_us = event.duration.as_micros() as u64;
        match event.outcome {
            Outcome::Failed(kind) => warn!(
                target: "kvcache::ops",
                operation = event.operation.as_str(),
                backend = event.backend,
                namespace = event.namespace,
                key,
                error_kind = kind.as_str(),
                duration_us,
                "Operation failed"
            ),
            Outcome::Unreadable => debug!(
                target: "kvcache::ops",
                operation = event.operation.as_str(),
                backend = event.backend,
                namespace = event.namespace,
                key,
                duration_us,
                "Unreadable payload treated as miss"
            ),
            outcome => trace!(
                target: "kvcache::ops",
                operation = event.operation.as_str(),
                backend = event.backend,
                namespace = event.namespace,
                key,
                outcome = %outcome,
                duration_us,
                "Operation finished"
            ),
        }
    }
}
