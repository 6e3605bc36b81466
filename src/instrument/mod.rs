//! Instrumentation hook: an optional observer called around every cache and
//! session operation.
//!
//! Hooks are observers only. A panicking hook is caught and logged; it never
//! changes the result handed back to the caller.

mod metrics;
mod trace;

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::ErrorKind;

pub use metrics::{CounterSnapshot, MetricKey, MetricsInstrumentation};
pub use trace::TracingInstrumentation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    Get,
    Set,
    Add,
    Delete,
    HasKey,
    GetMany,
    SetMany,
    DeleteMany,
    Clear,
    Touch,
    Incr,
    SessionLoad,
    SessionSave,
    SessionExists,
    SessionDelete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Set => "set",
            Operation::Add => "add",
            Operation::Delete => "delete",
            Operation::HasKey => "has_key",
            Operation::GetMany => "get_many",
            Operation::SetMany => "set_many",
            Operation::DeleteMany => "delete_many",
            Operation::Clear => "clear",
            Operation::Touch => "touch",
            Operation::Incr => "incr",
            Operation::SessionLoad => "session.load",
            Operation::SessionSave => "session.save",
            Operation::SessionExists => "session.exists",
            Operation::SessionDelete => "session.delete",
        }
    }

    pub fn is_session(&self) -> bool {
        matches!(
            self,
            Operation::SessionLoad
                | Operation::SessionSave
                | Operation::SessionExists
                | Operation::SessionDelete
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Hit,
    Miss,
    Success,
    /// The key existed but its payload could not be decoded; reported to the
    /// caller as a miss.
    Unreadable,
    Failed(ErrorKind),
    Batch { hits: u64, misses: u64 },
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Hit => f.write_str("hit"),
            Outcome::Miss => f.write_str("miss"),
            Outcome::Success => f.write_str("success"),
            Outcome::Unreadable => f.write_str("unreadable"),
            Outcome::Failed(kind) => write!(f, "error:{}", kind),
            Outcome::Batch { hits, misses } => write!(f, "batch:{}/{}", hits, misses),
        }
    }
}

/// Everything a hook learns about one finished operation.
#[derive(Debug, Clone)]
pub struct OperationEvent<'a> {
    pub operation: Operation,
    pub backend: &'a str,
    pub namespace: &'a str,
    pub key: Option<&'a str>,
    pub outcome: Outcome,
    pub duration: Duration,
}

pub trait Instrumentation: Send + Sync {
    fn on_start(&self, _operation: Operation, _backend: &str, _key: Option<&str>) {}

    fn on_finish(&self, event: &OperationEvent<'_>);
}

/// Forwards every call to each hook in turn.
#[derive(Default)]
pub struct Fanout {
    hooks: Vec<Arc<dyn Instrumentation>>,
}

impl Fanout {
    pub fn new(hooks: Vec<Arc<dyn Instrumentation>>) -> Self {
        Self { hooks }
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl Instrumentation for Fanout {
    fn on_start(&self, operation: Operation, backend: &str, key: Option<&str>) {
        for hook in &self.hooks {
            guarded(operation, || hook.on_start(operation, backend, key));
        }
    }

    fn on_finish(&self, event: &OperationEvent<'_>) {
        for hook in &self.hooks {
            guarded(event.operation, || hook.on_finish(event));
        }
    }
}

/// Optional hook as held by a backend. Calls are panic-isolated.
#[derive(Clone, Default)]
pub struct Hook {
    inner: Option<Arc<dyn Instrumentation>>,
}

impl Hook {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(instrumentation: Arc<dyn Instrumentation>) -> Self {
        Self {
            inner: Some(instrumentation),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn start(&self, operation: Operation, backend: &str, key: Option<&str>) {
        if let Some(hook) = &self.inner {
            guarded(operation, || hook.on_start(operation, backend, key));
        }
    }

    pub fn finish(&self, event: &OperationEvent<'_>) {
        if let Some(hook) = &self.inner {
            guarded(event.operation, || hook.on_finish(event));
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn guarded(operation: Operation, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(operation = %operation, "Instrumentation hook panicked; ignoring");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Instrumentation for Recorder {
        fn on_start(&self, operation: Operation, _backend: &str, _key: Option<&str>) {
            self.seen.lock().unwrap().push(format!("start:{}", operation));
        }

        fn on_finish(&self, event: &OperationEvent<'_>) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("finish:{}:{}", event.operation, event.outcome));
        }
    }

    struct Exploding;

    impl Instrumentation for Exploding {
        fn on_finish(&self, _event: &OperationEvent<'_>) {
            panic!("hook failure");
        }
    }

    fn event(outcome: Outcome) -> OperationEvent<'static> {
        OperationEvent {
            operation: Operation::Get,
            backend: "memory",
            namespace: "ns",
            key: Some("k"),
            outcome,
            duration: Duration::from_micros(5),
        }
    }

    #[test]
    fn test_fanout_reaches_every_hook() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let hook = Hook::new(Arc::new(Fanout::new(vec![a.clone(), b.clone()])));
        hook.start(Operation::Get, "memory", Some("k"));
        hook.finish(&event(Outcome::Hit));
        for recorder in [a, b] {
            assert_eq!(
                *recorder.seen.lock().unwrap(),
                vec!["start:get", "finish:get:hit"]
            );
        }
    }

    #[test]
    fn test_panicking_hook_does_not_starve_later_hooks() {
        let recorder = Arc::new(Recorder::default());
        let hook = Hook::new(Arc::new(Fanout::new(vec![
            Arc::new(Exploding),
            recorder.clone(),
        ])));
        hook.start(Operation::Get, "memory", Some("k"));
        hook.finish(&event(Outcome::Miss));
        // Hooks after the panicking one still see every event.
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec!["start:get", "finish:get:miss"]
        );
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            Outcome::Failed(ErrorKind::StoreUnavailable).to_string(),
            format!("error:{}", ErrorKind::StoreUnavailable)
        );
        assert_eq!(Outcome::Batch { hits: 2, misses: 1 }.to_string(), "batch:2/1");
        assert!(!Hook::none().is_enabled());
    }
}
