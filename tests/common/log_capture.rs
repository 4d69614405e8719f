//! Capture `tracing` events emitted by the engine during a test.
//!
//! The capture installs a thread-local default subscriber, so it sees events
//! from `#[test]` and current-thread `#[tokio::test]` bodies.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

#[derive(Debug, Clone)]
pub struct CapturedLog {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

/// Records events until dropped.
pub struct TestLogCapture {
    logs: Arc<Mutex<Vec<CapturedLog>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl TestLogCapture {
    pub fn start() -> Self {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(CaptureLayer { logs: logs.clone() });
        let guard = tracing::subscriber::set_default(subscriber);
        Self { logs, _guard: guard }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CapturedLog>> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn logs(&self) -> Vec<CapturedLog> {
        self.lock().clone()
    }

    fn messages(&self) -> Vec<String> {
        self.lock().iter().map(|l| l.message.clone()).collect()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.lock().iter().filter(|l| l.message.contains(needle)).count()
    }

    pub fn assert_logged(&self, needle: &str) {
        assert!(
            self.count_matching(needle) > 0,
            "Expected log containing '{needle}'. Logged: {:#?}",
            self.messages()
        );
    }

    pub fn assert_not_logged(&self, needle: &str) {
        assert_eq!(
            self.count_matching(needle),
            0,
            "Did not expect log containing '{needle}'. Logged: {:#?}",
            self.messages()
        );
    }

    pub fn assert_logged_at_level(&self, level: Level, needle: &str) {
        let found = self
            .lock()
            .iter()
            .any(|l| l.level == level && l.message.contains(needle));
        assert!(
            found,
            "Expected {level} log containing '{needle}'. Logged: {:#?}",
            self.messages()
        );
    }

    /// Assert some event carried `field` with a value containing `value`.
    pub fn assert_field_logged(&self, field: &str, value: &str) {
        let logs = self.lock();
        let found = logs
            .iter()
            .any(|l| l.fields.iter().any(|(k, v)| k == field && v.contains(value)));
        assert!(
            found,
            "Expected field {field}={value}. Logged fields: {:#?}",
            logs.iter().map(|l| &l.fields).collect::<Vec<_>>()
        );
    }

    pub fn assert_no_errors(&self) {
        let errors: Vec<CapturedLog> = self
            .lock()
            .iter()
            .filter(|l| l.level == Level::ERROR)
            .cloned()
            .collect();
        assert!(errors.is_empty(), "Unexpected errors: {errors:#?}");
    }
}

struct CaptureLayer {
    logs: Arc<Mutex<Vec<CapturedLog>>>,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CapturedLog {
                level: *event.metadata().level(),
                target: event.metadata().target().to_string(),
                message: visitor.message,
                fields: visitor.fields,
            });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }
}
