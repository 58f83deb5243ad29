//! Structured tracing emitted by the editing core.
//!
//! A capture layer records every span and event; the tests assert on span
//! names and the structured fields hosts filter on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use easel::prelude::*;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;

// ============================================================================
// Capture layer
// ============================================================================

#[derive(Debug, Clone)]
struct CapturedSpan {
    name: String,
    fields: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct CapturedEvent {
    level: tracing::Level,
    fields: HashMap<String, String>,
}

#[derive(Clone, Default)]
struct Capture {
    spans: Arc<Mutex<Vec<CapturedSpan>>>,
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl Capture {
    fn spans_named(&self, name: &str) -> Vec<CapturedSpan> {
        self.spans
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }

    fn events_with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.fields.get("message").is_some_and(|m| m == message))
            .cloned()
            .collect()
    }
}

struct FieldVisitor(Vec<(String, String)>);

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.push((field.name().to_string(), format!("{value:?}")));
    }
    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
}

impl<S> tracing_subscriber::Layer<S> for Capture
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        _id: &tracing::span::Id,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor(Vec::new());
        attrs.record(&mut visitor);
        self.spans.lock().unwrap().push(CapturedSpan {
            name: attrs.metadata().name().to_string(),
            fields: visitor.0.into_iter().collect(),
        });
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor(Vec::new());
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            fields: visitor.0.into_iter().collect(),
        });
    }
}

fn with_captured_tracing<F, R>(f: F) -> (R, Capture)
where
    F: std::future::Future<Output = R>,
{
    let capture = Capture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let result = tracing::subscriber::with_default(subscriber, || runtime.block_on(f));
    (result, capture)
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn execute_undo_redo_open_named_spans() {
    let ((), capture) = with_captured_tracing(async {
        let mut editor = Editor::new();
        editor.set("viewport", "/zoom", json!(2)).await.unwrap();
        editor.undo().await.unwrap();
        editor.redo().await.unwrap();
    });

    let execute = capture.spans_named("history.execute");
    assert_eq!(execute.len(), 1);
    assert_eq!(execute[0].fields.get("command").map(String::as_str), Some("state/set"));

    let undo = capture.spans_named("history.undo");
    assert_eq!(undo.len(), 1);
    assert_eq!(undo[0].fields.get("label").map(String::as_str), Some("Set viewport/zoom"));
    assert_eq!(undo[0].fields.get("pointer").map(String::as_str), Some("0"));

    assert_eq!(capture.spans_named("history.redo").len(), 1);
}

#[test]
fn store_publishes_log_action_and_version() {
    let ((), capture) = with_captured_tracing(async {
        let mut editor = Editor::new();
        editor.set("tools", "/brush", json!({ "size": 4 })).await.unwrap();
    });

    let published = capture.events_with_message("store published");
    assert_eq!(published.len(), 1, "{published:?}");
    assert_eq!(published[0].level, tracing::Level::DEBUG);
    assert_eq!(published[0].fields["version"], "1");
    assert_eq!(published[0].fields["action"], "state/set");
}

#[test]
fn unknown_command_is_warned() {
    let ((), capture) = with_captured_tracing(async {
        let mut editor = Editor::new();
        let _ = editor
            .execute("nope", &json!({}), ExecuteOptions::default())
            .await;
    });

    let warned = capture.events_with_message("execute called with unknown command");
    assert_eq!(warned.len(), 1);
    assert_eq!(warned[0].level, tracing::Level::WARN);
    assert_eq!(warned[0].fields.get("command").map(String::as_str), Some("nope"));
}

#[test]
fn self_check_reports_once() {
    let ((), capture) = with_captured_tracing(async {
        let editor = Editor::new();
        editor.run_self_check().await.unwrap();
        editor.run_self_check().await.unwrap();
    });

    assert_eq!(capture.events_with_message("self-check passed").len(), 1);
}
