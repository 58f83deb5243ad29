#![forbid(unsafe_code)]

//! History lifecycle notifications.
//!
//! The engine reports every successful `execute`, `undo`, and `redo` to a
//! [`NotificationSink`]. [`EventBus`] is the in-process sink: handlers are
//! registered per event kind and removed by dropping their
//! [`BusSubscription`] guard.
//!
//! # Failure Modes
//!
//! - **Subscriber leak**: guards kept alive forever keep their handlers
//!   registered. Dead weak references are pruned lazily on `emit`.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::trace;

/// Which history operation produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HistoryEventKind {
    #[serde(rename = "history:execute")]
    Execute,
    #[serde(rename = "history:undo")]
    Undo,
    #[serde(rename = "history:redo")]
    Redo,
}

impl HistoryEventKind {
    pub const ALL: [Self; 3] = [Self::Execute, Self::Undo, Self::Redo];

    /// Wire name of the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Execute => "history:execute",
            Self::Undo => "history:undo",
            Self::Redo => "history:redo",
        }
    }
}

impl fmt::Display for HistoryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One history notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEvent {
    pub kind: HistoryEventKind,
    /// Pointer after the operation; `None` when nothing is applied.
    pub pointer: Option<usize>,
}

impl HistoryEvent {
    #[must_use]
    pub const fn new(kind: HistoryEventKind, pointer: Option<usize>) -> Self {
        Self { kind, pointer }
    }

    /// Event detail as `{"pointer": n}`, with `-1` for an empty position.
    #[must_use]
    pub fn detail(&self) -> Value {
        match self.pointer {
            Some(p) => json!({ "pointer": p }),
            None => json!({ "pointer": -1 }),
        }
    }
}

/// Receiver of history lifecycle notifications.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, event: &HistoryEvent);
}

/// A sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn emit(&self, _event: &HistoryEvent) {}
}

type Handler = dyn Fn(&HistoryEvent) + Send + Sync;

struct Registration {
    /// `None` listens to every kind.
    kind: Option<HistoryEventKind>,
    handler: Weak<Handler>,
}

/// In-process pub/sub for history events.
///
/// Handlers run synchronously inside `emit`, in registration order.
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<Vec<Registration>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handler_count", &self.handler_count())
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen to one event kind.
    pub fn on(
        &self,
        kind: HistoryEventKind,
        handler: impl Fn(&HistoryEvent) + Send + Sync + 'static,
    ) -> BusSubscription {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Listen to every event kind.
    pub fn on_any(&self, handler: impl Fn(&HistoryEvent) + Send + Sync + 'static) -> BusSubscription {
        self.register(None, Arc::new(handler))
    }

    /// Registered handlers, including dropped ones not yet pruned.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn register(&self, kind: Option<HistoryEventKind>, strong: Arc<Handler>) -> BusSubscription {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration {
                kind,
                handler: Arc::downgrade(&strong),
            });
        BusSubscription {
            guard: Mutex::new(Some(strong)),
        }
    }
}

impl NotificationSink for EventBus {
    fn emit(&self, event: &HistoryEvent) {
        let live: Vec<Arc<Handler>> = {
            let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            handlers.retain(|r| r.handler.strong_count() > 0);
            handlers
                .iter()
                .filter(|r| r.kind.is_none_or(|k| k == event.kind))
                .filter_map(|r| r.handler.upgrade())
                .collect()
        };
        trace!(
            event = event.kind.as_str(),
            pointer = ?event.pointer,
            handlers = live.len(),
            "history event"
        );
        for handler in live {
            handler(event);
        }
    }
}

impl<S: NotificationSink + ?Sized> NotificationSink for Arc<S> {
    fn emit(&self, event: &HistoryEvent) {
        (**self).emit(event);
    }
}

/// Guard for an [`EventBus`] handler. Dropping it unsubscribes.
pub struct BusSubscription {
    guard: Mutex<Option<Arc<Handler>>>,
}

impl BusSubscription {
    /// Stop receiving events. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl fmt::Debug for BusSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusSubscription")
            .field("active", &self.is_active())
            .finish()
    }
}
