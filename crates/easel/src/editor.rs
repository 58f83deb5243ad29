#![forbid(unsafe_code)]

//! The editor facade: one store, one history, one event bus.
//!
//! [`Editor`] wires the pieces together the way a host application uses
//! them. UI code reads through [`Editor::store`] and subscribes to slices;
//! every user edit goes through [`Editor::execute`] so it lands on the undo
//! stack.
//!
//! # Example
//!
//! ```ignore
//! let mut editor = Editor::new();
//! let _zoom = editor.subscribe_slice("viewport", |v| println!("viewport: {v:?}"));
//! editor.set("viewport", "/zoom", json!(2.0)).await?;
//! editor.undo().await?;
//! ```

use std::sync::Arc;

use easel_history::{
    BusSubscription, EventBus, ExecuteOptions, ExecuteOutcome, History, HistoryEvent,
    HistoryEventKind, NotificationSink, SET_PATH, register_builtins,
};
use easel_store::{Frozen, FrozenState, Slice, Snapshot, Store, SubscribeOptions, Subscription};
use serde_json::{Value, json};
use tracing::info;

use crate::config::EditorConfig;
use crate::error::Result;
use crate::harness::{GateEntry, HarnessGate, HarnessReport, HarnessState, run_scenarios};

/// Initial state: every configured slice as an empty map.
#[must_use]
pub fn default_state(config: &EditorConfig) -> FrozenState {
    config
        .state
        .slices
        .iter()
        .map(|name| (name.as_str(), Frozen::map()))
        .collect()
}

/// Store, history, and notifications for one open document.
#[derive(Debug)]
pub struct Editor {
    store: Store,
    history: History,
    bus: Arc<EventBus>,
    config: EditorConfig,
    harness: HarnessGate,
}

impl Default for Editor {
    fn default() -> Self {
        Self::new()
    }
}

impl Editor {
    /// Editor with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::build(EditorConfig::default())
    }

    /// Editor with a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`](crate::ConfigError::Validation)
    /// listing every problem in `config`.
    pub fn with_config(config: EditorConfig) -> Result<Self> {
        Ok(Self::build(config.validated()?))
    }

    fn build(config: EditorConfig) -> Self {
        let store = Store::new(default_state(&config));
        let bus = Arc::new(EventBus::new());
        let sink: Arc<dyn NotificationSink> = bus.clone();
        let mut history = History::with_config(store.clone(), sink, config.history_config());
        register_builtins(&mut history);
        info!(
            slices = config.state.slices.len(),
            max_depth = config.history.max_depth,
            "editor ready"
        );
        Self {
            store,
            history,
            bus,
            config,
            harness: HarnessGate::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Mutable history, for registering commands.
    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    #[must_use]
    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    #[must_use]
    pub fn harness_state(&self) -> HarnessState {
        self.harness.state()
    }

    // ========================================================================
    // Edits
    // ========================================================================

    /// Run a registered command and record it for undo.
    ///
    /// # Errors
    ///
    /// Propagates the history engine's error; the stack is unchanged on failure.
    pub async fn execute(
        &mut self,
        name: &str,
        payload: &Value,
        opts: ExecuteOptions,
    ) -> Result<ExecuteOutcome> {
        Ok(self.history.execute(name, payload, opts).await?)
    }

    /// Undoable write of `value` at `path` inside `slice`.
    ///
    /// # Errors
    ///
    /// Fails if the path cannot be written (for example it crosses a scalar).
    pub async fn set(&mut self, slice: &str, path: &str, value: Value) -> Result<ExecuteOutcome> {
        let payload = json!({ "slice": slice, "path": path, "value": value });
        self.execute(SET_PATH, &payload, ExecuteOptions::default())
            .await
    }

    /// Undo the most recent applied entry. `Ok(false)` when there is none.
    ///
    /// # Errors
    ///
    /// Propagates a failing `undo`; the pointer does not move.
    pub async fn undo(&mut self) -> Result<bool> {
        Ok(self.history.undo().await?)
    }

    /// Redo the next undone entry. `Ok(false)` when there is none.
    ///
    /// # Errors
    ///
    /// Propagates a failing `redo`; the pointer does not move.
    pub async fn redo(&mut self) -> Result<bool> {
        Ok(self.history.redo().await?)
    }

    /// Replace the whole document and start a fresh history.
    ///
    /// This is not undoable; use `state/replace` for an undoable swap.
    pub fn load_project(&mut self, snapshot: Snapshot) {
        self.store.replace(snapshot, "project/load");
        self.history.clear();
        info!(slices = self.store.get_state().len(), "project loaded");
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Call `callback` whenever the named slice changes identity.
    pub fn subscribe_slice(
        &self,
        name: &str,
        callback: impl Fn(&Option<Slice>) + Send + Sync + 'static,
    ) -> Subscription {
        self.store.subscribe(callback, SubscribeOptions::slice(name))
    }

    /// Listen to one kind of history event.
    pub fn on_history(
        &self,
        kind: HistoryEventKind,
        handler: impl Fn(&HistoryEvent) + Send + Sync + 'static,
    ) -> BusSubscription {
        self.bus.on(kind, handler)
    }

    // ========================================================================
    // Self-check
    // ========================================================================

    /// Run the engine self-check on scratch state, once.
    ///
    /// Later calls return the recorded report.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::AlreadyRunning`](crate::HarnessError::AlreadyRunning)
    /// if another call is still in flight.
    pub async fn run_self_check(&self) -> Result<HarnessReport> {
        match self.harness.begin()? {
            GateEntry::Done(report) => Ok(report),
            GateEntry::Run(ticket) => {
                let report = run_scenarios(&self.config.history_config()).await;
                Ok(ticket.finish(report))
            }
        }
    }
}
