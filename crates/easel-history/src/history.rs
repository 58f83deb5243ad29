#![forbid(unsafe_code)]

//! The command history engine.
//!
//! [`History`] owns a registry of command factories, an ordered stack of
//! executed entries, and a pointer to the last applied entry.
//!
//! - **Execute**: instantiate, run against the store, then merge into the
//!   top entry or push a new one
//! - **Branching**: pushing after an undo truncates the redo tail
//! - **Coalescing**: same-gesture commands inside the time window collapse
//!   into one entry
//! - **Depth limit**: oldest entries are evicted past `max_depth`
//!
//! # Invariants
//!
//! 1. `pointer` is `None` or `< len()`.
//! 2. `len() <= config.max_depth` after every operation.
//! 3. A failed `execute` pushes nothing; a failed `undo` / `redo` leaves the
//!    pointer where it was.
//! 4. Exactly one notification is emitted per successful `execute`, `undo`,
//!    or `redo`, after the stack and pointer are updated.
//!
//! ```text
//! execute(a) execute(b) execute(c)
//!   [a, b, c]   pointer = 2
//!
//! undo() x2
//!   [a, b, c]   pointer = 0      (b, c are the redo tail)
//!
//! execute(d)  <-- new branch, truncates the redo tail
//!   [a, d]      pointer = 1
//! ```
//!
//! # Concurrency
//!
//! Every operation takes `&mut self`, so a second operation cannot start
//! while one is still awaiting a command's lifecycle future.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use easel_store::Store;
use serde::Serialize;
use serde_json::Value;
use tracing::{Instrument, debug, info_span, warn};
use web_time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::command::{
    CoalesceOptions, Command, CommandContext, CommandFactory, DEFAULT_COALESCE_WINDOW,
    ExecuteOptions,
};
use crate::error::{CommandError, HistoryError, Phase};
use crate::events::{HistoryEvent, HistoryEventKind, NotificationSink};
use crate::registry::CommandRegistry;

/// Configuration for the history engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Maximum number of entries kept; the oldest are evicted first.
    pub max_depth: usize,
    /// Coalescing window handed to the built-in commands.
    pub default_window: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_depth: 100,
            default_window: DEFAULT_COALESCE_WINDOW,
        }
    }
}

impl HistoryConfig {
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_default_window(mut self, window: Duration) -> Self {
        self.default_window = window;
        self
    }

    /// Create unlimited configuration (for testing).
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_depth: usize::MAX,
            ..Self::default()
        }
    }
}

/// One stacked, reversible edit.
struct Entry {
    /// Registered command name the entry was created from.
    name: String,
    label: String,
    /// Coalescing key the entry was pushed with.
    key: Option<String>,
    command: Box<dyn Command>,
    revisions: u32,
    last_touched_at: Instant,
}

/// Read-only view of one history entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySummary {
    pub label: String,
    pub meta: Value,
    pub revisions: u32,
}

/// Result of a successful [`History::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteOutcome {
    /// Pointer after the operation.
    pub pointer: Option<usize>,
    /// Whether the command was merged into the existing top entry.
    pub merged: bool,
    /// Revision count of the entry that now holds the edit.
    pub revisions: u32,
    /// Value returned by the command's `execute`.
    pub output: Value,
}

/// Undo/redo stack with a named command registry.
pub struct History {
    ctx: CommandContext,
    registry: CommandRegistry,
    entries: VecDeque<Entry>,
    pointer: Option<usize>,
    config: HistoryConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("len", &self.entries.len())
            .field("pointer", &self.pointer)
            .field("commands", &self.registry.len())
            .field("config", &self.config)
            .finish()
    }
}

impl History {
    /// Create an empty history driving `store` and reporting to `sink`.
    #[must_use]
    pub fn new(store: Store, sink: Arc<dyn NotificationSink>) -> Self {
        Self::with_config(store, sink, HistoryConfig::default())
    }

    #[must_use]
    pub fn with_config(store: Store, sink: Arc<dyn NotificationSink>, config: HistoryConfig) -> Self {
        Self {
            ctx: CommandContext::new(store),
            registry: CommandRegistry::new(),
            entries: VecDeque::new(),
            pointer: None,
            config,
            clock: Arc::new(SystemClock),
            sink,
        }
    }

    /// Replace the time source used for coalescing windows.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Register a command factory. Returns `false` if `name` was already
    /// registered; the existing factory is kept.
    pub fn register_command<F>(&mut self, name: impl Into<String>, factory: F) -> bool
    where
        F: Fn(&Value) -> Result<Box<dyn Command>, CommandError> + Send + Sync + 'static,
    {
        self.registry.register(name, factory)
    }

    /// Register an already shared factory.
    pub fn register_shared(&mut self, name: impl Into<String>, factory: CommandFactory) -> bool {
        self.registry.register_shared(name, factory)
    }

    #[must_use]
    pub fn has_command(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Registered command names, sorted.
    #[must_use]
    pub fn registered_commands(&self) -> Vec<&str> {
        self.registry.names()
    }

    // ========================================================================
    // Core Operations
    // ========================================================================

    /// Create the command `name` from `payload`, run it, and record it.
    ///
    /// # Errors
    ///
    /// - [`HistoryError::UnknownCommand`] if `name` is not registered.
    /// - [`HistoryError::Command`] if the factory or `execute` fails; the
    ///   stack is untouched.
    pub async fn execute(
        &mut self,
        name: &str,
        payload: &Value,
        opts: ExecuteOptions,
    ) -> Result<ExecuteOutcome, HistoryError> {
        let span = info_span!("history.execute", command = name);
        self.execute_inner(name, payload, opts).instrument(span).await
    }

    async fn execute_inner(
        &mut self,
        name: &str,
        payload: &Value,
        opts: ExecuteOptions,
    ) -> Result<ExecuteOutcome, HistoryError> {
        let Some(created) = self.registry.create(name, payload) else {
            warn!(command = name, "execute called with unknown command");
            return Err(HistoryError::UnknownCommand(name.to_string()));
        };
        let mut command = created.map_err(|source| fail(name, Phase::Create, source))?;

        let options = opts.coalesce.unwrap_or_else(|| command.options());
        let label = opts.label.unwrap_or_else(|| command.label().to_string());

        let output = command
            .execute(&self.ctx)
            .await
            .map_err(|source| fail(name, Phase::Execute, source))?;

        let now = self.clock.now();
        if let Some(revisions) = self.try_coalesce(&*command, &options, now) {
            debug!(label = %label, revisions, pointer = ?self.pointer, "command coalesced");
            self.emit(HistoryEventKind::Execute);
            return Ok(ExecuteOutcome {
                pointer: self.pointer,
                merged: true,
                revisions,
                output,
            });
        }

        self.truncate_redo_tail();
        self.entries.push_back(Entry {
            name: name.to_string(),
            label,
            key: options.key,
            command,
            revisions: 1,
            last_touched_at: now,
        });
        self.pointer = Some(self.entries.len() - 1);
        self.enforce_limits();

        debug!(
            command = name,
            pointer = ?self.pointer,
            undo_depth = self.entries.len(),
            "command pushed"
        );
        self.emit(HistoryEventKind::Execute);
        Ok(ExecuteOutcome {
            pointer: self.pointer,
            merged: false,
            revisions: 1,
            output,
        })
    }

    /// Reverse the entry at the pointer.
    ///
    /// Returns `Ok(false)` when there is nothing to undo.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Command`] if the command's `undo` fails; the
    /// pointer is not moved.
    pub async fn undo(&mut self) -> Result<bool, HistoryError> {
        let Some(index) = self.pointer else {
            return Ok(false);
        };
        let entry = &mut self.entries[index];
        let span = info_span!("history.undo", label = %entry.label, pointer = index);
        if let Err(source) = entry.command.undo(&self.ctx).instrument(span).await {
            warn!(label = %entry.label, error = %source, "undo failed; pointer unchanged");
            return Err(fail(&entry.name, Phase::Undo, source));
        }
        self.pointer = index.checked_sub(1);
        debug!(pointer = ?self.pointer, "undo applied");
        self.emit(HistoryEventKind::Undo);
        Ok(true)
    }

    /// Re-apply the entry after the pointer.
    ///
    /// Returns `Ok(false)` when there is nothing to redo.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Command`] if the command's `redo` fails; the
    /// pointer is not moved.
    pub async fn redo(&mut self) -> Result<bool, HistoryError> {
        let index = self.pointer.map_or(0, |p| p + 1);
        let Some(entry) = self.entries.get_mut(index) else {
            return Ok(false);
        };
        let span = info_span!("history.redo", label = %entry.label, pointer = index);
        if let Err(source) = entry.command.redo(&self.ctx).instrument(span).await {
            warn!(label = %entry.label, error = %source, "redo failed; pointer unchanged");
            return Err(fail(&entry.name, Phase::Redo, source));
        }
        self.pointer = Some(index);
        debug!(pointer = ?self.pointer, "redo applied");
        self.emit(HistoryEventKind::Redo);
        Ok(true)
    }

    /// Check if undo is available.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.pointer.is_some()
    }

    /// Check if redo is available.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.pointer.map_or(0, |p| p + 1) < self.entries.len()
    }

    // ========================================================================
    // Info
    // ========================================================================

    /// Number of entries, including the redo tail.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the last applied entry; `None` when nothing is applied.
    #[must_use]
    pub fn pointer(&self) -> Option<usize> {
        self.pointer
    }

    /// Ordered read model of the stack, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<EntrySummary> {
        self.entries
            .iter()
            .map(|e| EntrySummary {
                label: e.label.clone(),
                meta: e.command.meta(),
                revisions: e.revisions,
            })
            .collect()
    }

    /// Label of the entry `undo` would reverse.
    #[must_use]
    pub fn undo_label(&self) -> Option<&str> {
        self.pointer
            .and_then(|p| self.entries.get(p))
            .map(|e| e.label.as_str())
    }

    /// Label of the entry `redo` would re-apply.
    #[must_use]
    pub fn redo_label(&self) -> Option<&str> {
        self.entries
            .get(self.pointer.map_or(0, |p| p + 1))
            .map(|e| e.label.as_str())
    }

    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// The store commands run against.
    #[must_use]
    pub fn store(&self) -> &Store {
        self.ctx.store()
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop every entry without undoing anything.
    ///
    /// The store keeps whatever state the applied entries produced.
    pub fn clear(&mut self) {
        let dropped = self.entries.len();
        self.entries.clear();
        self.pointer = None;
        debug!(dropped, "history cleared");
    }

    fn truncate_redo_tail(&mut self) {
        let keep = self.pointer.map_or(0, |p| p + 1);
        if keep < self.entries.len() {
            debug!(
                dropped = self.entries.len() - keep,
                "new branch; redo tail discarded"
            );
            self.entries.truncate(keep);
        }
    }

    /// Evict the oldest entries until the depth limit holds.
    fn enforce_limits(&mut self) {
        while self.entries.len() > self.config.max_depth {
            if self.entries.pop_front().is_none() {
                break;
            }
            self.pointer = self.pointer.and_then(|p| p.checked_sub(1));
        }
    }

    /// Merge `incoming` into the top entry if the coalescing rules allow it.
    ///
    /// Returns the entry's new revision count on success.
    fn try_coalesce(
        &mut self,
        incoming: &dyn Command,
        options: &CoalesceOptions,
        now: Instant,
    ) -> Option<u32> {
        if !options.coalesce {
            return None;
        }
        // Only the applied top entry is a candidate; an undone one is not.
        let top = self.pointer?;
        if top + 1 != self.entries.len() {
            return None;
        }
        let entry = self.entries.back_mut()?;
        if entry.key != options.key {
            return None;
        }
        if now.saturating_duration_since(entry.last_touched_at) > options.window {
            return None;
        }
        if !entry.command.as_coalesce()?.coalesce_with(incoming) {
            return None;
        }
        entry.revisions += 1;
        entry.last_touched_at = now;
        Some(entry.revisions)
    }

    fn emit(&self, kind: HistoryEventKind) {
        self.sink.emit(&HistoryEvent::new(kind, self.pointer));
    }
}

fn fail(command: &str, phase: Phase, source: CommandError) -> HistoryError {
    HistoryError::Command {
        command: command.to_string(),
        phase,
        source,
    }
}

// ============================================================================
// Tests
// ============================================================================
