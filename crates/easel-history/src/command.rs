#![forbid(unsafe_code)]

//! Command descriptors: the reversible edits the history engine stores.
//!
//! A factory registered under a name turns a JSON payload into a boxed
//! [`Command`]. The engine runs `execute` once, keeps the command in a
//! history entry, and later calls `undo` / `redo` on the same instance.
//!
//! # Invariants
//!
//! - `execute()` followed by `undo()` restores the prior store state.
//! - `undo()` followed by `redo()` restores the executed state.
//! - A command that generates identifiers (new layer ids, asset keys) keeps
//!   them in its own fields on first `execute` and reuses them on `redo`, so
//!   redo reproduces the same artifact rather than a fresh one.
//!
//! # Failure Modes
//!
//! - **Stale target**: the slice or element was removed by a later,
//!   non-history write. Mitigation: look targets up in `undo` and return
//!   [`CommandError::TargetNotFound`] instead of guessing.
//! - **Partial effect**: a command that performs several store writes and
//!   fails midway has to roll back its own earlier writes before returning
//!   the error; the engine only guarantees its own stack stays consistent.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use easel_store::Store;
use serde_json::Value;

use crate::error::CommandError;

/// Default coalescing window, matching a typical drag-event cadence.
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(500);

/// Collaborators available to a running command.
///
/// Commands that need more than the store close over it in their factory.
#[derive(Debug, Clone)]
pub struct CommandContext {
    store: Store,
}

impl CommandContext {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }
}

/// Coalescing policy of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalesceOptions {
    /// Whether this command may merge into the previous entry at all.
    pub coalesce: bool,
    /// Gesture key; only entries pushed with an equal key are candidates.
    pub key: Option<String>,
    /// Maximum time since the candidate entry was last touched.
    pub window: Duration,
}

impl Default for CoalesceOptions {
    fn default() -> Self {
        Self {
            coalesce: false,
            key: None,
            window: DEFAULT_COALESCE_WINDOW,
        }
    }
}

impl CoalesceOptions {
    /// Options that never merge.
    #[must_use]
    pub fn never() -> Self {
        Self::default()
    }

    /// Merge with entries carrying the same `key`.
    #[must_use]
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            coalesce: true,
            key: Some(key.into()),
            window: DEFAULT_COALESCE_WINDOW,
        }
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Optional capability: absorb a newer command of the same gesture.
pub trait Coalesce {
    /// Merge `other` into `self`.
    ///
    /// `other` has already executed against the store. Return `true` only if
    /// `self` now represents both edits, so that undoing `self` reverses the
    /// whole gesture; returning `false` makes the engine push `other` as its
    /// own entry.
    fn coalesce_with(&mut self, other: &dyn Command) -> bool;
}

/// A reversible edit produced by a command factory.
///
/// Lifecycle methods may suspend; the engine awaits each one to completion
/// before touching its stack.
#[async_trait]
pub trait Command: Send + Sync {
    /// Human-readable description for UI display (e.g. "Add layer").
    fn label(&self) -> &str;

    /// Caller-facing bookkeeping shown in stack listings.
    fn meta(&self) -> Value {
        Value::Null
    }

    /// Apply the edit. The returned value is handed back to the caller of
    /// [`History::execute`](crate::History::execute).
    async fn execute(&mut self, ctx: &CommandContext) -> Result<Value, CommandError>;

    /// Reverse the edit.
    async fn undo(&mut self, ctx: &CommandContext) -> Result<(), CommandError>;

    /// Re-apply the edit after an undo.
    async fn redo(&mut self, ctx: &CommandContext) -> Result<(), CommandError> {
        self.execute(ctx).await.map(drop)
    }

    /// Coalescing policy; commands never merge unless they override this.
    fn options(&self) -> CoalesceOptions {
        CoalesceOptions::default()
    }

    /// The coalescing capability, if this command has one.
    fn as_coalesce(&mut self) -> Option<&mut dyn Coalesce> {
        None
    }

    /// Downcast to the concrete type inside `coalesce_with`.
    fn as_any(&self) -> &dyn Any;
}

impl fmt::Debug for dyn Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("label", &self.label())
            .field("options", &self.options())
            .finish_non_exhaustive()
    }
}

/// Builds a command from its payload.
pub type CommandFactory =
    Arc<dyn Fn(&Value) -> Result<Box<dyn Command>, CommandError> + Send + Sync>;

/// Per-call overrides for [`History::execute`](crate::History::execute).
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Replace the command's own label in the history entry.
    pub label: Option<String>,
    /// Replace the command's own coalescing policy.
    pub coalesce: Option<CoalesceOptions>,
}

impl ExecuteOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_coalesce(mut self, coalesce: CoalesceOptions) -> Self {
        self.coalesce = Some(coalesce);
        self
    }
}
