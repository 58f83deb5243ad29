#![forbid(unsafe_code)]

//! Easel History
//!
//! Undo/redo for the editor: named command factories, an ordered stack of
//! reversible entries, and time-windowed coalescing that folds a continuous
//! gesture (a brush stroke, a slider drag) into one undo step.
//!
//! # Key Components
//!
//! - [`History`] - The engine: `execute`, `undo`, `redo`, stack read models
//! - [`Command`] - Async, reversible edit produced by a factory
//! - [`Coalesce`] - Optional capability for merging same-gesture commands
//! - [`EventBus`] - In-process sink for `history:*` notifications
//! - [`commands`] - Built-in `state/set` and `state/replace`
//!
//! # Example
//!
//! ```ignore
//! let mut history = History::new(store, Arc::new(EventBus::new()));
//! register_builtins(&mut history);
//! history
//!     .execute("state/set", &json!({"slice": "viewport", "path": "/zoom", "value": 2.0}), ExecuteOptions::default())
//!     .await?;
//! history.undo().await?;
//! ```

pub mod clock;
pub mod command;
pub mod commands;
pub mod error;
pub mod events;
pub mod history;
pub mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{
    Coalesce, CoalesceOptions, Command, CommandContext, CommandFactory, DEFAULT_COALESCE_WINDOW,
    ExecuteOptions,
};
pub use commands::{REPLACE_STATE, ReplaceStateCommand, SET_PATH, SetPathCommand, register_builtins};
pub use error::{CommandError, HistoryError, Phase};
pub use events::{
    BusSubscription, EventBus, HistoryEvent, HistoryEventKind, NotificationSink, NullSink,
};
pub use history::{EntrySummary, ExecuteOutcome, History, HistoryConfig};
pub use registry::CommandRegistry;

pub use async_trait::async_trait;
