#![forbid(unsafe_code)]

//! Easel
//!
//! Editing core for the Easel canvas editor. Re-exports the state store and
//! the undo/redo engine, and adds the [`Editor`] facade that owns one of each
//! together with configuration, logging setup, and a development self-check.
//!
//! # Key Components
//!
//! - [`Editor`] - Store + history + event bus for one open document
//! - [`EditorConfig`] - TOML/JSON configuration with validation
//! - [`logging::init_from_config`] - Process-wide `tracing` subscriber
//! - [`HarnessGate`] - Run-once gate for [`Editor::run_self_check`]
//!
//! # Example
//!
//! ```ignore
//! use easel::prelude::*;
//!
//! let config = EditorConfig::from_toml_file("easel.toml")?;
//! easel::logging::init_from_config(&config);
//! let mut editor = Editor::with_config(config)?;
//! editor.set("tools", "/brush/size", json!(12)).await?;
//! assert!(editor.history().can_undo());
//! ```

pub mod config;
pub mod editor;
pub mod error;
pub mod harness;
pub mod logging;

pub use config::{DEFAULT_SLICES, EditorConfig, HistorySection, LoggingSection, StateSection};
pub use editor::{Editor, default_state};
pub use error::{ConfigError, Error, HarnessError, Result};
pub use harness::{HarnessCheck, HarnessGate, HarnessReport, HarnessState};

pub use easel_history as history;
pub use easel_store as store;

/// Common imports for host code.
pub mod prelude {
    pub use crate::{Editor, EditorConfig, Error, HarnessReport, Result};
    pub use easel_history::{
        Coalesce, CoalesceOptions, Command, CommandContext, CommandError, ExecuteOptions,
        HistoryEvent, HistoryEventKind, async_trait,
    };
    pub use easel_store::{Frozen, FrozenState, Slice, Snapshot, Store, SubscribeOptions};
    pub use serde_json::{Value, json};
}
