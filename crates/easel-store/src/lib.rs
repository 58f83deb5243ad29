#![forbid(unsafe_code)]

//! Easel Store
//!
//! The single source of truth for editor state: a tree of named slices that
//! is recursively immutable once published.
//!
//! # Key Components
//!
//! - [`Store`] - Live state container with atomic `dispatch` / `update_slice` / `replace`
//! - [`FrozenState`] - Published tree; untouched slices keep their identity across writes
//! - [`Slice`] - One shared, immutable slice value
//! - [`Frozen`] - Persistent value type that slices are built from
//! - [`Snapshot`] - Detached, mutable deep copy for export and import
//! - [`SubscribeOptions`] / [`Subscription`] - Selector-based change listeners
//!
//! # How it fits in the system
//! `easel-history` drives all undoable edits through this crate's write
//! entry points. UI code reads with `get_state` and reacts through
//! `subscribe`.

pub mod frozen;
pub mod state;
pub mod store;
pub mod subscription;

pub use frozen::{Frozen, PathError};
pub use state::{FrozenState, Slice, Snapshot, UpdateMeta};
pub use store::Store;
pub use subscription::{SubscribeOptions, Subscription};
