#![forbid(unsafe_code)]

//! Generic commands every editor registers.
//!
//! - `state/set`: write one value inside a slice by JSON pointer. Coalescible,
//!   so a slider drag or a brush-size scrub becomes one undo step.
//! - `state/replace`: swap the whole tree, keeping the old one for undo.

use std::any::Any;
use std::time::Duration;

use async_trait::async_trait;
use easel_store::{Frozen, FrozenState, Snapshot};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::trace;

use crate::command::{Coalesce, CoalesceOptions, Command, CommandContext};
use crate::error::CommandError;
use crate::history::History;

/// Registered name of [`SetPathCommand`].
pub const SET_PATH: &str = "state/set";
/// Registered name of [`ReplaceStateCommand`].
pub const REPLACE_STATE: &str = "state/replace";

/// Register the built-in commands, using the history's default window for
/// coalescible ones.
pub fn register_builtins(history: &mut History) {
    let window = history.config().default_window;
    history.register_command(SET_PATH, move |payload: &Value| {
        SetPathCommand::from_payload(payload, window).map(|c| Box::new(c) as Box<dyn Command>)
    });
    history.register_command(REPLACE_STATE, |payload: &Value| {
        ReplaceStateCommand::from_payload(payload).map(|c| Box::new(c) as Box<dyn Command>)
    });
}

// ============================================================================
// state/set
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SetPathPayload {
    slice: String,
    #[serde(default)]
    path: String,
    value: Value,
    #[serde(default)]
    coalesce_key: Option<String>,
    #[serde(default)]
    coalesce_window_ms: Option<u64>,
    #[serde(default)]
    label: Option<String>,
}

/// What the target looked like before the first execute.
#[derive(Debug, Clone)]
enum Prior {
    Value(Frozen),
    /// Shallowest missing ancestor of the path; undo removes it.
    MissingPath(String),
    MissingSlice,
}

/// Set the value at `path` inside `slice`.
///
/// The value the path held before the *first* execute is kept across
/// coalescing, so undoing a merged gesture restores the pre-gesture value.
#[derive(Debug)]
pub struct SetPathCommand {
    slice: String,
    path: String,
    value: Frozen,
    label: String,
    coalesce: CoalesceOptions,
    before: Option<Prior>,
}

impl SetPathCommand {
    /// Build from a `{slice, path, value, coalesceKey?, coalesceWindowMs?, label?}` payload.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidPayload`] if the payload does not match.
    pub fn from_payload(payload: &Value, default_window: Duration) -> Result<Self, CommandError> {
        let p = SetPathPayload::deserialize(payload)?;
        let coalesce = match p.coalesce_key {
            Some(key) => CoalesceOptions::keyed(key).with_window(
                p.coalesce_window_ms
                    .map_or(default_window, Duration::from_millis),
            ),
            None => CoalesceOptions::never(),
        };
        let label = p
            .label
            .unwrap_or_else(|| format!("Set {}{}", p.slice, p.path));
        Ok(Self {
            slice: p.slice,
            path: p.path,
            value: Frozen::from(p.value),
            label,
            coalesce,
            before: None,
        })
    }

    #[must_use]
    pub fn slice(&self) -> &str {
        &self.slice
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Pin a trailing `-` (append) to the concrete index it will occupy, so
    /// undo removes exactly that element.
    fn resolve_append(&mut self, state: &FrozenState) {
        let Some(parent) = self.path.strip_suffix("/-") else {
            return;
        };
        let len = state
            .value(&self.slice)
            .pointer(parent)
            .and_then(Frozen::as_list)
            .map(|items| items.len());
        if let Some(len) = len {
            self.path = format!("{parent}/{len}");
        }
    }
}

#[async_trait]
impl Command for SetPathCommand {
    fn label(&self) -> &str {
        &self.label
    }

    fn meta(&self) -> Value {
        json!({
            "slice": self.slice,
            "path": self.path,
            "value": self.value.thaw(),
        })
    }

    async fn execute(&mut self, ctx: &CommandContext) -> Result<Value, CommandError> {
        let store = ctx.store();
        if self.before.is_none() {
            let state = store.get_state();
            self.resolve_append(&state);
            self.before = Some(if !state.contains(&self.slice) {
                Prior::MissingSlice
            } else {
                let current = state.value(&self.slice);
                match current.pointer(&self.path) {
                    Some(v) => Prior::Value(v.clone()),
                    None => Prior::MissingPath(first_missing(current, &self.path)),
                }
            });
        }
        let value = self.value.clone();
        store.update_slice(
            &self.slice,
            |current| current.set_pointer(&self.path, value),
            SET_PATH,
        )?;
        trace!(slice = %self.slice, path = %self.path, "path set");
        Ok(self.value.thaw())
    }

    async fn undo(&mut self, ctx: &CommandContext) -> Result<(), CommandError> {
        let store = ctx.store();
        match &self.before {
            None => return Err(CommandError::invalid_state("undo before execute")),
            Some(Prior::Value(prior)) => store.update_slice(
                &self.slice,
                |current| current.set_pointer(&self.path, prior.clone()),
                SET_PATH,
            )?,
            Some(Prior::MissingPath(created)) => store.update_slice(
                &self.slice,
                |current| current.remove_pointer(created),
                SET_PATH,
            )?,
            Some(Prior::MissingSlice) => {
                if !store.get_state().contains(&self.slice) {
                    return Err(CommandError::TargetNotFound(format!("slice '{}'", self.slice)));
                }
                store.dispatch::<CommandError>(
                    |state| Ok(state.without_slice(&self.slice)),
                    SET_PATH,
                )?;
            }
        }
        Ok(())
    }

    fn options(&self) -> CoalesceOptions {
        self.coalesce.clone()
    }

    fn as_coalesce(&mut self) -> Option<&mut dyn Coalesce> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The shortest prefix of `path` that does not resolve in `value`.
fn first_missing(value: &Frozen, path: &str) -> String {
    let mut prefix = String::with_capacity(path.len());
    for segment in path.split('/').skip(1) {
        prefix.push('/');
        prefix.push_str(segment);
        if value.pointer(&prefix).is_none() {
            return prefix;
        }
    }
    path.to_string()
}

impl Coalesce for SetPathCommand {
    fn coalesce_with(&mut self, other: &dyn Command) -> bool {
        let Some(other) = other.as_any().downcast_ref::<SetPathCommand>() else {
            return false;
        };
        if other.slice != self.slice || other.path != self.path {
            return false;
        }
        self.value = other.value.clone();
        true
    }
}

// ============================================================================
// state/replace
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplacePayload {
    state: Snapshot,
    #[serde(default)]
    label: Option<String>,
}

/// Replace the whole state tree; undo restores the previous tree.
#[derive(Debug)]
pub struct ReplaceStateCommand {
    next: FrozenState,
    label: String,
    before: Option<FrozenState>,
}

impl ReplaceStateCommand {
    #[must_use]
    pub fn new(next: impl Into<FrozenState>) -> Self {
        Self {
            next: next.into(),
            label: "Replace state".to_string(),
            before: None,
        }
    }

    /// Build from a `{state, label?}` payload.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidPayload`] if the payload does not match.
    pub fn from_payload(payload: &Value) -> Result<Self, CommandError> {
        let p = ReplacePayload::deserialize(payload)?;
        let mut cmd = Self::new(p.state);
        if let Some(label) = p.label {
            cmd.label = label;
        }
        Ok(cmd)
    }
}

#[async_trait]
impl Command for ReplaceStateCommand {
    fn label(&self) -> &str {
        &self.label
    }

    fn meta(&self) -> Value {
        json!({ "slices": self.next.names().collect::<Vec<_>>() })
    }

    async fn execute(&mut self, ctx: &CommandContext) -> Result<Value, CommandError> {
        let store = ctx.store();
        if self.before.is_none() {
            self.before = Some(store.get_state());
        }
        store.replace(self.next.clone(), REPLACE_STATE);
        Ok(Value::Null)
    }

    async fn undo(&mut self, ctx: &CommandContext) -> Result<(), CommandError> {
        let before = self
            .before
            .clone()
            .ok_or_else(|| CommandError::invalid_state("undo before execute"))?;
        ctx.store().replace(before, REPLACE_STATE);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use easel_store::Store;

    fn ctx() -> CommandContext {
        let mut snapshot = Snapshot::new();
        snapshot.insert("viewport", json!({"zoom": 1.0, "x": 0}));
        snapshot.insert("layers", json!([{"id": "bg"}]));
        CommandContext::new(Store::new(snapshot))
    }

    fn set(payload: Value) -> SetPathCommand {
        SetPathCommand::from_payload(&payload, Duration::from_millis(500)).unwrap()
    }

    #[tokio::test]
    async fn set_then_undo_restores_value() {
        let ctx = ctx();
        let mut cmd = set(json!({"slice": "viewport", "path": "/zoom", "value": 2.5}));
        assert_eq!(cmd.label(), "Set viewport/zoom");
        cmd.execute(&ctx).await.unwrap();
        assert_eq!(ctx.store().get_snapshot().slice("viewport"), Some(&json!({"zoom": 2.5, "x": 0})));
        cmd.undo(&ctx).await.unwrap();
        assert_eq!(ctx.store().get_snapshot().slice("viewport"), Some(&json!({"zoom": 1.0, "x": 0})));
    }

    #[tokio::test]
    async fn undo_removes_created_path_and_slice() {
        let ctx = ctx();
        let mut new_key = set(json!({"slice": "viewport", "path": "/rotation", "value": 90}));
        new_key.execute(&ctx).await.unwrap();
        new_key.undo(&ctx).await.unwrap();
        assert_eq!(ctx.store().get_snapshot().slice("viewport"), Some(&json!({"zoom": 1.0, "x": 0})));

        let mut new_slice = set(json!({"slice": "tools", "path": "/active", "value": "brush"}));
        new_slice.execute(&ctx).await.unwrap();
        assert!(ctx.store().get_state().contains("tools"));
        new_slice.undo(&ctx).await.unwrap();
        assert!(!ctx.store().get_state().contains("tools"));
    }

    #[tokio::test]
    async fn undo_removes_created_intermediate_maps() {
        let ctx = ctx();
        let mut cmd = set(json!({"slice": "viewport", "path": "/grid/size", "value": 16}));
        cmd.execute(&ctx).await.unwrap();
        assert_eq!(
            ctx.store().get_snapshot().slice("viewport"),
            Some(&json!({"zoom": 1.0, "x": 0, "grid": {"size": 16}}))
        );
        cmd.undo(&ctx).await.unwrap();
        assert_eq!(ctx.store().get_snapshot().slice("viewport"), Some(&json!({"zoom": 1.0, "x": 0})));
    }

    #[tokio::test]
    async fn append_undo_removes_the_appended_element() {
        let ctx = ctx();
        let mut cmd = set(json!({"slice": "layers", "path": "/-", "value": {"id": "fg"}}));
        cmd.execute(&ctx).await.unwrap();
        assert_eq!(cmd.path(), "/1");
        cmd.undo(&ctx).await.unwrap();
        cmd.redo(&ctx).await.unwrap();
        assert_eq!(
            ctx.store().get_snapshot().slice("layers"),
            Some(&json!([{"id": "bg"}, {"id": "fg"}]))
        );
    }

    #[test]
    fn coalesce_requires_same_target() {
        let mut first = set(json!({"slice": "viewport", "path": "/zoom", "value": 2, "coalesceKey": "zoom"}));
        let same = set(json!({"slice": "viewport", "path": "/zoom", "value": 3, "coalesceKey": "zoom"}));
        let other = set(json!({"slice": "viewport", "path": "/x", "value": 3, "coalesceKey": "zoom"}));
        assert!(!first.coalesce_with(&other));
        assert!(first.coalesce_with(&same));
        assert_eq!(first.meta()["value"], json!(3));
        assert!(!first.coalesce_with(&ReplaceStateCommand::new(Snapshot::new())));
    }

    #[test]
    fn payload_controls_coalescing() {
        let plain = set(json!({"slice": "ui", "value": true}));
        assert!(!plain.options().coalesce);
        let keyed = set(json!({
            "slice": "ui", "path": "/panel", "value": 1,
            "coalesceKey": "panel", "coalesceWindowMs": 80
        }));
        assert_eq!(
            keyed.options(),
            CoalesceOptions::keyed("panel").with_window(Duration::from_millis(80))
        );
    }

    #[test]
    fn bad_payload_is_rejected() {
        let err = SetPathCommand::from_payload(&json!({"path": "/x"}), Duration::ZERO).unwrap_err();
        assert!(matches!(err, CommandError::InvalidPayload(_)));
        let err = ReplaceStateCommand::from_payload(&json!({"state": 3})).unwrap_err();
        assert!(matches!(err, CommandError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn path_errors_propagate_without_change() {
        let ctx = ctx();
        let mut cmd = set(json!({"slice": "viewport", "path": "/zoom/inner", "value": 1}));
        let err = cmd.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, CommandError::Path(_)));
        assert_eq!(ctx.store().version(), 0);
    }

    #[tokio::test]
    async fn replace_round_trip() {
        let ctx = ctx();
        let before = ctx.store().get_snapshot();
        let mut cmd = ReplaceStateCommand::from_payload(&json!({
            "state": {"project": {"name": "imported"}},
            "label": "Import project"
        }))
        .unwrap();
        cmd.execute(&ctx).await.unwrap();
        assert_eq!(ctx.store().get_state().names().collect::<Vec<_>>(), vec!["project"]);
        cmd.undo(&ctx).await.unwrap();
        assert_eq!(ctx.store().get_snapshot(), before);
        assert_eq!(cmd.label(), "Import project");
    }
}
