#![forbid(unsafe_code)]

//! State tree, slices, and detached snapshots.
//!
//! The live tree is a [`FrozenState`]: a persistent map from slice name to
//! [`Slice`]. Each slice is an `Arc<Frozen>`, so "did this slice change?" is
//! a pointer comparison. A [`Snapshot`] is the opposite: a plain, owned,
//! mutable copy that shares nothing with the live tree.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use im::OrdMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::frozen::{Frozen, NULL};

/// One named, independently updatable partition of the state tree.
///
/// Equality is identity first, then deep value equality. The store
/// reconciles value-equal slices to the previous `Arc` on publish, so two
/// slices read from consecutive states compare equal exactly when they are
/// the same allocation.
#[derive(Clone)]
pub struct Slice(Arc<Frozen>);

impl Slice {
    #[must_use]
    pub fn new(value: impl Into<Frozen>) -> Self {
        Self(Arc::new(value.into()))
    }

    /// Identity comparison (same allocation).
    #[must_use]
    pub fn same(a: &Slice, b: &Slice) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    #[must_use]
    pub fn value(&self) -> &Frozen {
        &self.0
    }
}

impl Deref for Slice {
    type Target = Frozen;

    fn deref(&self) -> &Frozen {
        &self.0
    }
}

impl PartialEq for Slice {
    fn eq(&self, other: &Self) -> bool {
        Self::same(self, other) || *self.0 == *other.0
    }
}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl From<Frozen> for Slice {
    fn from(value: Frozen) -> Self {
        Self(Arc::new(value))
    }
}

impl Serialize for Slice {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// The recursively immutable state tree published by the store.
///
/// Cloning is O(1). Edits return new trees that share every untouched
/// slice with the original.
#[derive(Clone, Default, PartialEq)]
pub struct FrozenState {
    slices: OrdMap<Arc<str>, Slice>,
}

impl FrozenState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn slice(&self, name: &str) -> Option<&Slice> {
        self.slices.get(name)
    }

    /// Value of a slice, or `Null` when the slice does not exist.
    #[must_use]
    pub fn value(&self, name: &str) -> &Frozen {
        self.slices.get(name).map_or(&NULL, Slice::value)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.slices.contains_key(name)
    }

    /// Return a tree with `name` set to `value`; all other slices are shared.
    #[must_use]
    pub fn with_slice(&self, name: &str, value: impl Into<Slice>) -> Self {
        Self {
            slices: self.slices.update(Arc::from(name), value.into()),
        }
    }

    #[must_use]
    pub fn without_slice(&self, name: &str) -> Self {
        Self {
            slices: self.slices.without(name),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slices.keys().map(|k| &**k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Slice)> {
        self.slices.iter().map(|(k, v)| (&**k, v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Detached deep copy of the whole tree.
    #[must_use]
    pub fn thaw(&self) -> Snapshot {
        Snapshot {
            slices: self
                .slices
                .iter()
                .map(|(k, v)| (k.to_string(), v.thaw()))
                .collect(),
        }
    }

    /// Swap every slice that is value-equal to its predecessor for the
    /// predecessor's allocation.
    ///
    /// Returns the reconciled tree and the names whose identity changed
    /// (including removed slices).
    pub(crate) fn reconcile(self, previous: &FrozenState) -> (FrozenState, Vec<Arc<str>>) {
        let mut changed = Vec::new();
        let slices = self
            .slices
            .into_iter()
            .map(|(name, slice)| match previous.slices.get(&name) {
                Some(prev) if Slice::same(prev, &slice) => (name, slice),
                Some(prev) if prev.value() == slice.value() => (name, prev.clone()),
                _ => {
                    changed.push(name.clone());
                    (name, slice)
                }
            })
            .collect::<OrdMap<_, _>>();
        changed.extend(
            previous
                .slices
                .keys()
                .filter(|name| !slices.contains_key(*name))
                .cloned(),
        );
        (FrozenState { slices }, changed)
    }
}

impl fmt::Debug for FrozenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.slices.iter()).finish()
    }
}

impl Serialize for FrozenState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.slices.iter().map(|(k, v)| (&**k, v)))
    }
}

impl<K: AsRef<str>, V: Into<Frozen>> FromIterator<(K, V)> for FrozenState {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            slices: iter
                .into_iter()
                .map(|(k, v)| (Arc::from(k.as_ref()), Slice::new(v)))
                .collect(),
        }
    }
}

/// A fully detached, mutable copy of the state tree.
///
/// Mutating a snapshot never affects the store or any other snapshot.
/// Snapshots serialize as a plain JSON object keyed by slice name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    slices: BTreeMap<String, Value>,
}

impl Snapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn slice(&self, name: &str) -> Option<&Value> {
        self.slices.get(name)
    }

    pub fn slice_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.slices.get_mut(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.slices.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.slices.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slices.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.slices.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.slices
    }

    /// Freeze this snapshot into a publishable tree, consuming it.
    #[must_use]
    pub fn into_state(self) -> FrozenState {
        self.slices.into_iter().collect()
    }
}

impl From<BTreeMap<String, Value>> for Snapshot {
    fn from(slices: BTreeMap<String, Value>) -> Self {
        Self { slices }
    }
}

impl From<Snapshot> for FrozenState {
    fn from(snapshot: Snapshot) -> Self {
        snapshot.into_state()
    }
}

impl FromIterator<(String, Value)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            slices: iter.into_iter().collect(),
        }
    }
}

/// Bookkeeping attached to every store write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateMeta {
    /// Short action name, e.g. `"layers/add"`.
    pub action: String,
}

impl UpdateMeta {
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
        }
    }
}

impl From<&str> for UpdateMeta {
    fn from(action: &str) -> Self {
        Self::new(action)
    }
}

impl From<String> for UpdateMeta {
    fn from(action: String) -> Self {
        Self { action }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> FrozenState {
        FrozenState::new()
            .with_slice("layers", Frozen::from(json!([{"id": "bg"}])))
            .with_slice("viewport", Frozen::from(json!({"zoom": 1.0})))
    }

    #[test]
    fn with_slice_shares_other_slices() {
        let state = sample();
        let next = state.with_slice("viewport", Frozen::from(json!({"zoom": 2.0})));
        assert!(Slice::same(
            state.slice("layers").unwrap(),
            next.slice("layers").unwrap()
        ));
        assert!(!Slice::same(
            state.slice("viewport").unwrap(),
            next.slice("viewport").unwrap()
        ));
    }

    #[test]
    fn value_of_missing_slice_is_null() {
        assert!(sample().value("tools").is_null());
        assert!(!sample().contains("tools"));
    }

    #[test]
    fn reconcile_restores_identity_for_equal_values() {
        let state = sample();
        let rebuilt = state
            .with_slice("layers", Frozen::from(json!([{"id": "bg"}])))
            .with_slice("viewport", Frozen::from(json!({"zoom": 3.0})));
        let (next, changed) = rebuilt.reconcile(&state);
        assert!(Slice::same(
            state.slice("layers").unwrap(),
            next.slice("layers").unwrap()
        ));
        assert_eq!(changed, vec![Arc::<str>::from("viewport")]);
    }

    #[test]
    fn reconcile_reports_removed_and_added_slices() {
        let state = sample();
        let next = state.without_slice("layers").with_slice("ui", Frozen::map());
        let (_, mut changed) = next.reconcile(&state);
        changed.sort();
        assert_eq!(
            changed,
            vec![Arc::<str>::from("layers"), Arc::<str>::from("ui")]
        );
    }

    #[test]
    fn snapshot_is_detached() {
        let state = sample();
        let mut snap = state.thaw();
        *snap.slice_mut("viewport").unwrap() = json!({"zoom": 8.0});
        snap.remove("layers");
        assert_eq!(state.value("viewport").thaw(), json!({"zoom": 1.0}));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn snapshot_round_trips_through_serde() {
        let snap = sample().thaw();
        let text = serde_json::to_string(&snap).unwrap();
        let back: Snapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.into_state(), sample());
    }

    #[test]
    fn slice_equality_is_identity_or_value() {
        let a = Slice::new(Frozen::from(json!({"x": 1})));
        let b = Slice::new(Frozen::from(json!({"x": 1})));
        assert_eq!(a, b);
        assert!(!Slice::same(&a, &b));
        assert!(Slice::same(&a, &a.clone()));
    }
}
