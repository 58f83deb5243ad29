#![forbid(unsafe_code)]

//! Recursively immutable, persistent values.
//!
//! [`Frozen`] is the published form of every slice in the store. It is built
//! by consuming a mutable [`serde_json::Value`] (the builder form) and can be
//! turned back into a fresh, detached `Value` with [`Frozen::thaw`].
//!
//! Lists are backed by [`im::Vector`] and maps by [`im::OrdMap`], so cloning a
//! `Frozen` is O(1) and the persistent edit operations (`with_key`,
//! `set_pointer`, ...) share every untouched branch with the original.
//!
//! # Invariants
//!
//! 1. No method hands out `&mut` access to any nested value.
//! 2. Every edit operation returns a new value; `self` is never changed.
//! 3. `Frozen::from(v).thaw() == v` for every finite JSON value `v`.
//!
//! # Paths
//!
//! Path arguments use JSON pointer syntax (RFC 6901): `""` addresses the
//! value itself, `"/layers/0/name"` walks map keys and list indices, and
//! `~1` / `~0` escape `/` and `~`. A final `-` token appends to a list.

use std::fmt;
use std::sync::Arc;

use im::{OrdMap, Vector};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::{Map, Number, Value};

/// A recursively immutable JSON-like value with structural sharing.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Frozen {
    /// Absent or explicit null.
    #[default]
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Integer or finite float.
    Number(Number),
    /// Shared string.
    String(Arc<str>),
    /// Persistent ordered list.
    List(Vector<Frozen>),
    /// Persistent ordered map.
    Map(OrdMap<Arc<str>, Frozen>),
}

/// Shared null returned by lookups that miss.
pub(crate) static NULL: Frozen = Frozen::Null;

/// Errors raised by path-based edits on a [`Frozen`] value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The path is not a valid JSON pointer.
    InvalidPointer(String),
    /// A path segment tried to descend into a scalar.
    NotAContainer { path: String },
    /// A list index was past the end of the list.
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPointer(p) => write!(f, "invalid JSON pointer '{p}'"),
            Self::NotAContainer { path } => {
                write!(f, "value at '{path}' is not a list or map")
            }
            Self::IndexOutOfBounds { path, index, len } => {
                write!(f, "index {index} out of bounds at '{path}' (length {len})")
            }
        }
    }
}

impl std::error::Error for PathError {}

impl Frozen {
    /// An empty map.
    #[must_use]
    pub fn map() -> Self {
        Self::Map(OrdMap::new())
    }

    /// An empty list.
    #[must_use]
    pub fn list() -> Self {
        Self::List(Vector::new())
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&Vector<Frozen>> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&OrdMap<Arc<str>, Frozen>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Number of entries for lists and maps, zero for everything else.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::List(items) => items.len(),
            Self::Map(entries) => entries.len(),
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a key in a map value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Frozen> {
        self.as_map()?.get(key)
    }

    /// Look up an index in a list value.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<&Frozen> {
        self.as_list()?.get(index)
    }

    /// Resolve a JSON pointer against this value.
    #[must_use]
    pub fn pointer(&self, path: &str) -> Option<&Frozen> {
        let tokens = parse_pointer(path).ok()?;
        let mut current = self;
        for token in &tokens {
            current = match current {
                Self::Map(entries) => entries.get(token.as_str())?,
                Self::List(items) => items.get(token.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Return a copy of this map with `key` set to `value`.
    ///
    /// A `Null` receiver is treated as an empty map.
    pub fn with_key(&self, key: &str, value: impl Into<Frozen>) -> Result<Frozen, PathError> {
        match self {
            Self::Map(entries) => Ok(Self::Map(entries.update(Arc::from(key), value.into()))),
            Self::Null => Ok(Self::Map(OrdMap::unit(Arc::from(key), value.into()))),
            _ => Err(PathError::NotAContainer {
                path: String::new(),
            }),
        }
    }

    /// Return a copy of this map without `key`. Non-maps are returned unchanged.
    #[must_use]
    pub fn without_key(&self, key: &str) -> Frozen {
        match self {
            Self::Map(entries) => Self::Map(entries.without(key)),
            other => other.clone(),
        }
    }

    /// Return a copy of this list with `value` appended.
    ///
    /// A `Null` receiver is treated as an empty list.
    pub fn pushed(&self, value: impl Into<Frozen>) -> Result<Frozen, PathError> {
        match self {
            Self::List(items) => {
                let mut items = items.clone();
                items.push_back(value.into());
                Ok(Self::List(items))
            }
            Self::Null => Ok(Self::List(Vector::unit(value.into()))),
            _ => Err(PathError::NotAContainer {
                path: String::new(),
            }),
        }
    }

    /// Return a copy with the value at `path` replaced by `value`.
    ///
    /// Missing map keys along the way are created; `Null` intermediate
    /// values become maps. Untouched siblings are shared with `self`.
    pub fn set_pointer(&self, path: &str, value: impl Into<Frozen>) -> Result<Frozen, PathError> {
        let tokens = parse_pointer(path)?;
        set_at(self, &tokens, 0, value.into())
    }

    /// Return a copy with the value at `path` removed.
    ///
    /// Removing a path that does not exist is a no-op. Removing the empty
    /// path yields `Null`.
    pub fn remove_pointer(&self, path: &str) -> Result<Frozen, PathError> {
        let tokens = parse_pointer(path)?;
        if tokens.is_empty() {
            return Ok(Self::Null);
        }
        remove_at(self, &tokens, 0)
    }

    /// Produce a detached, fully mutable deep copy.
    #[must_use]
    pub fn thaw(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.to_string()),
            Self::List(items) => Value::Array(items.iter().map(Frozen::thaw).collect()),
            Self::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.thaw()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }

    /// Cheap identity check for container values.
    ///
    /// Returns `true` when both values are the same persistent node, which
    /// implies equality without walking the structure.
    #[must_use]
    pub fn ptr_eq(&self, other: &Frozen) -> bool {
        match (self, other) {
            (Self::List(a), Self::List(b)) => a.ptr_eq(b),
            (Self::Map(a), Self::Map(b)) => a.ptr_eq(b),
            (Self::String(a), Self::String(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

fn parse_pointer(path: &str) -> Result<Vec<String>, PathError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PathError::InvalidPointer(path.to_string()));
    };
    Ok(rest
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn prefix(tokens: &[String], depth: usize) -> String {
    tokens[..depth].iter().fold(String::new(), |mut acc, t| {
        acc.push('/');
        acc.push_str(t);
        acc
    })
}

fn set_at(node: &Frozen, tokens: &[String], depth: usize, value: Frozen) -> Result<Frozen, PathError> {
    let Some(token) = tokens.get(depth) else {
        return Ok(value);
    };
    match node {
        Frozen::Map(entries) => {
            let child = entries.get(token.as_str()).unwrap_or(&NULL);
            let next = set_at(child, tokens, depth + 1, value)?;
            Ok(Frozen::Map(entries.update(Arc::from(token.as_str()), next)))
        }
        Frozen::Null => {
            let next = set_at(&NULL, tokens, depth + 1, value)?;
            Ok(Frozen::Map(OrdMap::unit(Arc::from(token.as_str()), next)))
        }
        Frozen::List(items) => {
            let len = items.len();
            let index = if token == "-" {
                len
            } else {
                token
                    .parse::<usize>()
                    .map_err(|_| PathError::InvalidPointer(prefix(tokens, depth + 1)))?
            };
            if index > len {
                return Err(PathError::IndexOutOfBounds {
                    path: prefix(tokens, depth),
                    index,
                    len,
                });
            }
            let child = items.get(index).unwrap_or(&NULL);
            let next = set_at(child, tokens, depth + 1, value)?;
            let mut items = items.clone();
            if index == len {
                items.push_back(next);
            } else {
                items.set(index, next);
            }
            Ok(Frozen::List(items))
        }
        _ => Err(PathError::NotAContainer {
            path: prefix(tokens, depth),
        }),
    }
}

fn remove_at(node: &Frozen, tokens: &[String], depth: usize) -> Result<Frozen, PathError> {
    let token = &tokens[depth];
    let last = depth + 1 == tokens.len();
    match node {
        Frozen::Map(entries) => {
            if last {
                return Ok(Frozen::Map(entries.without(token.as_str())));
            }
            match entries.get(token.as_str()) {
                Some(child) => {
                    let next = remove_at(child, tokens, depth + 1)?;
                    Ok(Frozen::Map(entries.update(Arc::from(token.as_str()), next)))
                }
                None => Ok(node.clone()),
            }
        }
        Frozen::List(items) => {
            let Ok(index) = token.parse::<usize>() else {
                return Err(PathError::InvalidPointer(prefix(tokens, depth + 1)));
            };
            if index >= items.len() {
                return Ok(node.clone());
            }
            let mut items = items.clone();
            if last {
                items.remove(index);
            } else {
                let next = remove_at(&items[index], tokens, depth + 1)?;
                items.set(index, next);
            }
            Ok(Frozen::List(items))
        }
        Frozen::Null => Ok(Frozen::Null),
        _ => Err(PathError::NotAContainer {
            path: prefix(tokens, depth),
        }),
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Freeze a builder value. The `Value` is consumed; no alias to it survives.
impl From<Value> for Frozen {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(Arc::from(s)),
            Value::Array(items) => Self::List(items.into_iter().map(Frozen::from).collect()),
            Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (Arc::from(k), Frozen::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&Frozen> for Value {
    fn from(value: &Frozen) -> Self {
        value.thaw()
    }
}

impl From<bool> for Frozen {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Frozen {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<i32> for Frozen {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for Frozen {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

/// Non-finite floats freeze to `Null`, matching `serde_json`.
impl From<f64> for Frozen {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Self::Null, Self::Number)
    }
}

impl From<&str> for Frozen {
    fn from(s: &str) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<String> for Frozen {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s))
    }
}

impl FromIterator<Frozen> for Frozen {
    fn from_iter<I: IntoIterator<Item = Frozen>>(iter: I) -> Self {
        Self::List(iter.into_iter().collect())
    }
}

impl Serialize for Frozen {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k.as_ref(), v)?;
                }
                map.end()
            }
        }
    }
}

impl fmt::Display for Frozen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.thaw())
    }
}
