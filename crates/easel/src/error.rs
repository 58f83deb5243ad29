#![forbid(unsafe_code)]

//! Facade error types.

use std::error::Error as StdError;
use std::fmt;

use easel_history::HistoryError;

/// Errors from loading or validating an [`EditorConfig`](crate::EditorConfig).
#[derive(Debug)]
pub enum ConfigError {
    /// File I/O error.
    Io(std::io::Error),
    /// TOML parse error.
    Toml(toml::de::Error),
    /// TOML serialization error.
    TomlSerialize(toml::ser::Error),
    /// JSON parse error.
    Json(serde_json::Error),
    /// One or more values are out of range.
    Validation(Vec<String>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Toml(e) => write!(f, "TOML parse error: {e}"),
            Self::TomlSerialize(e) => write!(f, "TOML serialize error: {e}"),
            Self::Json(e) => write!(f, "JSON parse error: {e}"),
            Self::Validation(errors) => write!(f, "validation errors: {}", errors.join("; ")),
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Toml(e) => Some(e),
            Self::TomlSerialize(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Validation(_) => None,
        }
    }
}

/// Errors from the self-check harness gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessError {
    /// `run_self_check` was entered while a run was still in flight.
    AlreadyRunning,
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "self-check is already running"),
        }
    }
}

impl StdError for HarnessError {}

/// Any error surfaced by the editor facade.
#[derive(Debug)]
pub enum Error {
    Config(ConfigError),
    History(HistoryError),
    Harness(HarnessError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::History(e) => write!(f, "history: {e}"),
            Self::Harness(e) => write!(f, "harness: {e}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::History(e) => Some(e),
            Self::Harness(e) => Some(e),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<HistoryError> for Error {
    fn from(e: HistoryError) -> Self {
        Self::History(e)
    }
}

impl From<HarnessError> for Error {
    fn from(e: HarnessError) -> Self {
        Self::Harness(e)
    }
}

/// Facade result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
