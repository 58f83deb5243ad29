#![forbid(unsafe_code)]

//! Editor configuration loaded from TOML or JSON.
//!
//! # Loading
//!
//! ```toml
//! # easel.toml
//! [history]
//! max_depth = 200
//! coalesce_window_ms = 350
//!
//! [state]
//! slices = ["project", "layers", "viewport", "selection", "tools", "ui"]
//!
//! [logging]
//! filter = "easel_history=debug,info"
//! ```
//!
//! ```rust,ignore
//! let config = EditorConfig::from_toml_file("easel.toml")?;
//! ```
//!
//! Every field has a default, so an empty document is a valid config.

use std::path::Path;
use std::time::Duration;

use easel_history::{DEFAULT_COALESCE_WINDOW, HistoryConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Slices every editor starts with.
pub const DEFAULT_SLICES: [&str; 6] = ["project", "layers", "viewport", "selection", "tools", "ui"];

/// Top-level editor configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub history: HistorySection,
    pub state: StateSection,
    pub logging: LoggingSection,
}

/// `[history]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySection {
    /// Maximum number of undo entries.
    pub max_depth: usize,
    /// Coalescing window for the built-in commands, in milliseconds.
    pub coalesce_window_ms: u64,
}

impl Default for HistorySection {
    fn default() -> Self {
        let defaults = HistoryConfig::default();
        Self {
            max_depth: defaults.max_depth,
            coalesce_window_ms: u64::try_from(DEFAULT_COALESCE_WINDOW.as_millis()).unwrap_or(500),
        }
    }
}

/// `[state]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSection {
    /// Slices created (as empty maps) when the editor starts.
    pub slices: Vec<String>,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            slices: DEFAULT_SLICES.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `EnvFilter` directive; `EASEL_LOG` and then `info` apply when unset.
    pub filter: Option<String>,
}

impl EditorConfig {
    /// Parse from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Parse from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Load from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Serialize to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::TomlSerialize)
    }

    /// Validate all parameters are within acceptable ranges.
    ///
    /// Returns a list of validation errors. An empty list means the config
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.history.max_depth == 0 {
            errors.push("history.max_depth must be > 0".into());
        }

        let mut seen = std::collections::BTreeSet::new();
        for name in &self.state.slices {
            if name.trim().is_empty() {
                errors.push("state.slices must not contain empty names".into());
            } else if !seen.insert(name.as_str()) {
                errors.push(format!("state.slices lists '{name}' more than once"));
            }
        }

        if let Some(filter) = &self.logging.filter
            && let Err(e) = tracing_subscriber::EnvFilter::try_new(filter)
        {
            errors.push(format!("logging.filter is not a valid filter: {e}"));
        }

        errors
    }

    /// Return `self` if valid, or every problem found.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// History engine settings.
    #[must_use]
    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig::new(self.history.max_depth)
            .with_default_window(Duration::from_millis(self.history.coalesce_window_ms))
    }
}
