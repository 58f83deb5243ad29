#![forbid(unsafe_code)]

//! Error types for command lifecycles and the history engine.

use std::error::Error;
use std::fmt;

use easel_store::PathError;

/// Errors raised by a command's factory or lifecycle methods.
#[derive(Debug)]
pub enum CommandError {
    /// The payload could not be decoded into the command's parameters.
    InvalidPayload(String),
    /// The command cannot run against the current state.
    InvalidState(String),
    /// A slice or element the command targets does not exist.
    TargetNotFound(String),
    /// A JSON-pointer edit inside a slice failed.
    Path(PathError),
    /// Generic error with message.
    Other(String),
}

impl CommandError {
    /// Build an [`InvalidState`](Self::InvalidState) error.
    #[must_use]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Build an [`Other`](Self::Other) error.
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPayload(msg) => write!(f, "invalid payload: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::TargetNotFound(target) => write!(f, "target {target} not found"),
            Self::Path(err) => write!(f, "path edit failed: {err}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl Error for CommandError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Path(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PathError> for CommandError {
    fn from(err: PathError) -> Self {
        Self::Path(err)
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

/// Which lifecycle step of a command failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Create,
    Execute,
    Undo,
    Redo,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Execute => "execute",
            Self::Undo => "undo",
            Self::Redo => "redo",
        }
    }
}

/// Errors returned by [`History`](crate::History) operations.
#[derive(Debug)]
pub enum HistoryError {
    /// `execute` was called with a name that has no registered factory.
    UnknownCommand(String),
    /// A command failed; the stack and pointer are unchanged.
    Command {
        command: String,
        phase: Phase,
        source: CommandError,
    },
}

impl HistoryError {
    /// The underlying command error, if any.
    #[must_use]
    pub fn command_error(&self) -> Option<&CommandError> {
        match self {
            Self::UnknownCommand(_) => None,
            Self::Command { source, .. } => Some(source),
        }
    }
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand(name) => write!(f, "unknown command: {name}"),
            Self::Command {
                command,
                phase,
                source,
            } => write!(f, "command '{command}' failed during {}: {source}", phase.as_str()),
        }
    }
}

impl Error for HistoryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UnknownCommand(_) => None,
            Self::Command { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_command_and_phase() {
        let err = HistoryError::Command {
            command: "layers/add".into(),
            phase: Phase::Undo,
            source: CommandError::TargetNotFound("layer 7".into()),
        };
        assert_eq!(
            err.to_string(),
            "command 'layers/add' failed during undo: target layer 7 not found"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn unknown_command_has_no_source() {
        let err = HistoryError::UnknownCommand("nope".into());
        assert_eq!(err.to_string(), "unknown command: nope");
        assert!(err.source().is_none());
        assert!(err.command_error().is_none());
    }

    #[test]
    fn json_errors_become_invalid_payload() {
        let bad = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        assert!(matches!(CommandError::from(bad), CommandError::InvalidPayload(_)));
    }

    #[test]
    fn path_errors_chain_their_source() {
        let err = CommandError::from(PathError::InvalidPointer("x".into()));
        assert!(err.source().is_some());
    }
}
