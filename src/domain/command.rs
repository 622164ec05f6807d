//! Command and reply types exchanged across the channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Name of the only command the host registers.
pub const OPEN_BLUETOOTH_SETTINGS: &str = "openBluetoothSettings";

/// Category code used for every execution failure of the built-in command.
pub const ERROR_CODE: &str = "ERROR";

/// Category code for request frames that could not be decoded.
pub const MALFORMED_CALL_CODE: &str = "MALFORMED_CALL";

/// A named request for the dispatcher to perform one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: None,
        }
    }

    pub fn with_arguments(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments: Some(arguments),
        }
    }
}

/// The single outcome produced for every dispatched command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum Reply {
    Success(Value),
    Failure {
        code: String,
        message: String,
        #[serde(default)]
        details: Option<Value>,
    },
    Unhandled,
}

impl Reply {
    /// Success with no return data.
    pub fn empty() -> Self {
        Reply::Success(Value::Null)
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Reply::Failure {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Interpret the reply on the caller side.
    ///
    /// `Unhandled` maps to [`CallError::NotImplemented`] and is never folded
    /// into [`CallError::Failed`].
    pub fn into_result(self, name: &str) -> Result<Value, CallError> {
        match self {
            Reply::Success(value) => Ok(value),
            Reply::Failure {
                code,
                message,
                details,
            } => Err(CallError::Failed {
                code,
                message,
                details,
            }),
            Reply::Unhandled => Err(CallError::NotImplemented {
                name: name.to_string(),
            }),
        }
    }
}

/// Application-level errors surfaced by callers.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("{code}: {message}")]
    Failed {
        code: String,
        message: String,
        details: Option<Value>,
    },

    #[error("command '{name}' is not implemented by the host")]
    NotImplemented { name: String },

    #[error("channel transport error: {0}")]
    Transport(String),
}

impl CallError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        CallError::Transport(err.to_string())
    }
}
