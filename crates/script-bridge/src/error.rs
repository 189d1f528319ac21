//! Error types for script-bridge

use crate::types::Namespace;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the bridge's error type
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Stage of `ScriptInstance::load` that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStage {
    /// The script file could not be located on disk.
    Resolve,
    /// The source failed to read or compile.
    Load,
    /// The top-level chunk raised while executing.
    Execute,
}

impl LoadStage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Load => "load",
            Self::Execute => "execute",
        }
    }
}

/// Main error type for the script bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Wrong argument count or type at the engine boundary.
    #[error("{0}")]
    Argument(String),

    /// The calling engine does not resolve to a live script instance.
    #[error("Invalid instance")]
    InvalidInstance,

    /// Nothing is registered under `name` in `namespace`.
    #[error("{namespace} not found: {name}")]
    NotFound { namespace: Namespace, name: String },

    /// The script failed to resolve, compile or execute its top level.
    #[error("Failed to {} script: {}: {message}", stage.label(), path.display())]
    ScriptLoad {
        stage: LoadStage,
        path: PathBuf,
        message: String,
    },

    /// Deliberately disabled legacy entry point.
    #[error("Unsupported API called: {0}")]
    UnsupportedApi(&'static str),

    /// A script callback raised while being dispatched.
    #[error("script error in {name}: {message}")]
    ScriptRuntime { name: String, message: String },

    /// The engine handle is already owned by another instance.
    #[error("engine handle {0} is already registered to another instance")]
    HandleConflict(u64),

    /// A bounded lock wait expired.
    #[error("timed out waiting for {0}")]
    Busy(String),

    /// The requested operation does not fit the instance's lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Raw engine failure outside of a dispatched callback.
    #[error("engine error: {0}")]
    Engine(#[from] mlua::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }

    pub fn not_found(namespace: Namespace, name: impl Into<String>) -> Self {
        Self::NotFound {
            namespace,
            name: name.into(),
        }
    }

    /// Whether the caller may simply retry or ignore the failure.
    ///
    /// Load failures and raw engine faults are the only non-recoverable
    /// outcomes; everything else leaves the host and sibling scripts usable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ScriptLoad { .. } | Self::Engine(_) | Self::Io(_))
    }

    /// Whether the failure means the dispatch target is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::InvalidInstance)
    }
}

impl From<BridgeError> for mlua::Error {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Engine(inner) => inner,
            other => mlua::Error::RuntimeError(other.to_string()),
        }
    }
}
