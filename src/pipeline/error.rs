//! Error types and reporting for pipeline modules.

use crate::error::ParleyError;
use crate::pipeline::graph::ModuleId;
use std::fmt;

/// Errors that can occur while a module sets up or processes an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// The current message is dropped; the module keeps running.
    Recoverable(String),
    /// The module cannot continue and its runner stops.
    Fatal(String),
}

impl ModuleError {
    pub fn recoverable(message: impl fmt::Display) -> Self {
        ModuleError::Recoverable(message.to_string())
    }

    pub fn fatal(message: impl fmt::Display) -> Self {
        ModuleError::Fatal(message.to_string())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ModuleError::Fatal(_))
    }
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            ModuleError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for ModuleError {}

impl From<ParleyError> for ModuleError {
    fn from(err: ParleyError) -> Self {
        ModuleError::Recoverable(err.to_string())
    }
}

/// Errors raised while wiring, starting or driving a pipeline graph.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Unknown module {0}")]
    UnknownModule(ModuleId),

    #[error("Module '{module}' cannot subscribe to itself")]
    SelfLoop { module: &'static str },

    #[error("Subscribing '{to}' to '{from}' would create a cycle")]
    Cycle {
        from: &'static str,
        to: &'static str,
    },

    #[error("Module '{module}' failed to start: {source}")]
    Setup {
        module: &'static str,
        #[source]
        source: ModuleError,
    },

    #[error("Module '{module}' is not running")]
    NotRunning { module: &'static str },

    #[error("Failed to spawn thread for '{module}': {message}")]
    Spawn {
        module: &'static str,
        message: String,
    },
}

/// Receives errors raised by running modules.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a module.
    fn report(&self, module: &str, error: &ModuleError);
}

/// Error reporter that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, module: &str, error: &ModuleError) {
        match error {
            ModuleError::Recoverable(msg) => {
                tracing::warn!(stage = module, "{}", msg);
            }
            ModuleError::Fatal(msg) => {
                tracing::error!(stage = module, "{}", msg);
            }
        }
    }
}
