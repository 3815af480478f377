//! Unified error type for the boxexec workspace.
//!
//! Runtime client implementations report failures through the same enum,
//! so lifecycle code can classify not-found and cancellation conditions
//! without knowing which runtime produced them.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BoxexecError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path (or tool name) where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid or missing.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A configuration field was set twice.
    #[error("boxexec: Config.{field} already set")]
    AlreadySet {
        /// Name of the field that already carries a value.
        field: &'static str,
    },

    /// An external command-line tool exited unsuccessfully.
    #[error("{tool} exited with {status}: {stderr}")]
    ExternalTool {
        /// Tool that was invoked.
        tool: &'static str,
        /// Exit status description.
        status: String,
        /// Captured standard error output.
        stderr: String,
    },

    /// The connection to the runtime is unusable.
    #[error("runtime transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// The command deadline elapsed before the process reported an exit.
    #[error("deadline {deadline} exceeded before the process exited")]
    DeadlineExceeded {
        /// RFC 3339 deadline that elapsed.
        deadline: String,
    },

    /// The runtime reported an error together with the exit status.
    #[error("process exit error: {message}")]
    Exit {
        /// Error reported by the runtime.
        message: String,
    },

    /// A runtime API call failed.
    #[error("runtime error: {message}")]
    Runtime {
        /// Description returned by the runtime.
        message: String,
    },

    /// A lifecycle operation was called out of order.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// Lifecycle state at the time of the call.
        state: String,
    },

    /// An operation failed; wraps the underlying cause.
    #[error("error {operation}: {source}")]
    Context {
        /// Operation that failed, phrased as a gerund ("creating task").
        operation: &'static str,
        /// Underlying error.
        source: Box<BoxexecError>,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl BoxexecError {
    /// Wraps `self` with the name of the operation that failed.
    #[must_use]
    pub fn context(self, operation: &'static str) -> Self {
        Self::Context {
            operation,
            source: Box::new(self),
        }
    }

    /// Returns the innermost error beneath any [`BoxexecError::Context`] layers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns whether the error means the resource is already absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound { .. })
    }

    /// Returns whether the error is the cancellation raised by an elapsed deadline.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::DeadlineExceeded { .. })
    }
}

/// Extension for attaching operation names to fallible results.
pub trait ResultExt<T> {
    /// Wraps the error, if any, with the name of the failed operation.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped in [`BoxexecError::Context`].
    fn context(self, operation: &'static str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, operation: &'static str) -> Result<T> {
        self.map_err(|e| e.context(operation))
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BoxexecError>;
