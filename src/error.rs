//! Error types for featdispatch
//!
//! Only configuration problems and worker-process failures surface here.
//! Failures inside a job body never reach the dispatcher; see
//! [`crate::core::Dispatcher`].

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for featdispatch operations
#[derive(Error, Debug)]
pub enum DispatchError {
    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid user configuration, reported before any work starts
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Scene description could not be read or parsed
    #[error("The input file '{path}' cannot be read: {message}")]
    SceneError { path: PathBuf, message: String },

    /// Image describer configuration could not be loaded or created
    #[error("Image describer error: {0}")]
    DescriberError(String),

    /// A worker process could not be created
    #[error("Failed to spawn worker process: {0}")]
    Spawn(#[source] std::io::Error),

    /// Waiting on an outstanding worker failed
    #[error("Failed to wait for worker process: {0}")]
    Wait(#[source] std::io::Error),
}

impl DispatchError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create a scene loading error
    pub fn scene(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SceneError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Errors that come from the operating system's process table.
    ///
    /// These abort the whole dispatch; nothing retries them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Spawn(_) | Self::Wait(_))
    }

    /// Check if the error was caused by bad user input
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigError(_) | Self::SceneError { .. } | Self::DescriberError(_)
        )
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } | Self::SceneError { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for featdispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::DescriberError(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| DispatchError::io(path, e))
    }
}
