//! Runtime error types.

use quill_core::KernelError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Loading or validating the configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A kernel operation failed.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// Installing the global tracing subscriber failed.
    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    /// `start` was called twice.
    #[error("Runtime already started")]
    AlreadyStarted,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
