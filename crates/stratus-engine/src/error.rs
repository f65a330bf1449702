//! Engine error types.

use thiserror::Error;

use stratus_core::control::ControlError;

/// Errors raised synchronously by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration; rejects the entire initialize/reconfigure
    /// with zero mutation.
    #[error("invalid engine configuration: {0}")]
    Config(String),

    #[error("engine does not support reconfiguration")]
    ReconfigureUnsupported,

    #[error("control error: {0}")]
    Control(#[from] ControlError),
}

pub type EngineResult<T> = Result<T, EngineError>;
