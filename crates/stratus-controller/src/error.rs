//! Controller error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("engine failure: {0}")]
    Engine(#[from] stratus_engine::EngineError),

    #[error("reconfigure channel unavailable: {0}")]
    ChannelClosed(String),
}

pub type ControllerResult<T> = Result<T, ControllerError>;
