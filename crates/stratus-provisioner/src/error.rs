//! Provisioner error types.

use thiserror::Error;

/// Errors that can occur during provisioning operations.
///
/// These surface only inside the provisioner: the outer service boundary
/// converts every one of them into `Failed` records, never a crash.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error("invalid provision request: {0}")]
    InvalidRequest(String),

    #[error("unknown deployable type: {0}")]
    UnknownDeployableType(String),

    #[error("iaas failure: {0}")]
    Iaas(String),

    #[error("context broker failure: {0}")]
    Broker(String),

    #[error("state store error: {0}")]
    State(#[from] stratus_state::StateError),

    #[error("internal task failure: {0}")]
    Internal(String),
}

pub type ProvisionerResult<T> = Result<T, ProvisionerError>;
