//! Context broker abstraction.
//!
//! A context is a per-launch rendezvous: booting nodes report in with their
//! identities and an ok/error verdict, and the reconciliation pass polls the
//! broker to learn which nodes finished contextualization.

use async_trait::async_trait;

use stratus_core::node::ContextHandle;

use crate::error::ProvisionerResult;

/// One identity a node registered with the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextIdentity {
    pub ip: String,
    pub hostname: Option<String>,
}

/// Broker-side status of one node within a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextNodeStatus {
    pub identities: Vec<ContextIdentity>,
    pub ok_occurred: bool,
    pub error_occurred: bool,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
}

/// Full status of one context session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContextStatus {
    pub nodes: Vec<ContextNodeStatus>,
}

/// Context broker operations used by the provisioner.
#[async_trait]
pub trait ContextBroker: Send + Sync {
    /// Create a fresh context session for a launch.
    async fn create_context(&self) -> ProvisionerResult<ContextHandle>;

    /// Poll the broker for the current status of a context.
    async fn query_context(&self, handle: &ContextHandle) -> ProvisionerResult<ContextStatus>;
}
