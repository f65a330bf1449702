//! IaaS driver abstraction.
//!
//! One driver per site. The provisioner only ever uses these three calls;
//! everything provider-specific (credentials, endpoints, API dialects) stays
//! behind the trait.

use async_trait::async_trait;
use std::collections::HashMap;

use stratus_core::node::NodeState;

use crate::error::ProvisionerResult;

/// Parameters for one `run_instances` call covering a whole node group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInstancesSpec {
    pub count: u32,
    pub image: String,
    pub allocation: Option<String>,
    pub sshkeyname: Option<String>,
    /// Opaque user data handed to each instance; carries the context-broker
    /// URI when the launch is contextualized.
    pub user_data: Option<String>,
}

/// Provider view of one instance, as reported by a site listing.
#[derive(Debug, Clone, PartialEq)]
pub struct IaasInstance {
    pub iaas_id: String,
    /// Provider state already mapped onto the node lifecycle order.
    pub state: NodeState,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    /// Provider metadata worth keeping on the node record.
    pub extra: HashMap<String, String>,
}

/// Site-level IaaS operations.
#[async_trait]
pub trait IaasDriver: Send + Sync {
    /// Start `spec.count` instances; may return fewer than asked for.
    async fn run_instances(&self, spec: &RunInstancesSpec) -> ProvisionerResult<Vec<IaasInstance>>;

    /// Terminate one instance by provider id.
    async fn terminate_instance(&self, iaas_id: &str) -> ProvisionerResult<()>;

    /// List every instance the provider currently knows about.
    async fn list_instances(&self) -> ProvisionerResult<Vec<IaasInstance>>;
}
