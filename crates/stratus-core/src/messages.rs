//! Typed boundary messages.
//!
//! Telemetry samples, launch descriptions, expanded provision requests, and
//! the commands carried on the controller → provisioner channel. Dict-shaped
//! wire messages are decoded into these at the boundary and never passed
//! around as untyped maps internally.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::node::NodeState;

// ── Telemetry ──────────────────────────────────────────────────────

/// Kind of telemetry series held by the sensor store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SensorKind {
    InstanceState,
    QueueLength,
}

/// Value carried by one telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorValue {
    Instance(NodeState),
    QueueDepth(u64),
}

/// Immutable telemetry sample. Appended, never mutated; per-key ordering is
/// insertion order with monotonic timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateItem {
    pub kind: SensorKind,
    /// Node id or queue id, depending on `kind`.
    pub key: String,
    pub timestamp_ms: u64,
    pub value: SensorValue,
}

impl StateItem {
    /// The node state carried by an instance-state sample.
    pub fn node_state(&self) -> Option<NodeState> {
        match self.value {
            SensorValue::Instance(state) => Some(state),
            SensorValue::QueueDepth(_) => None,
        }
    }

    /// The depth carried by a queue-length sample.
    pub fn queue_depth(&self) -> Option<u64> {
        match self.value {
            SensorValue::QueueDepth(depth) => Some(depth),
            SensorValue::Instance(_) => None,
        }
    }
}

// ── Launch descriptions (engine → control) ─────────────────────────

/// One node group requested by a decision engine.
///
/// `ids` is empty on input; `Control::launch` fills one fresh node id per
/// requested instance back into it, and engines rely on that for their own
/// bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchGroup {
    pub num_instances: u32,
    pub allocation_id: Option<String>,
    pub site: String,
    /// Opaque launch-context variables sent to every instance of the group.
    pub data: HashMap<String, String>,
    #[serde(default)]
    pub ids: Vec<String>,
}

/// `group_name → LaunchGroup`, as handed to `Control::launch`.
pub type LaunchDescription = HashMap<String, LaunchGroup>;

// ── Provision requests (control → provisioner) ─────────────────────

/// One expanded node group inside a provision request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGroupRequest {
    /// Pre-generated node ids, one per instance.
    pub ids: Vec<String>,
    pub site: String,
    pub allocation: Option<String>,
    pub data: HashMap<String, String>,
}

/// Fully expanded provisioning request forwarded to the provisioner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub deployable_type: String,
    pub launch_id: String,
    pub nodes: HashMap<String, NodeGroupRequest>,
    pub subscribers: Vec<String>,
}

/// Commands accepted by the provisioner service task.
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisionerCommand {
    Provision(ProvisionRequest),
    TerminateNodes(Vec<String>),
    TerminateLaunches(Vec<String>),
    /// Trigger a reconciliation pass; results flow only to subscribers.
    Query,
}
