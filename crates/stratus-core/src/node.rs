//! Node lifecycle states and the persisted record shapes.
//!
//! `NodeState` is a total order used both as a state machine and as a
//! comparison for reconciliation: a store-observed state never decreases
//! except for the `ErrorRetrying` ↔ `Pending` retry cycle and the terminal
//! `Terminating` → `Terminated`/`Failed` exit.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::ids;

/// Lifecycle state of a provisioned node (and of a launch as a whole).
///
/// The numeric value defines the total order; reconciliation only ever
/// ratchets a record forward along it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Requesting,
    Requested,
    ErrorRetrying,
    Pending,
    Started,
    Running,
    Terminating,
    Terminated,
    Failed,
}

impl NodeState {
    /// Numeric position in the total order.
    pub const fn value(self) -> u32 {
        match self {
            NodeState::Requesting => 100,
            NodeState::Requested => 200,
            NodeState::ErrorRetrying => 300,
            NodeState::Pending => 400,
            NodeState::Started => 500,
            NodeState::Running => 600,
            NodeState::Terminating => 700,
            NodeState::Terminated => 800,
            NodeState::Failed => 900,
        }
    }

    /// Terminal states are retained for audit and never advanced again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, NodeState::Terminated | NodeState::Failed)
    }

    /// A node still counted toward capacity by decision engines.
    pub const fn is_valid(self) -> bool {
        self.value() <= NodeState::Running.value()
    }

    /// A node that has been asked for but is not serving yet.
    pub const fn is_booting(self) -> bool {
        self.value() < NodeState::Running.value()
    }
}

impl PartialOrd for NodeState {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeState {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value().cmp(&other.value())
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Requesting => "requesting",
            NodeState::Requested => "requested",
            NodeState::ErrorRetrying => "error_retrying",
            NodeState::Pending => "pending",
            NodeState::Started => "started",
            NodeState::Running => "running",
            NodeState::Terminating => "terminating",
            NodeState::Terminated => "terminated",
            NodeState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

// ── Records ────────────────────────────────────────────────────────

/// Handle to a context-broker session shared by all nodes of a launch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextHandle {
    pub uri: String,
}

/// Persisted lifecycle record for a single node.
///
/// Owned exclusively by the provisioner: created when a launch is expanded,
/// mutated only by provisioner passes, retained after a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub launch_id: String,
    pub node_id: String,
    pub state: NodeState,
    /// Human-readable reason for the last state change, when there is one.
    pub state_desc: Option<String>,
    pub site: String,
    pub allocation: Option<String>,
    /// Node-group name within the launch document.
    pub ctx_name: Option<String>,
    pub sshkeyname: Option<String>,
    /// Provider-assigned instance id, absent until the run call succeeds.
    pub iaas_id: Option<String>,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    /// Opaque per-node launch variables and provider metadata.
    pub extra: HashMap<String, String>,
    /// Unix milliseconds of the last state change.
    pub state_timestamp: u64,
}

impl NodeRecord {
    /// Move this record to a new state, stamping the transition time.
    pub fn transition(&mut self, state: NodeState, desc: Option<&str>) {
        self.state = state;
        self.state_desc = desc.map(str::to_string);
        self.state_timestamp = ids::epoch_millis();
    }
}

/// Persisted record for one provisioning request, aggregating its nodes.
///
/// Context-bearing launches stay below `Running` until every constituent
/// node reports contextualization completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchRecord {
    pub launch_id: String,
    /// The resolved cluster-launch document.
    pub document: String,
    pub deployable_type: String,
    pub subscribers: Vec<String>,
    pub context: Option<ContextHandle>,
    pub state: NodeState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_order_is_total_and_monotone() {
        let order = [
            NodeState::Requesting,
            NodeState::Requested,
            NodeState::ErrorRetrying,
            NodeState::Pending,
            NodeState::Started,
            NodeState::Running,
            NodeState::Terminating,
            NodeState::Terminated,
            NodeState::Failed,
        ];
        for pair in order.windows(2) {
            assert!(pair[0] < pair[1], "{} should precede {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn terminal_and_valid_classification() {
        assert!(NodeState::Terminated.is_terminal());
        assert!(NodeState::Failed.is_terminal());
        assert!(!NodeState::Terminating.is_terminal());

        assert!(NodeState::Running.is_valid());
        assert!(NodeState::Requesting.is_valid());
        assert!(!NodeState::Terminating.is_valid());

        assert!(NodeState::Pending.is_booting());
        assert!(!NodeState::Running.is_booting());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&NodeState::ErrorRetrying).unwrap();
        assert_eq!(json, "\"error_retrying\"");
        let back: NodeState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, NodeState::ErrorRetrying);
    }

    #[test]
    fn transition_updates_desc_and_timestamp() {
        let mut record = NodeRecord {
            launch_id: "l-1".to_string(),
            node_id: "n-1".to_string(),
            state: NodeState::Requested,
            state_desc: None,
            site: "site1".to_string(),
            allocation: None,
            ctx_name: None,
            sshkeyname: None,
            iaas_id: None,
            public_ip: None,
            private_ip: None,
            extra: HashMap::new(),
            state_timestamp: 0,
        };

        record.transition(NodeState::Pending, Some("run call succeeded"));
        assert_eq!(record.state, NodeState::Pending);
        assert_eq!(record.state_desc.as_deref(), Some("run call succeeded"));
        assert!(record.state_timestamp > 0);
    }
}
