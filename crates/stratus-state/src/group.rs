//! Generic multi-key partitioning of node records.
//!
//! Every reconciliation pass groups records somehow (by site, by launch, by
//! node); this is the one implementation they all share.

use std::collections::HashMap;

use stratus_core::node::NodeRecord;

/// A groupable field of a `NodeRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeField {
    LaunchId,
    NodeId,
    Site,
    State,
}

impl NodeField {
    fn value_of(self, record: &NodeRecord) -> String {
        match self {
            NodeField::LaunchId => record.launch_id.clone(),
            NodeField::NodeId => record.node_id.clone(),
            NodeField::Site => record.site.clone(),
            NodeField::State => record.state.to_string(),
        }
    }
}

/// Partition records by the values of one or more fields.
///
/// The result is a set-partition of the input: every record lands in exactly
/// one group, and the union of all groups recovers the original multiset.
pub fn group_records(
    records: &[NodeRecord],
    keys: &[NodeField],
) -> HashMap<Vec<String>, Vec<NodeRecord>> {
    let mut groups: HashMap<Vec<String>, Vec<NodeRecord>> = HashMap::new();
    for record in records {
        let group_key: Vec<String> = keys.iter().map(|k| k.value_of(record)).collect();
        groups.entry(group_key).or_default().push(record.clone());
    }
    groups
}
