//! Capacity readings shared by the reference policies.
//!
//! All policies count instances the same way: the last sample of a node's
//! series is its current state, and a node counts toward capacity while its
//! state is at most `Running`.

use std::collections::HashMap;

use stratus_core::control::StateView;
use stratus_core::messages::{LaunchDescription, LaunchGroup, SensorKind};
use stratus_core::node::NodeState;

use crate::config::LaunchSettings;

/// Node group name used by the reference policies.
pub const WORKER_GROUP: &str = "workers";

/// Current state of every known instance: `node_id → last sampled state`.
pub fn instance_states(state: &dyn StateView) -> HashMap<String, NodeState> {
    state
        .get_all(SensorKind::InstanceState)
        .into_iter()
        .filter_map(|series| {
            let last = series.last()?;
            Some((last.key.clone(), last.node_state()?))
        })
        .collect()
}

/// Node ids currently counted toward capacity.
pub fn valid_instances(state: &dyn StateView) -> Vec<String> {
    let mut ids: Vec<String> = instance_states(state)
        .into_iter()
        .filter(|(_, s)| s.is_valid())
        .map(|(id, _)| id)
        .collect();
    ids.sort();
    ids
}

/// Whether any instance is still booting (requested but not yet running).
pub fn any_booting(state: &dyn StateView) -> bool {
    instance_states(state).values().any(|s| s.is_booting())
}

/// Depth of the (single) monitored queue, if any sample exists.
pub fn current_queue_depth(state: &dyn StateView) -> Option<u64> {
    state
        .get_all(SensorKind::QueueLength)
        .first()
        .and_then(|series| series.last())
        .and_then(|item| item.queue_depth())
}

/// A one-instance launch description for the worker group.
pub fn single_instance(
    settings: &LaunchSettings,
    data: HashMap<String, String>,
) -> LaunchDescription {
    let mut description = LaunchDescription::new();
    description.insert(
        WORKER_GROUP.to_string(),
        LaunchGroup {
            num_instances: 1,
            allocation_id: settings.allocation.clone(),
            site: settings.site.clone(),
            data,
            ids: Vec::new(),
        },
    );
    description
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_state::SensorStore;

    #[test]
    fn instance_counting_uses_last_sample() {
        let sensors = SensorStore::new();
        sensors.record_instance_state("n-1", NodeState::Pending);
        sensors.record_instance_state("n-1", NodeState::Running);
        sensors.record_instance_state("n-2", NodeState::Running);
        sensors.record_instance_state("n-2", NodeState::Terminated);

        let states = instance_states(&sensors);
        assert_eq!(states.get("n-1"), Some(&NodeState::Running));
        assert_eq!(states.get("n-2"), Some(&NodeState::Terminated));

        assert_eq!(valid_instances(&sensors), vec!["n-1".to_string()]);
    }

    #[test]
    fn booting_detection() {
        let sensors = SensorStore::new();
        assert!(!any_booting(&sensors));

        sensors.record_instance_state("n-1", NodeState::Requesting);
        assert!(any_booting(&sensors));

        sensors.record_instance_state("n-1", NodeState::Running);
        assert!(!any_booting(&sensors));
    }

    #[test]
    fn queue_depth_reads_latest() {
        let sensors = SensorStore::new();
        assert_eq!(current_queue_depth(&sensors), None);

        sensors.record_queue_length("q-1", 5);
        sensors.record_queue_length("q-1", 12);
        assert_eq!(current_queue_depth(&sensors), Some(12));
    }

    #[test]
    fn single_instance_description_shape() {
        let settings = LaunchSettings::default();
        let description = single_instance(&settings, HashMap::new());
        let group = &description[WORKER_GROUP];
        assert_eq!(group.num_instances, 1);
        assert_eq!(group.site, settings.site);
        assert!(group.ids.is_empty());
    }
}
