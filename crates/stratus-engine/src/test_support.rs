//! Test doubles shared by the policy tests.
//!
//! `TestControl` records every command an engine issues and mirrors the
//! production facade's synchronous bookkeeping: launches seed `Requesting`
//! samples and destroys record `Terminating` samples, so idempotence can be
//! asserted without a running provisioner.

use stratus_core::control::{Control, ControlError, ControlParams};
use stratus_core::ids;
use stratus_core::messages::LaunchDescription;
use stratus_core::node::NodeState;
use stratus_state::SensorStore;

#[derive(Default)]
pub struct TestControl {
    pub sensors: SensorStore,
    pub launches: Vec<(String, LaunchDescription)>,
    pub destroyed: Vec<String>,
    pub destroyed_launches: Vec<String>,
    pub params: Vec<ControlParams>,
}

impl TestControl {
    pub fn new(sensors: SensorStore) -> Self {
        Self {
            sensors,
            ..Default::default()
        }
    }

    /// Total number of launch/destroy commands issued so far.
    pub fn command_count(&self) -> usize {
        self.launches.len() + self.destroyed.len() + self.destroyed_launches.len()
    }

    /// All node ids filled back into launch descriptions so far.
    pub fn launched_node_ids(&self) -> Vec<String> {
        self.launches
            .iter()
            .flat_map(|(_, description)| description.values())
            .flat_map(|group| group.ids.clone())
            .collect()
    }
}

impl Control for TestControl {
    fn configure(&mut self, params: ControlParams) -> Result<(), ControlError> {
        self.params.push(params);
        Ok(())
    }

    fn launch(
        &mut self,
        _deployable_type: &str,
        mut description: LaunchDescription,
    ) -> Result<(String, LaunchDescription), ControlError> {
        let launch_id = ids::new_launch_id();
        for group in description.values_mut() {
            group.ids = (0..group.num_instances).map(|_| ids::new_node_id()).collect();
            for node_id in &group.ids {
                self.sensors.seed_launch(node_id);
            }
        }
        self.launches.push((launch_id.clone(), description.clone()));
        Ok((launch_id, description))
    }

    fn destroy_instances(&mut self, node_ids: &[String]) -> Result<(), ControlError> {
        for node_id in node_ids {
            self.sensors.record_instance_state(node_id, NodeState::Terminating);
            self.destroyed.push(node_id.clone());
        }
        Ok(())
    }

    fn destroy_launch(&mut self, launch_id: &str) -> Result<(), ControlError> {
        self.destroyed_launches.push(launch_id.to_string());
        Ok(())
    }
}
