//! ControlFacade — the engine-facing implementation of `Control`.
//!
//! Launch and destroy calls are hand-offs: the facade generates ids, records
//! the synchronous sensor samples that keep `decide()` idempotent, and
//! forwards the expanded request to the provisioner channel without waiting
//! for any provider work.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use stratus_core::control::{Control, ControlError, ControlParams};
use stratus_core::ids;
use stratus_core::messages::{
    LaunchDescription, NodeGroupRequest, ProvisionRequest, ProvisionerCommand,
};
use stratus_core::node::NodeState;
use stratus_state::SensorStore;

use crate::controller::DEFAULT_DECIDE_INTERVAL;

pub struct ControlFacade {
    sensors: SensorStore,
    commands: mpsc::Sender<ProvisionerCommand>,
    /// Base launch-context variables; per-group engine data wins on conflict.
    vars: HashMap<String, String>,
    decide_interval: Duration,
}

impl ControlFacade {
    pub fn new(sensors: SensorStore, commands: mpsc::Sender<ProvisionerCommand>) -> Self {
        Self {
            sensors,
            commands,
            vars: HashMap::new(),
            decide_interval: DEFAULT_DECIDE_INTERVAL,
        }
    }

    /// Current decide interval, as last negotiated via `configure`.
    pub fn decide_interval(&self) -> Duration {
        self.decide_interval
    }

    fn merged_data(&self, group_data: &HashMap<String, String>) -> HashMap<String, String> {
        let mut merged = self.vars.clone();
        merged.extend(group_data.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

impl Control for ControlFacade {
    fn configure(&mut self, params: ControlParams) -> Result<(), ControlError> {
        if let Some(interval_ms) = params.decide_interval_ms {
            if interval_ms == 0 {
                return Err(ControlError::InvalidParameters(
                    "decide interval must be positive".to_string(),
                ));
            }
            self.decide_interval = Duration::from_millis(interval_ms);
        }
        if let Some(vars) = params.provisioner_vars {
            self.vars = vars;
        }
        debug!(interval = ?self.decide_interval, "control parameters applied");
        Ok(())
    }

    fn launch(
        &mut self,
        deployable_type: &str,
        mut description: LaunchDescription,
    ) -> Result<(String, LaunchDescription), ControlError> {
        if description.is_empty() {
            return Err(ControlError::InvalidLaunch(
                "empty launch description".to_string(),
            ));
        }
        for (group_name, group) in &description {
            if group.num_instances == 0 {
                return Err(ControlError::InvalidLaunch(format!(
                    "group {group_name} requests zero instances"
                )));
            }
        }

        // Reserve channel capacity before generating ids or seeding samples,
        // so a dead provisioner leaves no half-recorded launch behind.
        let permit = self
            .commands
            .try_reserve()
            .map_err(|e| ControlError::ChannelClosed(e.to_string()))?;

        let launch_id = ids::new_launch_id();
        let mut nodes = HashMap::new();
        for (group_name, group) in &mut description {
            group.ids = (0..group.num_instances).map(|_| ids::new_node_id()).collect();
            group.data = self.merged_data(&group.data);
            nodes.insert(
                group_name.clone(),
                NodeGroupRequest {
                    ids: group.ids.clone(),
                    site: group.site.clone(),
                    allocation: group.allocation_id.clone(),
                    data: group.data.clone(),
                },
            );
            // Seed a Requesting sample per node before returning, so the
            // next decide() already sees this capacity.
            for node_id in &group.ids {
                self.sensors.seed_launch(node_id);
            }
        }

        permit.send(ProvisionerCommand::Provision(ProvisionRequest {
            deployable_type: deployable_type.to_string(),
            launch_id: launch_id.clone(),
            nodes,
            subscribers: Vec::new(),
        }));
        debug!(%launch_id, %deployable_type, "launch forwarded");
        Ok((launch_id, description))
    }

    fn destroy_instances(&mut self, node_ids: &[String]) -> Result<(), ControlError> {
        if node_ids.is_empty() {
            return Ok(());
        }
        let permit = self
            .commands
            .try_reserve()
            .map_err(|e| ControlError::ChannelClosed(e.to_string()))?;

        // Mirror of the launch seed: mark the nodes Terminating right away
        // so decide() stops counting them before the provisioner confirms.
        for node_id in node_ids {
            self.sensors
                .record_instance_state(node_id, NodeState::Terminating);
        }
        permit.send(ProvisionerCommand::TerminateNodes(node_ids.to_vec()));
        debug!(count = node_ids.len(), "terminate forwarded");
        Ok(())
    }

    fn destroy_launch(&mut self, launch_id: &str) -> Result<(), ControlError> {
        self.commands
            .try_send(ProvisionerCommand::TerminateLaunches(vec![
                launch_id.to_string(),
            ]))
            .map_err(|e| ControlError::ChannelClosed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::control::StateView;
    use stratus_core::messages::{LaunchGroup, SensorKind};

    fn description(n: u32, data: HashMap<String, String>) -> LaunchDescription {
        [(
            "workers".to_string(),
            LaunchGroup {
                num_instances: n,
                allocation_id: Some("small".to_string()),
                site: "site1".to_string(),
                data,
                ids: Vec::new(),
            },
        )]
        .into()
    }

    #[test]
    fn launch_fills_ids_seeds_and_forwards() {
        let sensors = SensorStore::new();
        let (tx, mut rx) = mpsc::channel(4);
        let mut facade = ControlFacade::new(sensors.clone(), tx);

        let (launch_id, filled) = facade
            .launch("base-cluster", description(2, HashMap::new()))
            .unwrap();
        assert_eq!(filled["workers"].ids.len(), 2);

        for node_id in &filled["workers"].ids {
            let series = sensors.get(SensorKind::InstanceState, node_id);
            assert_eq!(series.last().unwrap().node_state(), Some(NodeState::Requesting));
        }

        match rx.try_recv().unwrap() {
            ProvisionerCommand::Provision(request) => {
                assert_eq!(request.launch_id, launch_id);
                assert_eq!(request.nodes["workers"].ids, filled["workers"].ids);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn engine_data_wins_over_configured_vars() {
        let sensors = SensorStore::new();
        let (tx, _rx) = mpsc::channel(4);
        let mut facade = ControlFacade::new(sensors, tx);
        facade
            .configure(ControlParams {
                decide_interval_ms: None,
                provisioner_vars: Some(
                    [
                        ("allocation".to_string(), "large".to_string()),
                        ("zone".to_string(), "a".to_string()),
                    ]
                    .into(),
                ),
            })
            .unwrap();

        let data: HashMap<String, String> =
            [("allocation".to_string(), "small".to_string())].into();
        let (_, filled) = facade.launch("base-cluster", description(1, data)).unwrap();

        assert_eq!(filled["workers"].data["allocation"], "small");
        assert_eq!(filled["workers"].data["zone"], "a");
    }

    #[test]
    fn zero_instance_group_is_rejected() {
        let sensors = SensorStore::new();
        let (tx, _rx) = mpsc::channel(4);
        let mut facade = ControlFacade::new(sensors, tx);

        assert!(matches!(
            facade.launch("base-cluster", description(0, HashMap::new())),
            Err(ControlError::InvalidLaunch(_))
        ));
        assert!(matches!(
            facade.launch("base-cluster", LaunchDescription::new()),
            Err(ControlError::InvalidLaunch(_))
        ));
    }

    #[test]
    fn dead_channel_leaves_no_seed_behind() {
        let sensors = SensorStore::new();
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let mut facade = ControlFacade::new(sensors.clone(), tx);

        assert!(matches!(
            facade.launch("base-cluster", description(1, HashMap::new())),
            Err(ControlError::ChannelClosed(_))
        ));
        assert!(sensors.get_all(SensorKind::InstanceState).is_empty());
    }

    #[test]
    fn destroy_records_terminating_synchronously() {
        let sensors = SensorStore::new();
        let (tx, mut rx) = mpsc::channel(4);
        let mut facade = ControlFacade::new(sensors.clone(), tx);

        facade
            .destroy_instances(&["n-1".to_string(), "n-2".to_string()])
            .unwrap();

        for node_id in ["n-1", "n-2"] {
            let series = sensors.get(SensorKind::InstanceState, node_id);
            assert_eq!(
                series.last().unwrap().node_state(),
                Some(NodeState::Terminating)
            );
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            ProvisionerCommand::TerminateNodes(ids) if ids.len() == 2
        ));
    }

    #[test]
    fn zero_decide_interval_is_rejected() {
        let sensors = SensorStore::new();
        let (tx, _rx) = mpsc::channel(4);
        let mut facade = ControlFacade::new(sensors, tx);

        assert!(facade
            .configure(ControlParams {
                decide_interval_ms: Some(0),
                provisioner_vars: None,
            })
            .is_err());

        facade
            .configure(ControlParams {
                decide_interval_ms: Some(250),
                provisioner_vars: None,
            })
            .unwrap();
        assert_eq!(facade.decide_interval(), Duration::from_millis(250));
    }
}
