//! Queue-length hysteresis policy.
//!
//! Expand by one when queue depth rises above the high water mark, contract
//! by one when it falls below the low water mark, and hold within the band.
//! Never contracts below `min_instances`, nor below one instance while the
//! queue is non-empty. Holds entirely while any launch is still booting, to
//! avoid overshoot.

use tracing::{debug, info};

use stratus_core::control::{Control, ControlParams, StateView};

use crate::capacity;
use crate::config::{EngineConfig, LaunchSettings, QueueBounds};
use crate::error::{EngineError, EngineResult};
use crate::{DEFAULT_DECIDE_INTERVAL_MS, Engine};

#[derive(Default)]
pub struct QueueLengthBoundedEngine {
    settings: LaunchSettings,
    vars: std::collections::HashMap<String, String>,
    bounds: QueueBounds,
}

impl QueueLengthBoundedEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for QueueLengthBoundedEngine {
    fn initialize(
        &mut self,
        control: &mut dyn Control,
        _state: &dyn StateView,
        conf: &EngineConfig,
    ) -> EngineResult<()> {
        conf.validate()?;
        let bounds = conf
            .queue
            .clone()
            .ok_or_else(|| EngineError::Config("queue bounds are required".to_string()))?;
        control.configure(ControlParams {
            decide_interval_ms: Some(DEFAULT_DECIDE_INTERVAL_MS),
            provisioner_vars: Some(conf.provisioner_vars.clone()),
        })?;
        self.settings = LaunchSettings::from_vars(&conf.provisioner_vars);
        self.vars = conf.provisioner_vars.clone();
        info!(
            high_water = bounds.high_water,
            low_water = bounds.low_water,
            min_instances = bounds.min_instances,
            "queue-length bounded engine initialized"
        );
        self.bounds = bounds;
        Ok(())
    }

    fn decide(&mut self, control: &mut dyn Control, state: &dyn StateView) -> EngineResult<()> {
        let depth = capacity::current_queue_depth(state).unwrap_or(0);

        // Holding while instances boot avoids overshooting the band.
        if capacity::any_booting(state) {
            debug!(depth, "holding: launches still pending");
            return Ok(());
        }

        let valid = capacity::valid_instances(state);
        let count = valid.len() as u64;

        if depth > self.bounds.high_water {
            debug!(depth, count, "expanding above high water");
            let description = capacity::single_instance(&self.settings, self.vars.clone());
            control.launch(&self.settings.deployable_type, description)?;
        } else if count == 0 && depth > 0 {
            // A non-empty queue must always have at least one consumer,
            // even below the low water mark.
            debug!(depth, "bootstrapping first instance for non-empty queue");
            let description = capacity::single_instance(&self.settings, self.vars.clone());
            control.launch(&self.settings.deployable_type, description)?;
        } else if depth < self.bounds.low_water {
            let floor = if depth > 0 {
                self.bounds.min_instances.max(1)
            } else {
                self.bounds.min_instances
            };
            if count > floor
                && let Some(victim) = valid.last()
            {
                debug!(depth, count, floor, %victim, "contracting below low water");
                control.destroy_instances(std::slice::from_ref(victim))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestControl;
    use stratus_core::node::NodeState;
    use stratus_state::SensorStore;

    fn conf(high: u64, low: u64, min: u64) -> EngineConfig {
        EngineConfig {
            queue: Some(QueueBounds {
                high_water: high,
                low_water: low,
                min_instances: min,
            }),
            ..Default::default()
        }
    }

    fn initialized(control: &mut TestControl, conf: &EngineConfig) -> QueueLengthBoundedEngine {
        let mut engine = QueueLengthBoundedEngine::new();
        let sensors = control.sensors.clone();
        engine.initialize(control, &sensors, conf).unwrap();
        engine
    }

    fn settle(control: &TestControl) {
        // Every instance still booting finishes its boot.
        use stratus_core::control::StateView;
        use stratus_core::messages::SensorKind;
        for node_id in control.launched_node_ids() {
            let series = control.sensors.get(SensorKind::InstanceState, &node_id);
            if series.last().and_then(|item| item.node_state()).is_some_and(|s| s.is_booting()) {
                control.sensors.record_instance_state(&node_id, NodeState::Running);
            }
        }
    }

    fn running_count(control: &TestControl) -> usize {
        capacity::valid_instances(&control.sensors).len()
    }

    #[test]
    fn initialize_requires_queue_bounds() {
        let mut control = TestControl::new(SensorStore::new());
        let mut engine = QueueLengthBoundedEngine::new();
        let sensors = control.sensors.clone();
        let result = engine.initialize(&mut control, &sensors, &EngineConfig::default());
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn depth_sequence_drives_expected_counts() {
        // Scenario: high=50, low=10, min=0; depths [0,9,51,5,0] must yield
        // instance counts [0,1,2,1,0].
        let sensors = SensorStore::new();
        let mut control = TestControl::new(sensors.clone());
        let mut engine = initialized(&mut control, &conf(50, 10, 0));

        let mut observed = Vec::new();
        for depth in [0u64, 9, 51, 5, 0] {
            sensors.record_queue_length("q-1", depth);
            engine.decide(&mut control, &sensors).unwrap();
            settle(&control);
            observed.push(running_count(&control));
        }
        assert_eq!(observed, vec![0, 1, 2, 1, 0]);
    }

    #[test]
    fn holds_within_band() {
        let sensors = SensorStore::new();
        let mut control = TestControl::new(sensors.clone());
        let mut engine = initialized(&mut control, &conf(50, 10, 0));

        sensors.record_instance_state("n-1", NodeState::Running);
        sensors.record_queue_length("q-1", 30);
        engine.decide(&mut control, &sensors).unwrap();
        assert_eq!(control.command_count(), 0);
    }

    #[test]
    fn holds_while_booting() {
        let sensors = SensorStore::new();
        let mut control = TestControl::new(sensors.clone());
        let mut engine = initialized(&mut control, &conf(50, 10, 0));

        sensors.record_queue_length("q-1", 200);
        engine.decide(&mut control, &sensors).unwrap();
        assert_eq!(control.launches.len(), 1);

        // Still booting: a deeper queue does not stack another launch.
        sensors.record_queue_length("q-1", 500);
        engine.decide(&mut control, &sensors).unwrap();
        assert_eq!(control.launches.len(), 1);
    }

    #[test]
    fn respects_min_instances_floor() {
        let sensors = SensorStore::new();
        let mut control = TestControl::new(sensors.clone());
        let mut engine = initialized(&mut control, &conf(50, 10, 2));

        sensors.record_instance_state("n-1", NodeState::Running);
        sensors.record_instance_state("n-2", NodeState::Running);
        sensors.record_queue_length("q-1", 0);
        engine.decide(&mut control, &sensors).unwrap();
        assert_eq!(control.destroyed.len(), 0);
    }

    #[test]
    fn keeps_one_consumer_while_queue_nonempty() {
        let sensors = SensorStore::new();
        let mut control = TestControl::new(sensors.clone());
        let mut engine = initialized(&mut control, &conf(50, 10, 0));

        sensors.record_instance_state("n-1", NodeState::Running);
        sensors.record_queue_length("q-1", 3);
        engine.decide(&mut control, &sensors).unwrap();
        // Depth 3 is below low water, but the queue is non-empty.
        assert_eq!(control.destroyed.len(), 0);
    }
}
