//! Greedy queue-length policy — monotonic scale-up to the queue depth.
//!
//! Target capacity is `max(valid_count, queue_depth)`; there is no
//! contraction. Useful for stress and upper-bound testing, not production.

use tracing::{debug, info};

use stratus_core::control::{Control, ControlParams, StateView};

use crate::capacity;
use crate::config::{EngineConfig, LaunchSettings};
use crate::error::EngineResult;
use crate::{DEFAULT_DECIDE_INTERVAL_MS, Engine};

#[derive(Default)]
pub struct QueueLengthGreedyEngine {
    settings: LaunchSettings,
    vars: std::collections::HashMap<String, String>,
}

impl QueueLengthGreedyEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for QueueLengthGreedyEngine {
    fn initialize(
        &mut self,
        control: &mut dyn Control,
        _state: &dyn StateView,
        conf: &EngineConfig,
    ) -> EngineResult<()> {
        conf.validate()?;
        control.configure(ControlParams {
            decide_interval_ms: Some(DEFAULT_DECIDE_INTERVAL_MS),
            provisioner_vars: Some(conf.provisioner_vars.clone()),
        })?;
        self.settings = LaunchSettings::from_vars(&conf.provisioner_vars);
        self.vars = conf.provisioner_vars.clone();
        info!("queue-length greedy engine initialized");
        Ok(())
    }

    fn decide(&mut self, control: &mut dyn Control, state: &dyn StateView) -> EngineResult<()> {
        let depth = capacity::current_queue_depth(state).unwrap_or(0);
        let valid = capacity::valid_instances(state).len() as u64;
        let target = valid.max(depth);

        if target > valid {
            debug!(depth, valid, target, "greedy expansion");
            for _ in 0..(target - valid) {
                let description = capacity::single_instance(&self.settings, self.vars.clone());
                control.launch(&self.settings.deployable_type, description)?;
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

    fn initialized(control: &mut TestControl) -> QueueLengthGreedyEngine {
        let mut engine = QueueLengthGreedyEngine::new();
        let sensors = control.sensors.clone();
        engine
            .initialize(control, &sensors, &EngineConfig::default())
            .unwrap();
        engine
    }

    #[test]
    fn scales_up_to_queue_depth() {
        let sensors = SensorStore::new();
        let mut control = TestControl::new(sensors.clone());
        let mut engine = initialized(&mut control);

        sensors.record_queue_length("q-1", 5);
        engine.decide(&mut control, &sensors).unwrap();
        assert_eq!(control.launches.len(), 5);
    }

    #[test]
    fn never_contracts_on_shrinking_queue() {
        let sensors = SensorStore::new();
        let mut control = TestControl::new(sensors.clone());
        let mut engine = initialized(&mut control);

        sensors.record_queue_length("q-1", 4);
        engine.decide(&mut control, &sensors).unwrap();
        assert_eq!(control.launches.len(), 4);

        sensors.record_queue_length("q-1", 1);
        engine.decide(&mut control, &sensors).unwrap();
        assert_eq!(control.launches.len(), 4);
        assert_eq!(control.destroyed.len(), 0);
    }

    #[test]
    fn tops_up_only_the_difference() {
        let sensors = SensorStore::new();
        sensors.record_instance_state("n-1", NodeState::Running);
        sensors.record_instance_state("n-2", NodeState::Running);
        let mut control = TestControl::new(sensors.clone());
        let mut engine = initialized(&mut control);

        sensors.record_queue_length("q-1", 6);
        engine.decide(&mut control, &sensors).unwrap();
        assert_eq!(control.launches.len(), 4);
    }

    #[test]
    fn idle_queue_is_a_no_op() {
        let sensors = SensorStore::new();
        let mut control = TestControl::new(sensors.clone());
        let mut engine = initialized(&mut control);

        engine.decide(&mut control, &sensors).unwrap();
        assert_eq!(control.command_count(), 0);
    }
}
