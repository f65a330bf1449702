//! N-preserving policy — maintain exactly `preserve_n` valid instances,
//! split between generic slots and configured unique roles.
//!
//! A unique role is addressed by a stable logical id; the engine binds each
//! id to the replaceable instance currently filling it. Bindings live only
//! in the engine: removing a unique id from the configuration queues the
//! bound instance for termination, and the binding is forgotten.

use std::collections::{HashMap, HashSet, VecDeque};

use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use stratus_core::control::{Control, ControlParams, StateView};

use crate::capacity;
use crate::config::{EngineConfig, EngineConfigUpdate, LaunchSettings};
use crate::error::{EngineError, EngineResult};
use crate::{DEFAULT_DECIDE_INTERVAL_MS, Engine};

#[derive(Default)]
pub struct NPreservingEngine {
    conf: EngineConfig,
    settings: LaunchSettings,
    /// unique_id → node id of the instance currently filling the role.
    bindings: HashMap<String, String>,
    /// Instances whose unique role was removed, awaiting termination.
    death_row: VecDeque<String>,
}

impl NPreservingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn launch_unique(
        &mut self,
        control: &mut dyn Control,
        unique_id: &str,
        overrides: &HashMap<String, String>,
    ) -> EngineResult<()> {
        let mut data = self.conf.provisioner_vars.clone();
        data.extend(overrides.clone());
        data.insert("unique_id".to_string(), unique_id.to_string());

        let description = capacity::single_instance(&self.settings, data);
        let (launch_id, filled) = control.launch(&self.settings.deployable_type, description)?;
        let node_id = filled
            .values()
            .flat_map(|group| group.ids.iter())
            .next()
            .ok_or_else(|| EngineError::Config("launch returned no node ids".to_string()))?
            .clone();

        debug!(%unique_id, %node_id, %launch_id, "unique role launched");
        self.bindings.insert(unique_id.to_string(), node_id);
        Ok(())
    }
}

impl Engine for NPreservingEngine {
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
        self.conf = conf.clone();
        info!(
            preserve_n = self.conf.preserve_n,
            uniques = self.conf.unique_instances.len(),
            "n-preserving engine initialized"
        );
        Ok(())
    }

    fn decide(&mut self, control: &mut dyn Control, state: &dyn StateView) -> EngineResult<()> {
        // (a) drain roles flagged for death by a prior reconfigure.
        while let Some(node_id) = self.death_row.pop_front() {
            debug!(%node_id, "terminating instance of removed unique role");
            control.destroy_instances(std::slice::from_ref(&node_id))?;
        }

        let states = capacity::instance_states(state);

        // (b) every configured unique role gets a healthy bound instance.
        let uniques = self.conf.unique_instances.clone();
        for (unique_id, overrides) in &uniques {
            let healthy = self
                .bindings
                .get(unique_id)
                .is_some_and(|node_id| states.get(node_id).is_some_and(|s| s.is_valid()));
            if !healthy {
                self.launch_unique(control, unique_id, overrides)?;
            }
        }

        // (c) fill or trim the generic slots.
        let bound: HashSet<&String> = self.bindings.values().collect();
        let generic_valid: Vec<String> = capacity::valid_instances(state)
            .into_iter()
            .filter(|id| !bound.contains(id))
            .collect();

        let target =
            (self.conf.preserve_n as usize).saturating_sub(self.conf.unique_instances.len());

        if generic_valid.len() < target {
            let deficit = target - generic_valid.len();
            debug!(valid = generic_valid.len(), target, deficit, "expanding generic slots");
            for _ in 0..deficit {
                let description =
                    capacity::single_instance(&self.settings, self.conf.provisioner_vars.clone());
                control.launch(&self.settings.deployable_type, description)?;
            }
        } else if generic_valid.len() > target {
            let excess = generic_valid.len() - target;
            let victims: Vec<String> = generic_valid
                .choose_multiple(&mut rand::thread_rng(), excess)
                .cloned()
                .collect();
            debug!(valid = generic_valid.len(), target, ?victims, "contracting generic slots");
            control.destroy_instances(&victims)?;
        }

        Ok(())
    }

    fn reconfigure(
        &mut self,
        control: &mut dyn Control,
        update: &EngineConfigUpdate,
    ) -> EngineResult<()> {
        // Validate the whole resulting tree before touching any field.
        let next = self.conf.apply(update)?;

        if update.unique_instances.is_some() {
            let removed: Vec<String> = self
                .conf
                .unique_instances
                .keys()
                .filter(|id| !next.unique_instances.contains_key(*id))
                .cloned()
                .collect();
            for unique_id in removed {
                match self.bindings.remove(&unique_id) {
                    Some(node_id) => {
                        debug!(%unique_id, %node_id, "unique role removed, queueing termination");
                        self.death_row.push_back(node_id);
                    }
                    None => warn!(%unique_id, "removed unique role had no bound instance"),
                }
            }
            // Value changes under a surviving key apply lazily, the next
            // time that role needs a replacement launch.
        }

        if let Some(ref vars) = update.provisioner_vars {
            self.settings = LaunchSettings::from_vars(vars);
            control.configure(ControlParams {
                decide_interval_ms: None,
                provisioner_vars: Some(vars.clone()),
            })?;
        }

        info!(preserve_n = next.preserve_n, uniques = next.unique_instances.len(), "reconfigured");
        self.conf = next;
        Ok(())
    }
}
