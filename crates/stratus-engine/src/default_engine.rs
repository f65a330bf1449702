//! Default policy — a constant target of two instances, expand-only.

use tracing::{debug, info};

use stratus_core::control::{Control, ControlParams, StateView};

use crate::capacity;
use crate::config::{EngineConfig, LaunchSettings};
use crate::error::EngineResult;
use crate::{DEFAULT_DECIDE_INTERVAL_MS, Engine};

const PRESERVE_N: usize = 2;

/// Always launches up to a constant count, never contracts.
#[derive(Default)]
pub struct DefaultEngine {
    settings: LaunchSettings,
    vars: std::collections::HashMap<String, String>,
}

impl DefaultEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for DefaultEngine {
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
        info!(preserve_n = PRESERVE_N, "default engine initialized");
        Ok(())
    }

    fn decide(&mut self, control: &mut dyn Control, state: &dyn StateView) -> EngineResult<()> {
        let valid = capacity::valid_instances(state).len();
        let deficit = PRESERVE_N.saturating_sub(valid);
        for _ in 0..deficit {
            let description = capacity::single_instance(&self.settings, self.vars.clone());
            control.launch(&self.settings.deployable_type, description)?;
        }
        if deficit > 0 {
            debug!(valid, launched = deficit, "default engine expanded");
        }
        Ok(())
    }
}
