//! The controller task: engine ownership and the decide loop.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use stratus_engine::{Engine, EngineConfig, EngineConfigUpdate};
use stratus_state::SensorStore;

use crate::error::ControllerResult;
use crate::facade::ControlFacade;

/// Decide interval used until an engine negotiates its own.
pub const DEFAULT_DECIDE_INTERVAL: Duration = Duration::from_secs(5);

fn new_ticker(interval: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker
}

/// Owns one engine and the facade it acts through.
///
/// All engine entry points run on this task, serialized: a reconfigure is
/// never concurrent with a decide.
pub struct Controller {
    engine: Box<dyn Engine>,
    facade: ControlFacade,
    sensors: SensorStore,
}

impl Controller {
    /// Initialize the engine. Failure aborts startup with no partial state.
    pub fn new(
        mut engine: Box<dyn Engine>,
        mut facade: ControlFacade,
        sensors: SensorStore,
        conf: &EngineConfig,
    ) -> ControllerResult<Self> {
        engine.initialize(&mut facade, &sensors, conf)?;
        Ok(Self {
            engine,
            facade,
            sensors,
        })
    }

    /// Run one decide tick.
    pub fn decide_once(&mut self) -> ControllerResult<()> {
        self.engine.decide(&mut self.facade, &self.sensors)?;
        Ok(())
    }

    /// Apply a configuration update between ticks.
    pub fn reconfigure(&mut self, update: &EngineConfigUpdate) -> ControllerResult<()> {
        self.engine.reconfigure(&mut self.facade, update)?;
        Ok(())
    }

    /// Drive the decide loop until shutdown.
    ///
    /// A failing tick is logged and the loop keeps going; a rejected
    /// reconfigure leaves the running configuration untouched.
    pub async fn run(
        mut self,
        mut updates: mpsc::Receiver<EngineConfigUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(interval = ?self.facade.decide_interval(), "controller started");
        let mut updates_open = true;
        // One timer for the whole loop; a sleep re-created per iteration
        // would be reset by every update arrival. Rebuilt only when a
        // reconfigure reprograms the interval through `configure`.
        let mut interval = self.facade.decide_interval();
        let mut ticker = new_ticker(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("decide tick");
                    if let Err(err) = self.decide_once() {
                        warn!(%err, "decide tick failed");
                    }
                }
                update = updates.recv(), if updates_open => {
                    match update {
                        Some(update) => {
                            if let Err(err) = self.reconfigure(&update) {
                                warn!(%err, "reconfigure rejected");
                            } else {
                                info!("reconfigure applied");
                            }
                            if self.facade.decide_interval() != interval {
                                interval = self.facade.decide_interval();
                                ticker = new_ticker(interval);
                                info!(?interval, "decide interval reprogrammed");
                            }
                        }
                        None => updates_open = false,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown signal received, controller stopping");
                        break;
                    }
                }
            }
        }
    }
}
