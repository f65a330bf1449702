//! Handle for submitting configuration updates to a running controller.

use tokio::sync::mpsc;

use stratus_engine::EngineConfigUpdate;

use crate::error::{ControllerError, ControllerResult};

/// Cloneable handle paired with a controller's update receiver.
#[derive(Clone)]
pub struct ControllerClient {
    updates: mpsc::Sender<EngineConfigUpdate>,
}

impl ControllerClient {
    /// Queue a configuration update; applied between decide ticks.
    pub fn reconfigure(&self, update: EngineConfigUpdate) -> ControllerResult<()> {
        self.updates
            .try_send(update)
            .map_err(|e| ControllerError::ChannelClosed(e.to_string()))
    }
}

/// Create a client plus the receiver to hand to `Controller::run`.
pub fn reconfigure_channel(capacity: usize) -> (ControllerClient, mpsc::Receiver<EngineConfigUpdate>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ControllerClient { updates: tx }, rx)
}
