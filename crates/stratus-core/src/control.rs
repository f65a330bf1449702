//! The seams between decision engines and the rest of the system.
//!
//! `Control` is the only channel through which an engine may effect change;
//! `StateView` is the only channel through which it may observe state.
//! Launch and destroy calls are fire-and-forget: they return as soon as the
//! request is handed off, and completion is observable only through later
//! sensor updates.

use std::collections::HashMap;
use thiserror::Error;

use crate::messages::{LaunchDescription, SensorKind, StateItem};

/// Errors surfaced by `Control` calls. These are hand-off failures only;
/// provisioning outcomes are reported asynchronously via state records.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid control parameters: {0}")]
    InvalidParameters(String),

    #[error("invalid launch description: {0}")]
    InvalidLaunch(String),

    #[error("provisioner channel unavailable: {0}")]
    ChannelClosed(String),
}

/// Parameters an engine may negotiate via `Control::configure`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlParams {
    /// Desired `decide()` interval in milliseconds. Reprograms the loop timer.
    pub decide_interval_ms: Option<u64>,
    /// Replacement launch-context variables merged into subsequent launches.
    pub provisioner_vars: Option<HashMap<String, String>>,
}

/// Command surface offered to decision engines.
pub trait Control {
    /// Negotiate scheduling and launch-context parameters.
    fn configure(&mut self, params: ControlParams) -> Result<(), ControlError>;

    /// Expand a launch description into a provisioning request.
    ///
    /// Generates a fresh launch id and one fresh node id per requested
    /// instance, fills the ids back into the returned description, records a
    /// `Requesting` sample for each node before returning, and forwards the
    /// expanded request asynchronously. Never blocks for IaaS completion.
    fn launch(
        &mut self,
        deployable_type: &str,
        description: LaunchDescription,
    ) -> Result<(String, LaunchDescription), ControlError>;

    /// Request termination of individual nodes. Fire-and-forget.
    fn destroy_instances(&mut self, node_ids: &[String]) -> Result<(), ControlError>;

    /// Request termination of a whole launch. Fire-and-forget.
    fn destroy_launch(&mut self, launch_id: &str) -> Result<(), ControlError>;
}

/// Read-only query surface offered to decision engines.
pub trait StateView {
    /// All series of the given kind, one inner list per distinct key.
    /// Engines read the last element of a series as the current value.
    fn get_all(&self, kind: SensorKind) -> Vec<Vec<StateItem>>;

    /// One series by key; empty if the key is unknown, never an error.
    fn get(&self, kind: SensorKind, key: &str) -> Vec<StateItem>;
}
