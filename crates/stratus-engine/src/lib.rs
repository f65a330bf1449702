//! stratus-engine — pluggable autoscaling decision policies.
//!
//! A decision engine observes telemetry through the `StateView` seam and
//! effects change only through the `Control` seam. Each policy implements
//! [`Engine`]; the daemon selects one by name at startup (strategy pattern).
//!
//! Policies:
//! - `default` — constant target of 2 instances, never contracts.
//! - `n_preserving` — maintains exactly `preserve_n` valid instances, split
//!   between generic slots and configured unique roles.
//! - `queuelen_bounded` — hysteresis control from a queue-depth reading.
//! - `queuelen_greedy` — monotonic scale-up to the queue depth, for
//!   stress/upper-bound testing.

pub mod capacity;
pub mod config;
pub mod default_engine;
pub mod error;
pub mod n_preserving;
pub mod queue_bounded;
pub mod queue_greedy;

#[cfg(test)]
pub mod test_support;

pub use config::{EngineConfig, EngineConfigUpdate, LaunchSettings, QueueBounds};
pub use default_engine::DefaultEngine;
pub use error::{EngineError, EngineResult};
pub use n_preserving::NPreservingEngine;
pub use queue_bounded::QueueLengthBoundedEngine;
pub use queue_greedy::QueueLengthGreedyEngine;

use stratus_core::control::{Control, StateView};

/// Decide interval engines request unless told otherwise, in milliseconds.
pub const DEFAULT_DECIDE_INTERVAL_MS: u64 = 5_000;

/// A pluggable autoscaling policy.
///
/// `decide` is invoked once per scheduler tick and must be
/// side-effect-idempotent: at target, it issues no commands. `reconfigure`
/// is never invoked concurrently with `decide`.
pub trait Engine: Send {
    /// Validate configuration and negotiate scheduling. Must call
    /// `control.configure(..)` before returning; failure aborts startup
    /// with no partial state.
    fn initialize(
        &mut self,
        control: &mut dyn Control,
        state: &dyn StateView,
        conf: &EngineConfig,
    ) -> EngineResult<()>;

    /// Compute target capacity and issue launch/terminate intents.
    fn decide(&mut self, control: &mut dyn Control, state: &dyn StateView) -> EngineResult<()>;

    /// Atomically replace root-level configuration subtrees. The whole new
    /// configuration is validated before any internal field changes.
    fn reconfigure(
        &mut self,
        control: &mut dyn Control,
        update: &EngineConfigUpdate,
    ) -> EngineResult<()> {
        let _ = (control, update);
        Err(EngineError::ReconfigureUnsupported)
    }
}

/// Construct an engine by policy name.
pub fn by_name(name: &str) -> Option<Box<dyn Engine>> {
    match name {
        "default" => Some(Box::new(DefaultEngine::new())),
        "n_preserving" => Some(Box::new(NPreservingEngine::new())),
        "queuelen_bounded" => Some(Box::new(QueueLengthBoundedEngine::new())),
        "queuelen_greedy" => Some(Box::new(QueueLengthGreedyEngine::new())),
        _ => None,
    }
}
