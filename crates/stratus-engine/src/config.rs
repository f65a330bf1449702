//! Engine configuration tree and its reconfiguration algebra.
//!
//! The tree is shallow: reconfiguration replaces an entire root key's
//! subtree atomically, absent keys are left untouched, and nothing is ever
//! partially merged below the root.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{EngineError, EngineResult};

/// Hysteresis bounds for the queue-length policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueBounds {
    /// Expand by one when depth exceeds this.
    pub high_water: u64,
    /// Contract by one when depth falls below this.
    pub low_water: u64,
    /// Never contract below this many instances.
    #[serde(default)]
    pub min_instances: u64,
}

impl Default for QueueBounds {
    fn default() -> Self {
        Self {
            high_water: 100,
            low_water: 50,
            min_instances: 0,
        }
    }
}

/// Root configuration tree handed to `Engine::initialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Target number of valid instances. Signed so an invalid negative
    /// value can be rejected rather than silently wrapped.
    #[serde(default)]
    pub preserve_n: i64,
    /// Opaque launch-context variables sent to every instance.
    #[serde(default)]
    pub provisioner_vars: HashMap<String, String>,
    /// Per-role overrides for non-interchangeable instances, keyed by a
    /// stable logical id.
    #[serde(default)]
    pub unique_instances: BTreeMap<String, HashMap<String, String>>,
    /// Bounds for the queue-length policies.
    #[serde(default)]
    pub queue: Option<QueueBounds>,
}

impl EngineConfig {
    /// Validate the whole tree. Called before any engine state mutates.
    pub fn validate(&self) -> EngineResult<()> {
        if self.preserve_n < 0 {
            return Err(EngineError::Config(format!(
                "preserve_n must be non-negative, got {}",
                self.preserve_n
            )));
        }
        if self.unique_instances.len() as i64 > self.preserve_n {
            return Err(EngineError::Config(format!(
                "{} unique instances exceed preserve_n={}",
                self.unique_instances.len(),
                self.preserve_n
            )));
        }
        if let Some(ref queue) = self.queue
            && queue.high_water <= queue.low_water
        {
            return Err(EngineError::Config(format!(
                "high_water {} must exceed low_water {}",
                queue.high_water, queue.low_water
            )));
        }
        Ok(())
    }

    /// Apply a root-key replacement update, returning the resulting tree.
    ///
    /// The result is validated as a whole before being returned, so a
    /// caller that only commits on `Ok` gets commit-or-reject semantics
    /// for free.
    pub fn apply(&self, update: &EngineConfigUpdate) -> EngineResult<EngineConfig> {
        let mut next = self.clone();
        if let Some(preserve_n) = update.preserve_n {
            next.preserve_n = preserve_n;
        }
        if let Some(ref vars) = update.provisioner_vars {
            next.provisioner_vars = vars.clone();
        }
        if let Some(ref uniques) = update.unique_instances {
            next.unique_instances = uniques.clone();
        }
        if let Some(ref queue) = update.queue {
            next.queue = Some(queue.clone());
        }
        next.validate()?;
        Ok(next)
    }
}

/// A reconfiguration request: each present field replaces that root key's
/// entire subtree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfigUpdate {
    pub preserve_n: Option<i64>,
    pub provisioner_vars: Option<HashMap<String, String>>,
    pub unique_instances: Option<BTreeMap<String, HashMap<String, String>>>,
    pub queue: Option<QueueBounds>,
}

/// Where and what the reference engines launch.
///
/// Overridable through well-known `provisioner_vars` keys so deployments
/// can retarget without a code change.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSettings {
    pub deployable_type: String,
    pub site: String,
    pub allocation: Option<String>,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            deployable_type: "base-cluster".to_string(),
            site: "site1".to_string(),
            allocation: Some("small".to_string()),
        }
    }
}

impl LaunchSettings {
    /// Build settings from provisioner vars, falling back to defaults.
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let mut settings = Self::default();
        if let Some(dt) = vars.get("deployable_type") {
            settings.deployable_type = dt.clone();
        }
        if let Some(site) = vars.get("site") {
            settings.site = site.clone();
        }
        if let Some(allocation) = vars.get("allocation") {
            settings.allocation = Some(allocation.clone());
        }
        settings
    }
}
