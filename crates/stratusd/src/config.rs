//! Daemon configuration file.
//!
//! One TOML document declares the engine, its configuration tree, the
//! deployable types, and the sites. Example:
//!
//! ```toml
//! [engine]
//! name = "n_preserving"
//!
//! [engine.config]
//! preserve_n = 2
//!
//! [sites.site1]
//! driver = "sim"
//!
//! [deployable_types.base-cluster]
//! document = "<cluster/>"
//! context_enabled = true
//!
//! [deployable_types.base-cluster.groups.workers]
//! image = "ami-1234"
//! sshkeyname = "ops"
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use stratus_engine::EngineConfig;
use stratus_provisioner::{DeployableType, DtRegistry, GroupSpec, RetryPolicy};

#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    pub engine: EngineSection,
    #[serde(default)]
    pub provisioner: ProvisionerSection,
    pub sites: HashMap<String, SiteSection>,
    pub deployable_types: HashMap<String, DeployableTypeSection>,
}

#[derive(Debug, Deserialize)]
pub struct EngineSection {
    /// Policy name resolved through `stratus_engine::by_name`.
    pub name: String,
    #[serde(default)]
    pub config: EngineConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProvisionerSection {
    pub query_interval_secs: u64,
    pub stale_after_secs: u64,
    pub retry_attempts: u32,
    pub retry_backoff_secs: u64,
}

impl Default for ProvisionerSection {
    fn default() -> Self {
        Self {
            query_interval_secs: 30,
            stale_after_secs: 90,
            retry_attempts: 3,
            retry_backoff_secs: 2,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SiteSection {
    pub driver: DriverKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Sim,
}

#[derive(Debug, Deserialize)]
pub struct DeployableTypeSection {
    pub document: String,
    #[serde(default)]
    pub context_enabled: bool,
    pub groups: HashMap<String, GroupSection>,
}

#[derive(Debug, Deserialize)]
pub struct GroupSection {
    pub image: String,
    pub sshkeyname: Option<String>,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: DaemonConfig =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        if config.sites.is_empty() {
            anyhow::bail!("config declares no sites");
        }
        if config.deployable_types.is_empty() {
            anyhow::bail!("config declares no deployable types");
        }
        Ok(config)
    }

    pub fn registry(&self) -> DtRegistry {
        let mut registry = DtRegistry::new();
        for (name, dt) in &self.deployable_types {
            registry.register(
                name,
                DeployableType {
                    document: dt.document.clone(),
                    groups: dt
                        .groups
                        .iter()
                        .map(|(group_name, group)| {
                            (
                                group_name.clone(),
                                GroupSpec {
                                    image: group.image.clone(),
                                    sshkeyname: group.sshkeyname.clone(),
                                },
                            )
                        })
                        .collect(),
                    context_enabled: dt.context_enabled,
                },
            );
        }
        registry
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.provisioner.retry_attempts,
            backoff: Duration::from_secs(self.provisioner.retry_backoff_secs),
        }
    }

    pub fn query_interval(&self) -> Duration {
        Duration::from_secs(self.provisioner.query_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.provisioner.stale_after_secs)
    }

    /// Whether any deployable type needs a context broker.
    pub fn needs_broker(&self) -> bool {
        self.deployable_types.values().any(|dt| dt.context_enabled)
    }
}
