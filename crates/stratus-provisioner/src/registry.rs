//! Deployable-type registry.
//!
//! A deployable type is a named template resolving to a concrete
//! cluster-launch document plus per-group IaaS defaults (image, keypair).

use std::collections::HashMap;

use crate::error::{ProvisionerError, ProvisionerResult};

/// Per-group IaaS defaults within a deployable type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub image: String,
    pub sshkeyname: Option<String>,
}

/// A resolved deployable type: the launch document and its node groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployableType {
    /// The cluster-launch document handed to the context broker path.
    pub document: String,
    /// Node groups the document defines, keyed by group name.
    pub groups: HashMap<String, GroupSpec>,
    /// Whether launches of this type coordinate through a context broker.
    pub context_enabled: bool,
}

/// In-memory registry of deployable types, loaded once at startup.
#[derive(Debug, Default)]
pub struct DtRegistry {
    types: HashMap<String, DeployableType>,
}

impl DtRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a deployable type.
    pub fn register(&mut self, name: &str, dt: DeployableType) {
        self.types.insert(name.to_string(), dt);
    }

    /// Resolve a deployable type by name.
    pub fn resolve(&self, name: &str) -> ProvisionerResult<DeployableType> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| ProvisionerError::UnknownDeployableType(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_known_type() {
        let mut registry = DtRegistry::new();
        registry.register(
            "base-cluster",
            DeployableType {
                document: "<cluster/>".to_string(),
                groups: [(
                    "workers".to_string(),
                    GroupSpec {
                        image: "ami-1234".to_string(),
                        sshkeyname: Some("ops".to_string()),
                    },
                )]
                .into(),
                context_enabled: true,
            },
        );

        let dt = registry.resolve("base-cluster").unwrap();
        assert_eq!(dt.groups["workers"].image, "ami-1234");
    }

    #[test]
    fn resolve_unknown_type_fails() {
        let registry = DtRegistry::new();
        assert!(matches!(
            registry.resolve("nope"),
            Err(ProvisionerError::UnknownDeployableType(_))
        ));
    }
}
