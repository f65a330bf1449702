//! Simulated IaaS driver and context broker.
//!
//! Deterministic in-process providers used by tests and the `sim` site
//! driver. Failure injection is explicit: queue up run-call failures, move
//! instance states by hand, make instances vanish from listings.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use stratus_core::node::{ContextHandle, NodeState};

use crate::broker::{ContextBroker, ContextIdentity, ContextNodeStatus, ContextStatus};
use crate::error::{ProvisionerError, ProvisionerResult};
use crate::iaas::{IaasDriver, IaasInstance, RunInstancesSpec};

// ── IaaS ───────────────────────────────────────────────────────────

#[derive(Default)]
struct SimIaasInner {
    instances: BTreeMap<String, IaasInstance>,
    next_id: u32,
    fail_runs: u32,
    cap_next_run: Option<u32>,
}

/// In-memory IaaS driver with scripted failure injection.
#[derive(Default)]
pub struct SimIaasDriver {
    inner: Mutex<SimIaasInner>,
}

impl SimIaasDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` run calls fail with a simulated outage.
    pub fn fail_next_runs(&self, n: u32) {
        self.lock().fail_runs = n;
    }

    /// Make the next run call return at most `n` instances, regardless of
    /// how many were asked for.
    pub fn cap_next_run(&self, n: u32) {
        self.lock().cap_next_run = Some(n);
    }

    /// Move one instance to a new provider state.
    pub fn advance(&self, iaas_id: &str, state: NodeState) {
        if let Some(instance) = self.lock().instances.get_mut(iaas_id) {
            instance.state = state;
        }
    }

    /// Remove an instance from listings entirely, as if the provider
    /// forgot it ever existed.
    pub fn vanish(&self, iaas_id: &str) {
        self.lock().instances.remove(iaas_id);
    }

    pub fn instance_count(&self) -> usize {
        self.lock().instances.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimIaasInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl IaasDriver for SimIaasDriver {
    async fn run_instances(&self, spec: &RunInstancesSpec) -> ProvisionerResult<Vec<IaasInstance>> {
        let mut inner = self.lock();
        if inner.fail_runs > 0 {
            inner.fail_runs -= 1;
            return Err(ProvisionerError::Iaas("simulated iaas outage".to_string()));
        }

        let count = match inner.cap_next_run.take() {
            Some(cap) => spec.count.min(cap),
            None => spec.count,
        };
        let mut started = Vec::with_capacity(count as usize);
        for _ in 0..count {
            inner.next_id += 1;
            let n = inner.next_id;
            let instance = IaasInstance {
                iaas_id: format!("i-{n:06}"),
                state: NodeState::Pending,
                public_ip: Some(format!("198.51.100.{n}")),
                private_ip: Some(format!("10.0.0.{n}")),
                extra: Default::default(),
            };
            inner
                .instances
                .insert(instance.iaas_id.clone(), instance.clone());
            started.push(instance);
        }
        debug!(count = started.len(), image = %spec.image, "simulated run");
        Ok(started)
    }

    async fn terminate_instance(&self, iaas_id: &str) -> ProvisionerResult<()> {
        let mut inner = self.lock();
        match inner.instances.get_mut(iaas_id) {
            Some(instance) => {
                instance.state = NodeState::Terminated;
                Ok(())
            }
            None => Err(ProvisionerError::Iaas(format!(
                "unknown instance: {iaas_id}"
            ))),
        }
    }

    async fn list_instances(&self) -> ProvisionerResult<Vec<IaasInstance>> {
        Ok(self.lock().instances.values().cloned().collect())
    }
}

// ── Context broker ─────────────────────────────────────────────────

#[derive(Default)]
struct SimBrokerInner {
    next_id: u32,
    contexts: BTreeMap<String, Vec<ContextNodeStatus>>,
}

/// In-memory context broker; tests script node check-ins by hand.
#[derive(Default)]
pub struct SimContextBroker {
    inner: Mutex<SimBrokerInner>,
}

impl SimContextBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ok check-in for the node at `ip` in the given context.
    pub fn report_ok(&self, uri: &str, ip: &str) {
        self.report(
            uri,
            ContextNodeStatus {
                identities: vec![ContextIdentity {
                    ip: ip.to_string(),
                    hostname: None,
                }],
                ok_occurred: true,
                error_occurred: false,
                error_code: None,
                error_message: None,
            },
        );
    }

    /// Record an error check-in for the node at `ip` in the given context.
    pub fn report_error(&self, uri: &str, ip: &str, code: i64, message: &str) {
        self.report(
            uri,
            ContextNodeStatus {
                identities: vec![ContextIdentity {
                    ip: ip.to_string(),
                    hostname: None,
                }],
                ok_occurred: false,
                error_occurred: true,
                error_code: Some(code),
                error_message: Some(message.to_string()),
            },
        );
    }

    fn report(&self, uri: &str, status: ContextNodeStatus) {
        self.lock().contexts.entry(uri.to_string()).or_default().push(status);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimBrokerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ContextBroker for SimContextBroker {
    async fn create_context(&self) -> ProvisionerResult<ContextHandle> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let uri = format!("sim://context/{}", inner.next_id);
        inner.contexts.insert(uri.clone(), Vec::new());
        Ok(ContextHandle { uri })
    }

    async fn query_context(&self, handle: &ContextHandle) -> ProvisionerResult<ContextStatus> {
        let inner = self.lock();
        match inner.contexts.get(&handle.uri) {
            Some(nodes) => Ok(ContextStatus {
                nodes: nodes.clone(),
            }),
            None => Err(ProvisionerError::Broker(format!(
                "unknown context: {}",
                handle.uri
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_then_list_round_trip() {
        let driver = SimIaasDriver::new();
        let spec = RunInstancesSpec {
            count: 3,
            image: "ami-1".to_string(),
            allocation: None,
            sshkeyname: None,
            user_data: None,
        };

        let started = driver.run_instances(&spec).await.unwrap();
        assert_eq!(started.len(), 3);
        assert!(started.iter().all(|i| i.state == NodeState::Pending));
        assert_eq!(driver.list_instances().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn scripted_run_failures_then_recovery() {
        let driver = SimIaasDriver::new();
        driver.fail_next_runs(2);
        let spec = RunInstancesSpec {
            count: 1,
            image: "ami-1".to_string(),
            allocation: None,
            sshkeyname: None,
            user_data: None,
        };

        assert!(driver.run_instances(&spec).await.is_err());
        assert!(driver.run_instances(&spec).await.is_err());
        assert!(driver.run_instances(&spec).await.is_ok());
    }

    #[tokio::test]
    async fn vanish_removes_from_listing() {
        let driver = SimIaasDriver::new();
        let spec = RunInstancesSpec {
            count: 1,
            image: "ami-1".to_string(),
            allocation: None,
            sshkeyname: None,
            user_data: None,
        };
        let started = driver.run_instances(&spec).await.unwrap();

        driver.vanish(&started[0].iaas_id);
        assert!(driver.list_instances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn broker_reports_check_ins() {
        let broker = SimContextBroker::new();
        let handle = broker.create_context().await.unwrap();

        broker.report_ok(&handle.uri, "198.51.100.1");
        broker.report_error(&handle.uri, "198.51.100.2", 42, "bad recipe");

        let status = broker.query_context(&handle).await.unwrap();
        assert_eq!(status.nodes.len(), 2);
        assert!(status.nodes[0].ok_occurred);
        assert!(status.nodes[1].error_occurred);
        assert_eq!(status.nodes[1].error_code, Some(42));
    }
}
