//! Provisioner service task.
//!
//! Single consumer of the command channel plus a periodic reconciliation
//! timer. Commands and passes interleave but never overlap, which is what
//! keeps the per-node single-writer rule trivially true.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use stratus_core::messages::ProvisionerCommand;

use crate::core::ProvisionerCore;

/// Run the provisioner until the command channel closes or shutdown fires.
pub async fn run(
    core: ProvisionerCore,
    mut commands: mpsc::Receiver<ProvisionerCommand>,
    query_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(?query_interval, "provisioner service started");
    // One timer that survives command arrivals: a sleep re-created inside
    // the loop would be reset by every received command, and steady command
    // traffic could starve reconciliation entirely.
    let mut ticker = tokio::time::interval(query_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(command) => handle(&core, command).await,
                    None => {
                        info!("command channel closed, provisioner stopping");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                debug!("reconciliation tick");
                core.query().await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("shutdown signal received, provisioner stopping");
                    break;
                }
            }
        }
    }
}

async fn handle(core: &ProvisionerCore, command: ProvisionerCommand) {
    match command {
        ProvisionerCommand::Provision(request) => {
            core.execute_provision_request(&request).await;
        }
        ProvisionerCommand::TerminateNodes(node_ids) => {
            core.terminate_nodes(&node_ids).await;
        }
        ProvisionerCommand::TerminateLaunches(launch_ids) => {
            core.terminate_launches(&launch_ids).await;
        }
        ProvisionerCommand::Query => {
            core.query().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::SensorSink;
    use crate::registry::{DeployableType, DtRegistry, GroupSpec};
    use crate::sim::SimIaasDriver;
    use std::collections::HashMap;
    use std::sync::Arc;
    use stratus_core::messages::{NodeGroupRequest, ProvisionRequest};
    use stratus_core::node::NodeState;
    use stratus_state::{ProvisionerStore, SensorStore};

    fn test_core() -> (ProvisionerCore, Arc<SimIaasDriver>) {
        let store = ProvisionerStore::open_in_memory().unwrap();
        let mut registry = DtRegistry::new();
        registry.register(
            "base-cluster",
            DeployableType {
                document: "<cluster/>".to_string(),
                groups: [(
                    "workers".to_string(),
                    GroupSpec {
                        image: "ami-1234".to_string(),
                        sshkeyname: None,
                    },
                )]
                .into(),
                context_enabled: false,
            },
        );
        let sensors = SensorStore::new();
        let driver = Arc::new(SimIaasDriver::new());
        let core = ProvisionerCore::new(store, registry, Arc::new(SensorSink::new(sensors)))
            .with_site("site1", driver.clone());
        (core, driver)
    }

    fn request(launch_id: &str, node_id: &str) -> ProvisionRequest {
        ProvisionRequest {
            deployable_type: "base-cluster".to_string(),
            launch_id: launch_id.to_string(),
            nodes: [(
                "workers".to_string(),
                NodeGroupRequest {
                    ids: vec![node_id.to_string()],
                    site: "site1".to_string(),
                    allocation: None,
                    data: HashMap::new(),
                },
            )]
            .into(),
            subscribers: Vec::new(),
        }
    }

    fn provision(launch_id: &str, node_id: &str) -> ProvisionerCommand {
        ProvisionerCommand::Provision(request(launch_id, node_id))
    }

    #[tokio::test]
    async fn commands_are_processed_until_channel_close() {
        let (core, _driver) = test_core();
        let store = core.store().clone();
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let service = tokio::spawn(run(core, rx, Duration::from_secs(3600), shutdown_rx));

        tx.send(provision("l-1", "n-1")).await.unwrap();
        tx.send(ProvisionerCommand::TerminateNodes(vec!["n-1".to_string()]))
            .await
            .unwrap();
        drop(tx);
        service.await.unwrap();

        let latest = store.latest_node("n-1").unwrap().unwrap();
        assert_eq!(latest.state, NodeState::Terminated);
    }

    #[tokio::test]
    async fn shutdown_signal_stops_the_service() {
        let (core, _driver) = test_core();
        let (_tx, rx) = mpsc::channel::<ProvisionerCommand>(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let service = tokio::spawn(run(core, rx, Duration::from_secs(3600), shutdown_rx));
        shutdown_tx.send(true).unwrap();
        service.await.unwrap();
    }

    #[tokio::test]
    async fn reconciliation_ticks_despite_steady_command_traffic() {
        let (core, driver) = test_core();
        let core = core.with_stale_after(Duration::ZERO);
        let store = core.store().clone();

        core.execute_provision_request(&request("l-1", "n-1")).await;
        let iaas_id = store.latest_node("n-1").unwrap().unwrap().iaas_id.unwrap();
        driver.vanish(&iaas_id);

        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run(core, rx, Duration::from_millis(50), shutdown_rx));

        // Commands arrive faster than the query interval; the timer must
        // still fire and declare the vanished node gone.
        let mut terminated = false;
        for _ in 0..40 {
            tx.send(ProvisionerCommand::TerminateNodes(vec![
                "no-such-node".to_string(),
            ]))
            .await
            .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            if store.latest_node("n-1").unwrap().unwrap().state == NodeState::Terminated {
                terminated = true;
                break;
            }
        }
        assert!(terminated, "command traffic starved the reconciliation timer");
    }
}
