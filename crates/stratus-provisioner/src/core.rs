//! ProvisionerCore — request expansion, launch execution, reconciliation.
//!
//! The core is `Clone` (all shared fields are behind `Arc`) so per-group
//! launch work can run on `JoinSet` workers while each node stays owned by
//! exactly one writer. Failures are partitioned by group: one group's IaaS
//! trouble never touches another group's nodes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use stratus_core::ids;
use stratus_core::messages::{NodeGroupRequest, ProvisionRequest};
use stratus_core::node::{ContextHandle, LaunchRecord, NodeRecord, NodeState};
use stratus_state::{NodeField, ProvisionerStore, group_records};

use crate::broker::{ContextBroker, ContextStatus};
use crate::error::{ProvisionerError, ProvisionerResult};
use crate::iaas::{IaasDriver, IaasInstance, RunInstancesSpec};
use crate::notify::NodeEventSink;
use crate::registry::{DtRegistry, GroupSpec};

/// Retry schedule for IaaS run calls: total attempts, doubling backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// The provisioner's working state, shared across service and worker tasks.
#[derive(Clone)]
pub struct ProvisionerCore {
    store: ProvisionerStore,
    registry: Arc<DtRegistry>,
    sites: HashMap<String, Arc<dyn IaasDriver>>,
    broker: Option<Arc<dyn ContextBroker>>,
    sink: Arc<dyn NodeEventSink>,
    retry: RetryPolicy,
    /// How long a node may be missing from site listings before it is
    /// declared gone.
    stale_after: Duration,
}

impl ProvisionerCore {
    pub fn new(store: ProvisionerStore, registry: DtRegistry, sink: Arc<dyn NodeEventSink>) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            sites: HashMap::new(),
            broker: None,
            sink,
            retry: RetryPolicy::default(),
            stale_after: Duration::from_secs(90),
        }
    }

    pub fn with_site(mut self, name: &str, driver: Arc<dyn IaasDriver>) -> Self {
        self.sites.insert(name.to_string(), driver);
        self
    }

    pub fn with_broker(mut self, broker: Arc<dyn ContextBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_stale_after(mut self, window: Duration) -> Self {
        self.stale_after = window;
        self
    }

    pub fn store(&self) -> &ProvisionerStore {
        &self.store
    }

    // ── Provisioning ───────────────────────────────────────────────

    /// Handle one provision request end to end.
    ///
    /// This is the outer error boundary: expected failures (bad request,
    /// provider trouble) become `Failed` records with a reason, and anything
    /// unexpected becomes `PROGRAMMER_ERROR` records. Nothing escapes.
    pub async fn execute_provision_request(&self, request: &ProvisionRequest) {
        let (launch, nodes) = match self.prepare_provision(request) {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!(launch_id = %request.launch_id, %err, "provision request rejected");
                self.fail_request(request, &err.to_string());
                return;
            }
        };

        if let Err(err) = self.execute_launch(launch, nodes, request).await {
            error!(launch_id = %request.launch_id, %err, "unexpected provisioning failure");
            self.fail_launch(&request.launch_id, &format!("PROGRAMMER_ERROR {err}"));
        }
    }

    /// Validate a request and persist its launch and node records before any
    /// provider call is attempted. A crash after this point leaves records
    /// for reconciliation to converge, not silence.
    fn prepare_provision(
        &self,
        request: &ProvisionRequest,
    ) -> ProvisionerResult<(LaunchRecord, Vec<NodeRecord>)> {
        if request.nodes.is_empty() {
            return Err(ProvisionerError::InvalidRequest(
                "no node groups in request".to_string(),
            ));
        }
        for (group_name, group) in &request.nodes {
            if group.ids.is_empty() {
                return Err(ProvisionerError::InvalidRequest(format!(
                    "group {group_name} has no node ids"
                )));
            }
        }
        let dt = self.registry.resolve(&request.deployable_type)?;

        let launch = LaunchRecord {
            launch_id: request.launch_id.clone(),
            document: dt.document.clone(),
            deployable_type: request.deployable_type.clone(),
            subscribers: request.subscribers.clone(),
            context: None,
            state: NodeState::Requested,
        };
        self.store.put_launch(&launch)?;
        self.sink.launch_state(&launch);

        let mut nodes = Vec::new();
        for (group_name, group) in &request.nodes {
            let spec = dt.groups.get(group_name);
            for node_id in &group.ids {
                let record = NodeRecord {
                    launch_id: request.launch_id.clone(),
                    node_id: node_id.clone(),
                    state: NodeState::Requested,
                    state_desc: None,
                    site: group.site.clone(),
                    allocation: group.allocation.clone(),
                    ctx_name: Some(group_name.clone()),
                    sshkeyname: spec.and_then(|s| s.sshkeyname.clone()),
                    iaas_id: None,
                    public_ip: None,
                    private_ip: None,
                    extra: group.data.clone(),
                    state_timestamp: ids::epoch_millis(),
                };
                self.store.put_node(&record)?;
                self.sink.node_state(&record, &request.subscribers);
                nodes.push(record);
            }
        }
        info!(
            launch_id = %request.launch_id,
            nodes = nodes.len(),
            "provision request accepted"
        );
        Ok((launch, nodes))
    }

    async fn execute_launch(
        &self,
        mut launch: LaunchRecord,
        nodes: Vec<NodeRecord>,
        request: &ProvisionRequest,
    ) -> ProvisionerResult<()> {
        let dt = self.registry.resolve(&launch.deployable_type)?;

        // The request's groups must match the document's groups exactly,
        // checked before any cloud call is made.
        let mut requested: Vec<&String> = request.nodes.keys().collect();
        let mut declared: Vec<&String> = dt.groups.keys().collect();
        requested.sort();
        declared.sort();
        if requested != declared {
            let desc = "node group mismatch between request and deployable type";
            warn!(launch_id = %launch.launch_id, ?requested, ?declared, "{desc}");
            for mut node in nodes {
                self.record_transition(&mut node, NodeState::Failed, Some(desc), &launch.subscribers)?;
            }
            launch.state = NodeState::Failed;
            self.store.put_launch(&launch)?;
            self.sink.launch_state(&launch);
            return Ok(());
        }

        // One context session per launch, shared by every node group.
        if dt.context_enabled
            && let Some(broker) = &self.broker
        {
            match broker.create_context().await {
                Ok(handle) => {
                    debug!(launch_id = %launch.launch_id, uri = %handle.uri, "context created");
                    launch.context = Some(handle);
                    self.store.put_launch(&launch)?;
                }
                Err(err) => {
                    let desc = format!("context broker unreachable: {err}");
                    warn!(launch_id = %launch.launch_id, %err, "launch failed before run calls");
                    for mut node in nodes {
                        self.record_transition(
                            &mut node,
                            NodeState::Failed,
                            Some(&desc),
                            &launch.subscribers,
                        )?;
                    }
                    launch.state = NodeState::Failed;
                    self.store.put_launch(&launch)?;
                    self.sink.launch_state(&launch);
                    return Ok(());
                }
            }
        }

        // Fan the groups out to workers; each group owns its nodes, so
        // per-node single-writer holds across the concurrency.
        let mut workers: JoinSet<ProvisionerResult<()>> = JoinSet::new();
        for (group_name, group_req) in request.nodes.clone() {
            let group_nodes: Vec<NodeRecord> = nodes
                .iter()
                .filter(|n| n.ctx_name.as_deref() == Some(group_name.as_str()))
                .cloned()
                .collect();
            let spec = dt.groups.get(&group_name).cloned().ok_or_else(|| {
                ProvisionerError::Internal(format!("validated group vanished: {group_name}"))
            })?;
            let core = self.clone();
            let context = launch.context.clone();
            let subscribers = launch.subscribers.clone();
            workers.spawn(async move {
                core.run_group(context, group_name, group_req, spec, group_nodes, subscribers)
                    .await
            });
        }
        while let Some(joined) = workers.join_next().await {
            joined.map_err(|e| ProvisionerError::Internal(e.to_string()))??;
        }

        launch.state = NodeState::Pending;
        self.store.put_launch(&launch)?;
        self.sink.launch_state(&launch);
        Ok(())
    }

    /// Run one node group's IaaS call with retries, then bind the returned
    /// instances to the group's records.
    async fn run_group(
        self,
        context: Option<ContextHandle>,
        group_name: String,
        group_req: NodeGroupRequest,
        spec: GroupSpec,
        mut nodes: Vec<NodeRecord>,
        subscribers: Vec<String>,
    ) -> ProvisionerResult<()> {
        let Some(driver) = self.sites.get(&group_req.site).cloned() else {
            let desc = format!("unknown site: {}", group_req.site);
            warn!(group = %group_name, site = %group_req.site, "group failed: unknown site");
            for node in &mut nodes {
                self.record_transition(node, NodeState::Failed, Some(&desc), &subscribers)?;
            }
            return Ok(());
        };

        let run_spec = RunInstancesSpec {
            count: nodes.len() as u32,
            image: spec.image.clone(),
            allocation: group_req.allocation.clone(),
            sshkeyname: spec.sshkeyname.clone(),
            user_data: build_user_data(context.as_ref(), &group_req.data),
        };

        let mut attempt = 0u32;
        let instances = loop {
            attempt += 1;
            match driver.run_instances(&run_spec).await {
                Ok(instances) => break instances,
                Err(err) if attempt < self.retry.attempts => {
                    let desc = format!("iaas call failed, retrying: {err}");
                    debug!(group = %group_name, attempt, %err, "run call failed, will retry");
                    for node in &mut nodes {
                        self.record_transition(
                            node,
                            NodeState::ErrorRetrying,
                            Some(&desc),
                            &subscribers,
                        )?;
                    }
                    tokio::time::sleep(self.retry.backoff * (1 << (attempt - 1))).await;
                }
                Err(err) => {
                    let desc = format!("iaas failure: {err}");
                    warn!(group = %group_name, attempt, %err, "group provisioning failed");
                    for node in &mut nodes {
                        self.record_transition(node, NodeState::Failed, Some(&desc), &subscribers)?;
                    }
                    return Ok(());
                }
            }
        };

        let mut instances = instances.into_iter();
        for node in &mut nodes {
            match instances.next() {
                Some(instance) => {
                    node.iaas_id = Some(instance.iaas_id);
                    node.public_ip = instance.public_ip;
                    node.private_ip = instance.private_ip;
                    node.extra.extend(instance.extra);
                    self.record_transition(
                        node,
                        NodeState::Pending,
                        Some("instance launched"),
                        &subscribers,
                    )?;
                }
                None => {
                    self.record_transition(
                        node,
                        NodeState::Failed,
                        Some("iaas returned too few instances"),
                        &subscribers,
                    )?;
                }
            }
        }
        Ok(())
    }

    // ── Reconciliation ─────────────────────────────────────────────

    /// One full reconciliation pass: nodes against site listings, then
    /// launches against their context sessions.
    pub async fn query(&self) {
        if let Err(err) = self.query_nodes().await {
            warn!(%err, "node reconciliation pass failed");
        }
        if let Err(err) = self.query_contexts().await {
            warn!(%err, "context reconciliation pass failed");
        }
    }

    /// Reconcile every live node against provider listings, one site at a
    /// time. A failing site skips its nodes this pass; others are untouched.
    pub async fn query_nodes(&self) -> ProvisionerResult<()> {
        let live: Vec<NodeRecord> = self
            .store
            .latest_nodes()?
            .into_iter()
            .filter(|r| !r.state.is_terminal())
            .collect();
        if live.is_empty() {
            return Ok(());
        }
        for (key, nodes) in group_records(&live, &[NodeField::Site]) {
            let site = &key[0];
            if let Err(err) = self.query_one_site(site, nodes).await {
                warn!(%site, %err, "site reconciliation failed");
            }
        }
        Ok(())
    }

    async fn query_one_site(&self, site: &str, nodes: Vec<NodeRecord>) -> ProvisionerResult<()> {
        let Some(driver) = self.sites.get(site).cloned() else {
            warn!(%site, "no driver configured for site");
            return Ok(());
        };
        let by_id: HashMap<String, IaasInstance> = driver
            .list_instances()
            .await?
            .into_iter()
            .map(|i| (i.iaas_id.clone(), i))
            .collect();
        let now = ids::epoch_millis();
        let window = self.stale_after.as_millis() as u64;

        for mut node in nodes {
            let subscribers = self.subscribers_of(&node.launch_id);
            match node.iaas_id.as_ref().and_then(|id| by_id.get(id)) {
                None => {
                    // Grace window covers run calls still in flight and
                    // providers with laggy listings.
                    let age = now.saturating_sub(node.state_timestamp);
                    if age >= window {
                        info!(node_id = %node.node_id, %site, "node disappeared from site");
                        self.record_transition(
                            &mut node,
                            NodeState::Terminated,
                            Some("node disappeared"),
                            &subscribers,
                        )?;
                    }
                }
                Some(instance) => {
                    if node.state == NodeState::Terminating && !instance.state.is_terminal() {
                        // Terminate request raced ahead of provider
                        // visibility; fulfil it now.
                        match driver.terminate_instance(&instance.iaas_id).await {
                            Ok(()) => self.record_transition(
                                &mut node,
                                NodeState::Terminated,
                                Some("terminate fulfilled by reconciliation"),
                                &subscribers,
                            )?,
                            Err(err) => {
                                warn!(node_id = %node.node_id, %err, "terminate retry failed");
                            }
                        }
                    } else if instance.state > node.state {
                        // One-way ratchet: store state only ever advances.
                        if node.public_ip.is_none() {
                            node.public_ip = instance.public_ip.clone();
                        }
                        if node.private_ip.is_none() {
                            node.private_ip = instance.private_ip.clone();
                        }
                        self.record_transition(
                            &mut node,
                            instance.state,
                            Some("state reported by site"),
                            &subscribers,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Poll context sessions for launches still below `Running` and apply
    /// node check-ins; flip a launch to `Running` once every node has
    /// reported a final boot outcome.
    pub async fn query_contexts(&self) -> ProvisionerResult<()> {
        for launch in self.store.latest_launches()? {
            if launch.state >= NodeState::Running {
                continue;
            }
            if let (Some(handle), Some(broker)) = (&launch.context, self.broker.as_ref()) {
                match broker.query_context(handle).await {
                    Ok(status) => self.apply_context_status(&launch, &status)?,
                    Err(err) => {
                        warn!(launch_id = %launch.launch_id, %err, "context query failed");
                        continue;
                    }
                }
            }

            let nodes = self.latest_nodes_for_launch(&launch.launch_id)?;
            if !nodes.is_empty() && nodes.iter().all(|n| !n.state.is_booting()) {
                let mut done = launch.clone();
                done.state = NodeState::Running;
                self.store.put_launch(&done)?;
                self.sink.launch_state(&done);
                info!(launch_id = %done.launch_id, "launch complete");
            }
        }
        Ok(())
    }

    fn apply_context_status(
        &self,
        launch: &LaunchRecord,
        status: &ContextStatus,
    ) -> ProvisionerResult<()> {
        let mut by_ip: HashMap<String, NodeRecord> = self
            .latest_nodes_for_launch(&launch.launch_id)?
            .into_iter()
            .filter_map(|n| n.public_ip.clone().map(|ip| (ip, n)))
            .collect();

        for ctx_node in &status.nodes {
            // Check-ins are matched to records by registered IP.
            let Some(mut node) = ctx_node
                .identities
                .iter()
                .find_map(|identity| by_ip.remove(&identity.ip))
            else {
                continue;
            };
            if ctx_node.error_occurred && !node.state.is_terminal() {
                let code = ctx_node.error_code.unwrap_or(0);
                let message = ctx_node.error_message.as_deref().unwrap_or("unspecified");
                let desc = format!("contextualization error {code}: {message}");
                self.record_transition(
                    &mut node,
                    NodeState::Failed,
                    Some(&desc),
                    &launch.subscribers,
                )?;
            } else if ctx_node.ok_occurred && node.state < NodeState::Running {
                self.record_transition(
                    &mut node,
                    NodeState::Running,
                    Some("contextualization complete"),
                    &launch.subscribers,
                )?;
            }
        }
        Ok(())
    }

    // ── Termination ────────────────────────────────────────────────

    /// Terminate a set of nodes; one node's failure never blocks the rest.
    pub async fn terminate_nodes(&self, node_ids: &[String]) {
        for node_id in node_ids {
            if let Err(err) = self.terminate_node(node_id).await {
                warn!(%node_id, %err, "node termination failed");
            }
        }
    }

    /// Terminate one node. Already-terminal nodes are a no-op; nodes not yet
    /// provider-visible are left `Terminating` for reconciliation to fulfil.
    pub async fn terminate_node(&self, node_id: &str) -> ProvisionerResult<()> {
        let Some(mut node) = self.store.latest_node(node_id)? else {
            warn!(%node_id, "terminate requested for unknown node");
            return Ok(());
        };
        if node.state.is_terminal() {
            debug!(%node_id, state = %node.state, "terminate requested for terminal node");
            return Ok(());
        }
        let subscribers = self.subscribers_of(&node.launch_id);
        self.record_transition(&mut node, NodeState::Terminating, None, &subscribers)?;

        let Some(iaas_id) = node.iaas_id.clone() else {
            debug!(%node_id, "no provider instance yet, awaiting reconciliation");
            return Ok(());
        };
        let Some(driver) = self.sites.get(&node.site).cloned() else {
            warn!(%node_id, site = %node.site, "no driver for site, awaiting reconciliation");
            return Ok(());
        };
        match driver.terminate_instance(&iaas_id).await {
            Ok(()) => {
                self.record_transition(&mut node, NodeState::Terminated, None, &subscribers)?;
            }
            Err(err) => {
                // Leave the record Terminating; the next reconciliation
                // pass retries the provider call.
                warn!(%node_id, %err, "terminate call failed, will reconcile");
            }
        }
        Ok(())
    }

    /// Terminate every non-terminal node of each launch, then close the
    /// launch record itself.
    pub async fn terminate_launches(&self, launch_ids: &[String]) {
        for launch_id in launch_ids {
            if let Err(err) = self.terminate_launch(launch_id).await {
                warn!(%launch_id, %err, "launch termination failed");
            }
        }
    }

    pub async fn terminate_launch(&self, launch_id: &str) -> ProvisionerResult<()> {
        let node_ids: Vec<String> = self
            .latest_nodes_for_launch(launch_id)?
            .into_iter()
            .filter(|n| !n.state.is_terminal())
            .map(|n| n.node_id)
            .collect();
        self.terminate_nodes(&node_ids).await;

        if let Some(mut launch) = self.store.latest_launch(launch_id)?
            && !launch.state.is_terminal()
        {
            launch.state = NodeState::Terminated;
            self.store.put_launch(&launch)?;
            self.sink.launch_state(&launch);
        }
        Ok(())
    }

    // ── Helpers ────────────────────────────────────────────────────

    /// Append a transition record and announce it. The write is durable
    /// before any notification goes out.
    fn record_transition(
        &self,
        node: &mut NodeRecord,
        state: NodeState,
        desc: Option<&str>,
        subscribers: &[String],
    ) -> ProvisionerResult<()> {
        node.transition(state, desc);
        self.store.put_node(node)?;
        self.sink.node_state(node, subscribers);
        Ok(())
    }

    fn latest_nodes_for_launch(&self, launch_id: &str) -> ProvisionerResult<Vec<NodeRecord>> {
        let all = self.store.get_nodes(Some(launch_id), None)?;
        let mut latest: HashMap<String, NodeRecord> = HashMap::new();
        // Latest-first input, so the first record seen per node wins.
        for record in all {
            latest.entry(record.node_id.clone()).or_insert(record);
        }
        Ok(latest.into_values().collect())
    }

    fn subscribers_of(&self, launch_id: &str) -> Vec<String> {
        self.store
            .latest_launch(launch_id)
            .ok()
            .flatten()
            .map(|launch| launch.subscribers)
            .unwrap_or_default()
    }

    /// Mark every non-terminal node of a launch failed, then the launch.
    fn fail_launch(&self, launch_id: &str, desc: &str) {
        let subscribers = self.subscribers_of(launch_id);
        match self.latest_nodes_for_launch(launch_id) {
            Ok(nodes) => {
                for mut node in nodes {
                    if node.state.is_terminal() {
                        continue;
                    }
                    if let Err(err) =
                        self.record_transition(&mut node, NodeState::Failed, Some(desc), &subscribers)
                    {
                        warn!(node_id = %node.node_id, %err, "failed to persist failure record");
                    }
                }
            }
            Err(err) => warn!(%launch_id, %err, "failed to load nodes for failure marking"),
        }
        match self.store.latest_launch(launch_id) {
            Ok(Some(mut launch)) if !launch.state.is_terminal() => {
                launch.state = NodeState::Failed;
                if let Err(err) = self.store.put_launch(&launch) {
                    warn!(%launch_id, %err, "failed to persist launch failure");
                } else {
                    self.sink.launch_state(&launch);
                }
            }
            Ok(_) => {}
            Err(err) => warn!(%launch_id, %err, "failed to load launch for failure marking"),
        }
    }

    /// Persist failure records for a request that was rejected before its
    /// records existed.
    fn fail_request(&self, request: &ProvisionRequest, reason: &str) {
        for (group_name, group) in &request.nodes {
            for node_id in &group.ids {
                let record = NodeRecord {
                    launch_id: request.launch_id.clone(),
                    node_id: node_id.clone(),
                    state: NodeState::Failed,
                    state_desc: Some(reason.to_string()),
                    site: group.site.clone(),
                    allocation: group.allocation.clone(),
                    ctx_name: Some(group_name.clone()),
                    sshkeyname: None,
                    iaas_id: None,
                    public_ip: None,
                    private_ip: None,
                    extra: group.data.clone(),
                    state_timestamp: ids::epoch_millis(),
                };
                if let Err(err) = self.store.put_node(&record) {
                    warn!(node_id = %record.node_id, %err, "failed to persist failure record");
                }
                self.sink.node_state(&record, &request.subscribers);
            }
        }
        let launch = LaunchRecord {
            launch_id: request.launch_id.clone(),
            document: String::new(),
            deployable_type: request.deployable_type.clone(),
            subscribers: request.subscribers.clone(),
            context: None,
            state: NodeState::Failed,
        };
        if let Err(err) = self.store.put_launch(&launch) {
            warn!(launch_id = %launch.launch_id, %err, "failed to persist launch failure");
        }
        self.sink.launch_state(&launch);
    }
}

/// User data handed to instances: the context rendezvous URI plus the
/// group's launch-context variables, as a JSON document.
fn build_user_data(
    context: Option<&ContextHandle>,
    data: &HashMap<String, String>,
) -> Option<String> {
    let mut payload = serde_json::Map::new();
    if let Some(handle) = context {
        payload.insert(
            "context_uri".to_string(),
            serde_json::Value::String(handle.uri.clone()),
        );
    }
    if !data.is_empty() {
        if let Ok(value) = serde_json::to_value(data) {
            payload.insert("data".to_string(), value);
        }
    }
    if payload.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(payload).to_string())
    }
}
