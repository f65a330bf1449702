//! ProvisionerStore — append-only launch/node lifecycle log backed by redb.
//!
//! Every write creates a brand-new composite key
//! (`{launch_id}|{node_id}|{state}|{timestamp}|{nonce}`), so there is no
//! read-modify-write anywhere and concurrent updaters of different records
//! cannot race. "Current state" is an explicit sort by transition time, not
//! a key-iteration-order convention.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use stratus_core::ids;
use stratus_core::node::{LaunchRecord, NodeRecord};

use crate::error::{StateError, StateResult};
use crate::tables::{LAUNCH_RECORDS, NODE_RECORDS};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe append-only record store backed by redb.
#[derive(Clone)]
pub struct ProvisionerStore {
    db: Arc<Database>,
}

impl ProvisionerStore {
    /// Open (or create) a persistent record store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "provisioner store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory record store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory provisioner store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODE_RECORDS).map_err(map_err!(Table))?;
        txn.open_table(LAUNCH_RECORDS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Node records ───────────────────────────────────────────────

    /// Append a node record under a fresh composite key.
    pub fn put_node(&self, record: &NodeRecord) -> StateResult<()> {
        let key = format!(
            "{}|{}|{:03}|{:013}|{}",
            record.launch_id,
            record.node_id,
            record.state.value(),
            record.state_timestamp,
            ids::new_nonce(),
        );
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODE_RECORDS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(node_id = %record.node_id, state = %record.state, "node record appended");
        Ok(())
    }

    /// All node records matching the given launch and/or node id filters,
    /// reverse-chronological. "Current state" is the first element.
    pub fn get_nodes(
        &self,
        launch: Option<&str>,
        node: Option<&str>,
    ) -> StateResult<Vec<NodeRecord>> {
        let prefix = launch.map(|l| format!("{l}|"));
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODE_RECORDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if let Some(ref prefix) = prefix
                && !key.value().starts_with(prefix.as_str())
            {
                continue;
            }
            let record: NodeRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if let Some(node) = node
                && record.node_id != node
            {
                continue;
            }
            results.push(record);
        }
        sort_nodes_latest_first(&mut results);
        Ok(results)
    }

    /// The most recent record for one node, if any.
    pub fn latest_node(&self, node_id: &str) -> StateResult<Option<NodeRecord>> {
        Ok(self.get_nodes(None, Some(node_id))?.into_iter().next())
    }

    /// The most recent record of every node in the store.
    pub fn latest_nodes(&self) -> StateResult<Vec<NodeRecord>> {
        let all = self.get_nodes(None, None)?;
        let mut latest: HashMap<String, NodeRecord> = HashMap::new();
        // `all` is latest-first, so the first record seen per node wins.
        for record in all {
            latest.entry(record.node_id.clone()).or_insert(record);
        }
        let mut records: Vec<NodeRecord> = latest.into_values().collect();
        sort_nodes_latest_first(&mut records);
        Ok(records)
    }

    // ── Launch records ─────────────────────────────────────────────

    /// Append a launch record under a fresh composite key.
    pub fn put_launch(&self, record: &LaunchRecord) -> StateResult<()> {
        let timestamp = ids::epoch_millis();
        let key = format!(
            "{}|{:03}|{:013}|{}",
            record.launch_id,
            record.state.value(),
            timestamp,
            ids::new_nonce(),
        );
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LAUNCH_RECORDS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(launch_id = %record.launch_id, state = %record.state, "launch record appended");
        Ok(())
    }

    /// All launch records matching the optional launch id filter,
    /// reverse-chronological.
    pub fn get_launches(&self, launch: Option<&str>) -> StateResult<Vec<LaunchRecord>> {
        let prefix = launch.map(|l| format!("{l}|"));
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LAUNCH_RECORDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if let Some(ref prefix) = prefix
                && !key.value().starts_with(prefix.as_str())
            {
                continue;
            }
            let record: LaunchRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push((launch_key_order(key.value()), record));
        }
        results.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(results.into_iter().map(|(_, record)| record).collect())
    }

    /// The most recent record for one launch, if any.
    pub fn latest_launch(&self, launch_id: &str) -> StateResult<Option<LaunchRecord>> {
        Ok(self.get_launches(Some(launch_id))?.into_iter().next())
    }

    /// The most recent record of every launch in the store.
    pub fn latest_launches(&self) -> StateResult<Vec<LaunchRecord>> {
        let all = self.get_launches(None)?;
        let mut latest: HashMap<String, LaunchRecord> = HashMap::new();
        for record in all {
            latest.entry(record.launch_id.clone()).or_insert(record);
        }
        Ok(latest.into_values().collect())
    }
}

/// Sort node records latest-first by (transition time, state order).
fn sort_nodes_latest_first(records: &mut [NodeRecord]) {
    records.sort_by(|a, b| {
        (b.state_timestamp, b.state.value()).cmp(&(a.state_timestamp, a.state.value()))
    });
}

/// Extract the (timestamp, state) ordering component from a launch key.
fn launch_key_order(key: &str) -> (u64, u32) {
    let mut parts = key.split('|');
    let _launch_id = parts.next();
    let state = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let timestamp = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    (timestamp, state)
}
