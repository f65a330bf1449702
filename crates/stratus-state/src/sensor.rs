//! SensorStore — per-key time-ordered append logs of telemetry samples.
//!
//! Raw sensor messages are classified by shape at ingest: a node-identifying
//! field makes an instance-state sample, a queue-identifying field makes a
//! queue-length sample, and anything else is dropped with a diagnostic —
//! never an error to the caller.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};

use stratus_core::ids;
use stratus_core::messages::{SensorKind, SensorValue, StateItem};
use stratus_core::node::NodeState;
use stratus_core::control::StateView;

#[derive(Default)]
struct Inner {
    series: HashMap<SensorKind, BTreeMap<String, Vec<StateItem>>>,
}

/// In-memory telemetry store shared between the ingest path, the
/// provisioner's notification sink, and the decide loop.
#[derive(Clone, Default)]
pub struct SensorStore {
    inner: Arc<Mutex<Inner>>,
}

impl SensorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify and record a raw sensor message.
    ///
    /// Unrecognized shapes are dropped with a diagnostic.
    pub fn ingest(&self, raw: &Value) {
        if let Some(node_id) = raw.get("node_id").and_then(Value::as_str) {
            match raw
                .get("state")
                .cloned()
                .map(serde_json::from_value::<NodeState>)
            {
                Some(Ok(state)) => self.record_instance_state(node_id, state),
                _ => warn!(%node_id, "dropping instance-state message with bad state field"),
            }
            return;
        }

        if let Some(queue_id) = raw.get("queue_id").and_then(Value::as_str) {
            match raw.get("queuelen").and_then(Value::as_u64) {
                Some(depth) => self.record_queue_length(queue_id, depth),
                None => warn!(%queue_id, "dropping queue-length message with bad queuelen field"),
            }
            return;
        }

        warn!("dropping sensor message of unrecognized shape");
    }

    /// Record a `Requesting` sample the instant a launch is requested,
    /// before any IaaS confirmation. Guarantees `decide()` never
    /// double-counts capacity it just asked for.
    pub fn seed_launch(&self, node_id: &str) {
        self.record_instance_state(node_id, NodeState::Requesting);
        debug!(%node_id, "seeded launch request");
    }

    /// Append an instance-state sample.
    pub fn record_instance_state(&self, node_id: &str, state: NodeState) {
        self.append(SensorKind::InstanceState, node_id, SensorValue::Instance(state));
    }

    /// Append a queue-depth sample.
    pub fn record_queue_length(&self, queue_id: &str, depth: u64) {
        self.append(SensorKind::QueueLength, queue_id, SensorValue::QueueDepth(depth));
    }

    fn append(&self, kind: SensorKind, key: &str, value: SensorValue) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let series = inner
            .series
            .entry(kind)
            .or_default()
            .entry(key.to_string())
            .or_default();

        // Timestamps stay strictly monotonic per key so insertion order and
        // timestamp order never disagree.
        let mut timestamp_ms = ids::epoch_millis();
        if let Some(last) = series.last()
            && last.timestamp_ms >= timestamp_ms
        {
            timestamp_ms = last.timestamp_ms + 1;
        }

        series.push(StateItem {
            kind,
            key: key.to_string(),
            timestamp_ms,
            value,
        });
    }
}

impl StateView for SensorStore {
    fn get_all(&self, kind: SensorKind) -> Vec<Vec<StateItem>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .series
            .get(&kind)
            .map(|by_key| by_key.values().cloned().collect())
            .unwrap_or_default()
    }

    fn get(&self, kind: SensorKind, key: &str) -> Vec<StateItem> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .series
            .get(&kind)
            .and_then(|by_key| by_key.get(key))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ingest_classifies_instance_state() {
        let store = SensorStore::new();
        store.ingest(&json!({"node_id": "n-1", "state": "running"}));

        let series = store.get(SensorKind::InstanceState, "n-1");
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].node_state(), Some(NodeState::Running));
    }

    #[test]
    fn ingest_classifies_queue_length() {
        let store = SensorStore::new();
        store.ingest(&json!({"queue_id": "q-1", "queuelen": 7}));

        let series = store.get(SensorKind::QueueLength, "q-1");
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].queue_depth(), Some(7));
    }

    #[test]
    fn ingest_drops_unrecognized_shapes() {
        let store = SensorStore::new();
        store.ingest(&json!({"bogus": true}));
        store.ingest(&json!({"node_id": "n-1", "state": "not-a-state"}));
        store.ingest(&json!({"queue_id": "q-1", "queuelen": "not-a-number"}));

        assert!(store.get_all(SensorKind::InstanceState).is_empty());
        assert!(store.get_all(SensorKind::QueueLength).is_empty());
    }

    #[test]
    fn seed_launch_records_requesting() {
        let store = SensorStore::new();
        store.seed_launch("n-1");

        let series = store.get(SensorKind::InstanceState, "n-1");
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].node_state(), Some(NodeState::Requesting));
    }

    #[test]
    fn get_unknown_key_is_empty_not_error() {
        let store = SensorStore::new();
        assert!(store.get(SensorKind::InstanceState, "missing").is_empty());
        assert!(store.get_all(SensorKind::QueueLength).is_empty());
    }

    #[test]
    fn get_all_returns_one_series_per_key() {
        let store = SensorStore::new();
        store.record_instance_state("n-1", NodeState::Pending);
        store.record_instance_state("n-1", NodeState::Running);
        store.record_instance_state("n-2", NodeState::Pending);

        let all = store.get_all(SensorKind::InstanceState);
        assert_eq!(all.len(), 2);
        let total: usize = all.iter().map(Vec::len).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn per_key_timestamps_are_strictly_monotonic() {
        let store = SensorStore::new();
        for _ in 0..50 {
            store.record_queue_length("q-1", 1);
        }

        let series = store.get(SensorKind::QueueLength, "q-1");
        for pair in series.windows(2) {
            assert!(pair[0].timestamp_ms < pair[1].timestamp_ms);
        }
    }

    #[test]
    fn last_element_is_current_value() {
        let store = SensorStore::new();
        store.record_instance_state("n-1", NodeState::Requesting);
        store.record_instance_state("n-1", NodeState::Pending);
        store.record_instance_state("n-1", NodeState::Running);

        let series = store.get(SensorKind::InstanceState, "n-1");
        assert_eq!(series.last().unwrap().node_state(), Some(NodeState::Running));
    }
}
