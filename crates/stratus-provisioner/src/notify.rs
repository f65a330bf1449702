//! Node event notification.
//!
//! Every persisted state change is announced through a `NodeEventSink`.
//! The production sink republishes instance-state samples into the sensor
//! store, which is how provisioner reality reaches the decision engines.

use tracing::debug;

use stratus_core::node::{LaunchRecord, NodeRecord};
use stratus_state::SensorStore;

/// Receiver for record state changes. Called after the write is durable.
pub trait NodeEventSink: Send + Sync {
    fn node_state(&self, record: &NodeRecord, subscribers: &[String]);

    fn launch_state(&self, record: &LaunchRecord);
}

/// Sink that feeds node transitions back into the sensor store.
pub struct SensorSink {
    sensors: SensorStore,
}

impl SensorSink {
    pub fn new(sensors: SensorStore) -> Self {
        Self { sensors }
    }
}

impl NodeEventSink for SensorSink {
    fn node_state(&self, record: &NodeRecord, subscribers: &[String]) {
        self.sensors
            .record_instance_state(&record.node_id, record.state);
        debug!(
            node_id = %record.node_id,
            state = %record.state,
            subscribers = subscribers.len(),
            "node state published"
        );
    }

    fn launch_state(&self, record: &LaunchRecord) {
        debug!(launch_id = %record.launch_id, state = %record.state, "launch state published");
    }
}
