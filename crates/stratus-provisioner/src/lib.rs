//! stratus-provisioner — the node lifecycle engine.
//!
//! Expands provision requests into per-node records, drives IaaS and
//! context-broker calls, and runs the periodic reconciliation passes that
//! keep the record store converged with provider reality. All record writes
//! happen on the provisioner task (single-writer per node); provider calls
//! run on worker tasks so nothing here blocks a control loop.

pub mod broker;
pub mod core;
pub mod error;
pub mod iaas;
pub mod notify;
pub mod registry;
pub mod service;
pub mod sim;

pub use broker::{ContextBroker, ContextIdentity, ContextNodeStatus, ContextStatus};
pub use core::{ProvisionerCore, RetryPolicy};
pub use error::{ProvisionerError, ProvisionerResult};
pub use iaas::{IaasDriver, IaasInstance, RunInstancesSpec};
pub use notify::{NodeEventSink, SensorSink};
pub use registry::{DeployableType, DtRegistry, GroupSpec};
pub use service::run;
pub use sim::{SimContextBroker, SimIaasDriver};
