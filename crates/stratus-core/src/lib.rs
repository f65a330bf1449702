//! stratus-core — shared domain model for the Stratus control plane.
//!
//! Defines the node lifecycle state order, the persisted launch/node record
//! shapes, the typed boundary messages exchanged between the controller and
//! the provisioner, and the `Control`/`StateView` seams that decision
//! engines program against. This crate performs no I/O.

pub mod control;
pub mod ids;
pub mod messages;
pub mod node;

pub use control::{Control, ControlError, ControlParams, StateView};
pub use messages::*;
pub use node::{ContextHandle, LaunchRecord, NodeRecord, NodeState};
