//! stratus-controller — the decide loop.
//!
//! Owns the engine instance and the `Control` facade through which the
//! engine acts. `decide` and `reconfigure` run serialized on one task, so
//! engines never see concurrent calls.

pub mod client;
pub mod controller;
pub mod error;
pub mod facade;

pub use client::{ControllerClient, reconfigure_channel};
pub use controller::Controller;
pub use error::{ControllerError, ControllerResult};
pub use facade::ControlFacade;
