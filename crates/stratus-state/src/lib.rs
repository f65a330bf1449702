//! stratus-state — state stores for the Stratus control plane.
//!
//! Two stores live here:
//!
//! - [`SensorStore`]: in-memory, per-key time-ordered append logs of
//!   telemetry samples. Decision engines read it through the `StateView`
//!   seam; the provisioner republishes lifecycle changes into it, closing
//!   the control loop.
//! - [`ProvisionerStore`]: durable, append-only record log of launch/node
//!   lifecycle history backed by [redb](https://docs.rs/redb). Every write
//!   creates a brand-new composite key, so concurrent updaters of different
//!   records never race on read-modify-write.
//!
//! The `ProvisionerStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod group;
pub mod sensor;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use group::{NodeField, group_records};
pub use sensor::SensorStore;
pub use store::ProvisionerStore;
