//! Device model, driver dispatch, lifecycle, watchdog and URI routing core
//! for the gateway device management subsystem.
//!
//! This crate is transport-agnostic: it owns the device graph, the driver
//! contract, onboarding, descriptor synchronization and the communication
//! watchdog, but knows nothing about HTTP, Unix sockets, or the property
//! file on disk. A host binary (see the `gatewayd` crate) wires these
//! components to a concrete driver set and an RPC surface.

pub mod descriptor;
pub mod driver;
pub mod error;
pub mod initial_values;
pub mod lifecycle;
pub mod model;
pub mod subsystem;
pub mod uri;
pub mod watchdog;

pub use error::{CoreError, Result};
