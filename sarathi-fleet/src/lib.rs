//! SarathiFleet - Fleet orchestrator for mesh-connected robots
//!
//! Keeps a roster of the robots reachable through the SetuIO mesh link,
//! turns cloud shadow deltas into movement and light commands, starts the
//! whole fleet together once every robot has acknowledged, and reports the
//! outcome back to the shadow.

pub mod app;
pub mod cloud;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod mesh_link;
pub mod modem;
pub mod orchestrator;
pub mod roster;

pub use config::FleetConfig;
pub use error::{FleetError, Result};
