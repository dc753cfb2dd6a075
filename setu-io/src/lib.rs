//! SetuIO - Serial link and mesh vendor protocol for the robot fleet
//!
//! This library carries fleet commands and robot reports between the
//! cloud-facing gateway and the mesh radio node:
//!
//! - `frame`: serial link frame codec with an incremental byte decoder
//! - `transport`: framed transport with receive/transmit threads over a `Link`
//! - `mesh`: vendor messages (identity, movement, light, telemetry)
//! - `bridge`: radio node role, forwarding frames to and from the mesh
//! - `sim`: simulated mesh for hardware-free runs

pub mod bridge;
pub mod config;
pub mod error;
pub mod frame;
pub mod mesh;
pub mod sim;
pub mod transport;

// Re-export commonly used types
pub use config::SetuConfig;
pub use error::{Error, Result};
pub use frame::{Frame, FrameDecoder, FrameState};
