//! Cloud shadow synchronization
//!
//! The engine tracks LTE and cloud connectivity, reconnects with an
//! exponential backoff, filters deltas through a monotonic version gate and
//! delivers reports at least once.

mod backoff;
mod client;
mod engine;
mod qos;

pub use backoff::Backoff;
pub use client::{CloudClient, TcpShadowClient};
pub use engine::{CloudState, CloudSyncEngine, LteState, VersionGate};
pub use qos::{QosKind, QosMessage, QosQueue};
