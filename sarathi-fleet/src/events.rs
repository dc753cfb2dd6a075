//! Messages exchanged between the gateway threads
//!
//! Every consumer thread owns one bounded queue and one message type.
//! Producers never block: a full queue is logged and the message is lost.

use crate::cloud::QosKind;
use crate::codec::ShadowDelta;
use crossbeam_channel::{Sender, TrySendError};
use setu_io::mesh::MeshEvent;
use std::borrow::Cow;

/// Input of the fleet orchestrator thread
#[derive(Debug, Clone)]
pub enum FleetMsg {
    /// Decoded report from a robot
    Mesh(MeshEvent),
    CloudConnected,
    CloudDisconnected,
    /// Version-gated desired-state change
    Delta(ShadowDelta),
}

/// Input of the cloud sync thread
#[derive(Debug, Clone)]
pub enum CloudMsg {
    Modem(ModemEvent),
    Client(ClientEvent),
    /// Shadow document to publish
    Publish(Report),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemEvent {
    LteConnected,
    LteDisconnected,
}

/// Outcome reported by the cloud client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    ConnectFailed(String),
    Disconnected,
    /// Raw delta document
    Delta(Vec<u8>),
    /// Delivery confirmed for the message with this id
    PubAck(u32),
}

/// Outgoing shadow document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub kind: QosKind,
    pub payload: Cow<'static, [u8]>,
    pub ack_required: bool,
}

/// Non-blocking producer handle for one consumer queue
#[derive(Debug)]
pub struct Outbox<T> {
    name: &'static str,
    queue: Sender<T>,
}

impl<T> Clone for Outbox<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            queue: self.queue.clone(),
        }
    }
}

impl<T> Outbox<T> {
    pub fn new(name: &'static str, queue: Sender<T>) -> Self {
        Self { name, queue }
    }

    /// Post without blocking; `false` if the message was lost.
    pub fn post(&self, msg: T) -> bool {
        match self.queue.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::error!("{} queue full, message dropped", self.name);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("{} queue closed, message dropped", self.name);
                false
            }
        }
    }
}
