//! At-least-once delivery bookkeeping
//!
//! Every outgoing document gets a non-zero id. Messages that need an
//! acknowledgement stay pending until the matching PUBACK arrives, and are
//! handed back for redelivery each time their deadline passes.

use std::borrow::Cow;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosKind {
    /// Reported-state update
    ShadowUpdate,
    /// Remove-all document
    ShadowClear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosMessage {
    pub id: u32,
    pub kind: QosKind,
    pub payload: Cow<'static, [u8]>,
    pub ack_required: bool,
}

impl QosMessage {
    /// Payload is released together with the message
    pub fn owns_payload(&self) -> bool {
        matches!(self.payload, Cow::Owned(_))
    }
}

#[derive(Debug)]
struct Pending {
    message: QosMessage,
    due: Instant,
    redeliveries: u32,
}

#[derive(Debug)]
pub struct QosQueue {
    pending: Vec<Pending>,
    capacity: usize,
    redelivery: Duration,
    max_redeliveries: Option<u32>,
    last_id: u32,
}

impl QosQueue {
    pub fn new(capacity: usize, redelivery: Duration, max_redeliveries: Option<u32>) -> Self {
        Self {
            pending: Vec::with_capacity(capacity),
            capacity,
            redelivery,
            max_redeliveries,
            last_id: 0,
        }
    }

    fn next_id(&mut self) -> u32 {
        self.last_id = self.last_id.wrapping_add(1);
        if self.last_id == 0 {
            self.last_id = 1;
        }
        self.last_id
    }

    /// Wrap a payload for its first transmission.
    ///
    /// Ack-required messages are retained for redelivery while there is room;
    /// beyond capacity the message is still sent once, without retention.
    pub fn add(
        &mut self,
        kind: QosKind,
        payload: Cow<'static, [u8]>,
        ack_required: bool,
        now: Instant,
    ) -> QosMessage {
        let message = QosMessage {
            id: self.next_id(),
            kind,
            payload,
            ack_required,
        };
        if ack_required {
            if self.pending.len() < self.capacity {
                self.pending.push(Pending {
                    message: message.clone(),
                    due: now + self.redelivery,
                    redeliveries: 0,
                });
            } else {
                tracing::warn!(
                    "QoS queue full ({}), message {} sent without redelivery",
                    self.capacity,
                    message.id
                );
            }
        }
        message
    }

    /// Settle a pending message; `false` for an unknown id.
    pub fn ack(&mut self, id: u32) -> bool {
        match self.pending.iter().position(|p| p.message.id == id) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => {
                tracing::debug!("PUBACK for unknown message {}", id);
                false
            }
        }
    }

    /// Messages whose redelivery deadline has passed, rescheduled.
    pub fn due(&mut self, now: Instant) -> Vec<QosMessage> {
        let max = self.max_redeliveries;
        let redelivery = self.redelivery;
        let mut out = Vec::new();
        self.pending.retain_mut(|p| {
            if p.due > now {
                return true;
            }
            if max.is_some_and(|max| p.redeliveries >= max) {
                tracing::warn!(
                    "Message {} unacknowledged after {} redeliveries, giving up",
                    p.message.id,
                    p.redeliveries
                );
                return false;
            }
            p.redeliveries += 1;
            p.due = now + redelivery;
            out.push(p.message.clone());
            true
        });
        out
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.due).min()
    }

    /// Drop every pending message, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn contains(&self, id: u32) -> bool {
        self.pending.iter().any(|p| p.message.id == id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
