//! In-memory links for testing and hardware-free runs

use super::{BufferRotation, BufferSlot, EventSink, Link, LinkEvent, deliver_chunk};
use crate::error::{Error, Result};
use crate::frame::Frame;
use parking_lot::Mutex;
use std::sync::Arc;

/// How a [`MockLink`] answers `send`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxCompletion {
    /// Record the bytes and signal `TxDone`
    Done,
    /// Record the bytes and signal `TxAborted`
    Abort,
    /// Record the bytes and never signal
    Silent,
    /// Reject the send outright
    Fail,
}

/// Scriptable link for unit tests
#[derive(Clone)]
pub struct MockLink {
    inner: Arc<Mutex<MockLinkInner>>,
}

struct MockLinkInner {
    sink: Option<EventSink>,
    active: BufferSlot,
    written: Vec<Vec<u8>>,
    completion: TxCompletion,
    stopped: bool,
}

impl MockLink {
    pub fn new() -> Self {
        Self::with_completion(TxCompletion::Done)
    }

    pub fn with_completion(completion: TxCompletion) -> Self {
        MockLink {
            inner: Arc::new(Mutex::new(MockLinkInner {
                sink: None,
                active: BufferRotation::FIRST,
                written: Vec::new(),
                completion,
                stopped: false,
            })),
        }
    }

    /// Deliver bytes as if the radio had sent them.
    ///
    /// Each call fills one receive buffer and rotates to the next.
    pub fn inject(&self, data: &[u8]) {
        let mut inner = self.inner.lock();
        let Some(sink) = inner.sink.clone() else {
            log::warn!("MockLink: inject before start, {} bytes lost", data.len());
            return;
        };
        deliver_chunk(&sink, &mut inner.active, data);
    }

    /// Emit a raw link event (line errors and the like)
    pub fn emit(&self, event: LinkEvent<'_>) -> Option<BufferSlot> {
        let sink = self.inner.lock().sink.clone();
        sink.and_then(|sink| sink(event))
    }

    pub fn set_completion(&self, completion: TxCompletion) {
        self.inner.lock().completion = completion;
    }

    /// Every buffer passed to `send`, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.inner.lock().written.clone()
    }

    /// Written buffers decoded as frames (undecodable ones skipped)
    pub fn written_frames(&self) -> Vec<Frame> {
        self.written()
            .iter()
            .filter_map(|bytes| Frame::decode(bytes).ok())
            .collect()
    }

    pub fn clear_written(&self) {
        self.inner.lock().written.clear();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Link for MockLink {
    fn start(&mut self, first: BufferSlot, sink: EventSink) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.sink = Some(sink);
        inner.active = first;
        inner.stopped = false;
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let (sink, completion) = {
            let mut inner = self.inner.lock();
            let sink = inner.sink.clone().ok_or(Error::NotStarted)?;
            if inner.completion == TxCompletion::Fail {
                return Err(Error::Other("mock link rejected send".to_string()));
            }
            inner.written.push(bytes.to_vec());
            (sink, inner.completion)
        };
        match completion {
            TxCompletion::Done => {
                sink(LinkEvent::TxDone);
            }
            TxCompletion::Abort => {
                sink(LinkEvent::TxAborted);
            }
            TxCompletion::Silent | TxCompletion::Fail => {}
        }
        Ok(())
    }

    fn stop(&mut self) {
        let mut inner = self.inner.lock();
        inner.stopped = true;
        if let Some(sink) = inner.sink.take() {
            sink(LinkEvent::RxDisabled);
        }
    }
}

/// One end of an in-memory crossover cable
pub struct PairLink {
    own: Arc<Mutex<PairEnd>>,
    peer: Arc<Mutex<PairEnd>>,
}

#[derive(Default)]
struct PairEnd {
    sink: Option<EventSink>,
    active: Option<BufferSlot>,
}

/// Two links wired back to back: bytes sent on one are received on the other.
///
/// Bytes sent while the far end is not started are lost, like on a real wire.
pub fn link_pair() -> (PairLink, PairLink) {
    let left = Arc::new(Mutex::new(PairEnd::default()));
    let right = Arc::new(Mutex::new(PairEnd::default()));
    (
        PairLink {
            own: Arc::clone(&left),
            peer: Arc::clone(&right),
        },
        PairLink {
            own: right,
            peer: left,
        },
    )
}

impl Link for PairLink {
    fn start(&mut self, first: BufferSlot, sink: EventSink) -> Result<()> {
        let mut own = self.own.lock();
        own.sink = Some(sink);
        own.active = Some(first);
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let own_sink = self.own.lock().sink.clone().ok_or(Error::NotStarted)?;
        {
            let mut peer = self.peer.lock();
            let PairEnd { sink, active } = &mut *peer;
            match (sink.as_ref(), active.as_mut()) {
                (Some(sink), Some(active)) => deliver_chunk(sink, active, bytes),
                _ => log::debug!("PairLink: far end not started, {} bytes lost", bytes.len()),
            }
        }
        own_sink(LinkEvent::TxDone);
        Ok(())
    }

    fn stop(&mut self) {
        let mut own = self.own.lock();
        own.active = None;
        if let Some(sink) = own.sink.take() {
            sink(LinkEvent::RxDisabled);
        }
    }
}
