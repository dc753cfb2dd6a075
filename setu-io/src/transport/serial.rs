//! Framed serial transport
//!
//! Two threads per link:
//!
//! - **setu-rx**: pops completed frames from the receive FIFO and hands them
//!   to the dispatch callback.
//! - **setu-tx**: pops outgoing frames, writes them to the link and waits for
//!   the link's completion signal before taking the next one.
//!
//! Byte reassembly itself happens in the link's event context, inside the
//! [`EventSink`] built here. It never blocks: a full receive FIFO drops the
//! frame with an error log.

use super::{BufferRotation, BufferSlot, EventSink, Link, LinkEvent};
use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameDecoder, FrameState, HEADER_LEN};
use crossbeam_channel::{
    Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often idle worker threads re-check the shutdown flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Transport counters, updated lock-free from any thread
#[derive(Debug, Default)]
pub struct TransportStats {
    frames_rx: AtomicU64,
    frames_tx: AtomicU64,
    rx_dropped: AtomicU64,
    tx_failed: AtomicU64,
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_rx: u64,
    pub frames_tx: u64,
    pub rx_dropped: u64,
    pub tx_failed: u64,
}

impl TransportStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_rx: self.frames_rx.load(Ordering::Relaxed),
            frames_tx: self.frames_tx.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
            tx_failed: self.tx_failed.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Cloneable producer handle for the transmit FIFO
#[derive(Debug, Clone)]
pub struct FrameSender {
    queue: Sender<Frame>,
}

impl FrameSender {
    pub fn new(queue: Sender<Frame>) -> Self {
        Self { queue }
    }

    /// Queue a frame for transmission without blocking.
    pub fn send(&self, frame: Frame) -> Result<()> {
        match self.queue.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                log::error!(
                    "Transmit FIFO full, dropping frame (opcode={:#08x}, addr={:#06x})",
                    frame.opcode,
                    frame.address
                );
                Err(Error::QueueFull("transmit"))
            }
            Err(TrySendError::Disconnected(_)) => Err(Error::ChannelClosed("transmit")),
        }
    }
}

/// Transmit completion, the link's answer to one `send`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxOutcome {
    Done,
    Aborted,
}

/// Receive side state driven from the link's event context
struct RxPath {
    decoder: FrameDecoder,
    rotation: BufferRotation,
    fifo: Sender<Frame>,
    stats: Arc<TransportStats>,
}

impl RxPath {
    fn on_event(&mut self, event: LinkEvent<'_>) -> Option<BufferSlot> {
        match event {
            LinkEvent::RxReady { data, .. } => {
                for &byte in data {
                    match self.decoder.push(byte) {
                        FrameState::Complete(frame) => self.dispatch(frame),
                        FrameState::Dropped(reason) => {
                            log::error!("Inbound frame dropped: {:?}", reason);
                            TransportStats::bump(&self.stats.rx_dropped);
                        }
                        _ => {}
                    }
                }
                None
            }
            LinkEvent::RxBufRequest => Some(self.rotation.on_request()),
            LinkEvent::RxBufReleased(slot) => {
                self.rotation.on_released(slot);
                None
            }
            LinkEvent::RxStopped => {
                if !self.decoder.is_idle() {
                    log::warn!("Reception stopped mid-frame, discarding partial frame");
                    TransportStats::bump(&self.stats.rx_dropped);
                }
                self.decoder.reset();
                None
            }
            LinkEvent::RxDisabled => {
                log::debug!("Reception disabled");
                None
            }
            LinkEvent::TxDone | LinkEvent::TxAborted => None,
        }
    }

    fn dispatch(&self, frame: Frame) {
        match self.fifo.try_send(frame) {
            Ok(()) => TransportStats::bump(&self.stats.frames_rx),
            Err(TrySendError::Full(frame)) => {
                log::error!(
                    "Receive FIFO full, dropping frame (opcode={:#08x}, addr={:#06x})",
                    frame.opcode,
                    frame.address
                );
                TransportStats::bump(&self.stats.rx_dropped);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("Receive thread gone, frame discarded");
            }
        }
    }
}

/// Frame transport over a [`Link`]
pub struct SerialTransport {
    sender: FrameSender,
    stats: Arc<TransportStats>,
    shutdown: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
    tx_thread: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Start the link and both worker threads.
    ///
    /// `dispatch` runs on the receive thread, once per inbound frame, in
    /// arrival order.
    pub fn start<L, D>(mut link: L, config: &LinkConfig, dispatch: D) -> Result<Self>
    where
        L: Link + 'static,
        D: FnMut(Frame) + Send + 'static,
    {
        config.validate()?;
        let (rx_fifo_tx, rx_fifo) = bounded::<Frame>(config.rx_queue_depth);
        let (tx_queue, tx_fifo) = bounded::<Frame>(config.tx_queue_depth);
        // Single-slot channel standing in for the completion semaphore
        let (done_tx, done_rx) = bounded::<TxOutcome>(1);

        let stats = Arc::new(TransportStats::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let rx_path = Mutex::new(RxPath {
            decoder: FrameDecoder::new(config.max_payload_len),
            rotation: BufferRotation::new(),
            fifo: rx_fifo_tx,
            stats: Arc::clone(&stats),
        });
        let sink: EventSink = Arc::new(move |event: LinkEvent<'_>| match event {
            LinkEvent::TxDone => {
                signal(&done_tx, TxOutcome::Done);
                None
            }
            LinkEvent::TxAborted => {
                signal(&done_tx, TxOutcome::Aborted);
                None
            }
            other => rx_path.lock().on_event(other),
        });

        link.start(BufferRotation::FIRST, sink)?;
        log::info!(
            "Transport started (rx depth {}, tx depth {}, max payload {})",
            config.rx_queue_depth,
            config.tx_queue_depth,
            config.max_payload_len
        );

        let rx_shutdown = Arc::clone(&shutdown);
        let rx_thread = thread::Builder::new()
            .name("setu-rx".to_string())
            .spawn(move || rx_loop(rx_fifo, dispatch, rx_shutdown))?;

        let tx_shutdown = Arc::clone(&shutdown);
        let tx_stats = Arc::clone(&stats);
        let tx_timeout = Duration::from_millis(config.tx_timeout_ms);
        let tx_thread = thread::Builder::new()
            .name("setu-tx".to_string())
            .spawn(move || tx_loop(link, tx_fifo, done_rx, tx_timeout, tx_shutdown, tx_stats))?;

        Ok(Self {
            sender: FrameSender::new(tx_queue),
            stats,
            shutdown,
            rx_thread: Some(rx_thread),
            tx_thread: Some(tx_thread),
        })
    }

    /// Handle for queueing outgoing frames from other threads
    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    /// Queue one frame, see [`FrameSender::send`]
    pub fn send(&self, frame: Frame) -> Result<()> {
        self.sender.send(frame)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop both threads and the link. Safe to call twice.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in [self.tx_thread.take(), self.rx_thread.take()]
            .into_iter()
            .flatten()
        {
            if handle.join().is_err() {
                log::error!("Transport thread panicked");
            }
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn signal(done: &Sender<TxOutcome>, outcome: TxOutcome) {
    if done.try_send(outcome).is_err() {
        log::debug!("Unexpected transmit completion {:?} ignored", outcome);
    }
}

fn rx_loop<D: FnMut(Frame)>(fifo: Receiver<Frame>, mut dispatch: D, shutdown: Arc<AtomicBool>) {
    log::info!("Receive thread started");
    while !shutdown.load(Ordering::Relaxed) {
        match fifo.recv_timeout(POLL_INTERVAL) {
            Ok(frame) => {
                log::trace!(
                    "Frame in: opcode={:#08x} model={:#04x} addr={:#06x} len={}",
                    frame.opcode,
                    frame.model_id,
                    frame.address,
                    frame.payload.len()
                );
                dispatch(frame);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    log::info!("Receive thread exiting");
}

fn tx_loop<L: Link>(
    mut link: L,
    fifo: Receiver<Frame>,
    done: Receiver<TxOutcome>,
    timeout: Duration,
    shutdown: Arc<AtomicBool>,
    stats: Arc<TransportStats>,
) {
    log::info!("Transmit thread started");
    // Reused for every frame
    let mut wire = Vec::with_capacity(HEADER_LEN + 64);

    while !shutdown.load(Ordering::Relaxed) {
        let frame = match fifo.recv_timeout(POLL_INTERVAL) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // A late completion from a timed-out send must not satisfy this one
        loop {
            match done.try_recv() {
                Ok(stale) => log::debug!("Discarding stale completion {:?}", stale),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }

        frame.encode_into(&mut wire);
        if let Err(e) = link.send(&wire) {
            log::error!(
                "Send failed, dropping frame (opcode={:#08x}, addr={:#06x}): {}",
                frame.opcode,
                frame.address,
                e
            );
            TransportStats::bump(&stats.tx_failed);
            continue;
        }

        match done.recv_timeout(timeout) {
            Ok(TxOutcome::Done) => TransportStats::bump(&stats.frames_tx),
            Ok(TxOutcome::Aborted) => {
                log::error!(
                    "Transmission aborted, frame dropped (opcode={:#08x}, addr={:#06x})",
                    frame.opcode,
                    frame.address
                );
                TransportStats::bump(&stats.tx_failed);
            }
            Err(RecvTimeoutError::Timeout) => {
                log::error!(
                    "No transmit completion within {:?}, frame dropped (opcode={:#08x})",
                    timeout,
                    frame.opcode
                );
                TransportStats::bump(&stats.tx_failed);
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    link.stop();
    log::info!("Transmit thread exiting");
}
