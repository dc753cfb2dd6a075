//! Serial-to-mesh bridge (mesh radio node role)
//!
//! Frames arriving from the gateway are published on the mesh by the model
//! named in the frame; messages the radio receives travel back up as frames
//! carrying the receiving model and the sender's address.

use crate::config::LinkConfig;
use crate::error::Result;
use crate::frame::Frame;
use crate::transport::{FrameSender, Link, SerialTransport};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Mesh radio below the vendor-message layer
pub trait MeshRadio: Send {
    /// Begin delivering received messages to `inbound`.
    ///
    /// Inbound frames carry the receiving model id and the source address.
    fn start(&mut self, inbound: Sender<Frame>) -> Result<()>;

    /// Publish `frame.payload` from model `frame.model_id` to `frame.address`.
    fn publish(&mut self, frame: &Frame) -> Result<()>;

    fn stop(&mut self);
}

/// Running bridge: transport threads plus the uplink thread
pub struct MeshBridge<R: MeshRadio + 'static> {
    transport: SerialTransport,
    radio: Arc<Mutex<R>>,
    shutdown: Arc<AtomicBool>,
    uplink: Option<JoinHandle<()>>,
}

impl<R: MeshRadio + 'static> MeshBridge<R> {
    pub fn start<L: Link + 'static>(link: L, config: &LinkConfig, radio: R) -> Result<Self> {
        let radio = Arc::new(Mutex::new(radio));
        let (inbound_tx, inbound_rx) = bounded::<Frame>(config.rx_queue_depth);
        radio.lock().start(inbound_tx)?;

        let downlink_radio = Arc::clone(&radio);
        let transport = SerialTransport::start(link, config, move |frame: Frame| {
            if let Err(e) = downlink_radio.lock().publish(&frame) {
                log::error!(
                    "Mesh publish failed (opcode={:#08x}, dst={:#06x}): {}",
                    frame.opcode,
                    frame.address,
                    e
                );
            }
        })?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let uplink_shutdown = Arc::clone(&shutdown);
        let sender = transport.sender();
        let uplink = thread::Builder::new()
            .name("setu-uplink".to_string())
            .spawn(move || uplink_loop(inbound_rx, sender, uplink_shutdown))?;

        log::info!("Mesh bridge running");
        Ok(Self {
            transport,
            radio,
            shutdown,
            uplink: Some(uplink),
        })
    }

    pub fn stats(&self) -> crate::transport::StatsSnapshot {
        self.transport.stats()
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.uplink.take()
            && handle.join().is_err()
        {
            log::error!("Uplink thread panicked");
        }
        self.radio.lock().stop();
        self.transport.shutdown();
    }
}

impl<R: MeshRadio + 'static> Drop for MeshBridge<R> {
    fn drop(&mut self) {
        if self.uplink.is_some() {
            self.shutdown();
        }
    }
}

fn uplink_loop(inbound: Receiver<Frame>, sender: FrameSender, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        match inbound.recv_timeout(Duration::from_millis(100)) {
            Ok(frame) => {
                // Full FIFO is already logged by the sender
                let _ = sender.send(frame);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    log::info!("Uplink thread exiting");
}
