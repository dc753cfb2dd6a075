//! Serial port link (UART to the mesh radio)

use super::{BufferSlot, EventSink, Link, LinkEvent};
use crate::error::{Error, Result};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Read timeout, bounds how long the reader takes to notice shutdown
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// [`Link`] over a serial device.
///
/// A reader thread fills two receive buffers in turn and reports them to the
/// sink. Writes are synchronous; completion is signalled once the port has
/// flushed.
pub struct SerialPortLink {
    path: String,
    port: Box<dyn SerialPort>,
    read_chunk: usize,
    sink: Option<EventSink>,
    shutdown: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialPortLink {
    /// Open `path` at `baud_rate`, 8N1.
    pub fn open(path: &str, baud_rate: u32, read_chunk: usize) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(READ_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;
        log::info!("Opened serial port {} at {} baud", path, baud_rate);

        Ok(Self {
            path: path.to_string(),
            port,
            read_chunk: read_chunk.max(1),
            sink: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            reader: None,
        })
    }
}

impl Link for SerialPortLink {
    fn start(&mut self, first: BufferSlot, sink: EventSink) -> Result<()> {
        let port = self.port.try_clone()?;
        let reader_sink = Arc::clone(&sink);
        let shutdown = Arc::clone(&self.shutdown);
        let chunk = self.read_chunk;

        self.shutdown.store(false, Ordering::Relaxed);
        self.reader = Some(
            thread::Builder::new()
                .name("setu-serial-rx".to_string())
                .spawn(move || reader_loop(port, first, chunk, reader_sink, shutdown))?,
        );
        self.sink = Some(sink);
        log::info!("Serial reception enabled on {}", self.path);
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let sink = self.sink.as_ref().ok_or(Error::NotStarted)?;
        match self.port.write_all(bytes).and_then(|_| self.port.flush()) {
            Ok(()) => {
                sink(LinkEvent::TxDone);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                log::warn!("Serial write timed out after partial send");
                sink(LinkEvent::TxAborted);
                Ok(())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take()
            && handle.join().is_err()
        {
            log::error!("Serial reader thread panicked");
        }
        self.sink = None;
    }
}

impl Drop for SerialPortLink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fill the active buffer; when full, swap to the buffer the sink hands back.
fn reader_loop(
    mut port: Box<dyn SerialPort>,
    first: BufferSlot,
    chunk: usize,
    sink: EventSink,
    shutdown: Arc<AtomicBool>,
) {
    let mut buffers = [vec![0u8; chunk], vec![0u8; chunk]];
    let mut active = first;
    let mut filled = 0usize;

    while !shutdown.load(Ordering::Relaxed) {
        let read = port.read(&mut buffers[active.index()][filled..]);
        match read {
            Ok(0) => {}
            Ok(n) => {
                sink(LinkEvent::RxReady {
                    slot: active,
                    data: &buffers[active.index()][filled..filled + n],
                });
                filled += n;
                if filled == chunk {
                    let Some(next) = sink(LinkEvent::RxBufRequest) else {
                        log::error!("No receive buffer provided, disabling reception");
                        break;
                    };
                    let done = active;
                    active = next;
                    filled = 0;
                    sink(LinkEvent::RxBufReleased(done));
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => {}
            Err(e) => {
                log::error!("Serial read error: {}", e);
                sink(LinkEvent::RxStopped);
                filled = 0;
                thread::sleep(Duration::from_millis(10));
            }
        }
    }

    sink(LinkEvent::RxDisabled);
    log::info!("Serial reader exiting");
}
