//! LTE modem monitor
//!
//! The modem itself is external; the gateway only needs to know when the
//! data link comes and goes. [`StaticModem`] stands in for a modem driver
//! and reports an attached link after a fixed delay.

use crate::config::ModemConfig;
use crate::events::{CloudMsg, ModemEvent, Outbox};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct StaticModem {
    attach_delay: Duration,
    events: Outbox<CloudMsg>,
}

impl StaticModem {
    pub fn new(config: &ModemConfig, events: Outbox<CloudMsg>) -> Self {
        Self {
            attach_delay: Duration::from_millis(config.attach_delay_ms),
            events,
        }
    }

    pub fn spawn(self, shutdown: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("modem".into())
            .spawn(move || self.run(shutdown))
    }

    fn run(self, shutdown: Arc<AtomicBool>) {
        let attach_at = Instant::now() + self.attach_delay;
        let mut attached = false;
        while !shutdown.load(Ordering::Relaxed) {
            if !attached && Instant::now() >= attach_at {
                info!("LTE link attached");
                attached = self.events.post(CloudMsg::Modem(ModemEvent::LteConnected));
            }
            thread::sleep(POLL_INTERVAL);
        }
        if attached {
            self.events.post(CloudMsg::Modem(ModemEvent::LteDisconnected));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_attach_then_detach_on_shutdown() {
        let (tx, rx) = unbounded();
        let config = ModemConfig { attach_delay_ms: 10 };
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = StaticModem::new(&config, Outbox::new("cloud", tx))
            .spawn(Arc::clone(&shutdown))
            .unwrap();

        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(first, CloudMsg::Modem(ModemEvent::LteConnected)));

        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        let last = rx.try_iter().last().unwrap();
        assert!(matches!(last, CloudMsg::Modem(ModemEvent::LteDisconnected)));
    }
}
