//! Identity reports
//!
//! A robot announces its factory device id once it joins the mesh. The id
//! register may not be readable right after boot, so the announcer retries
//! on a fixed interval and gives up quietly after a bounded number of tries;
//! a robot that never reports is simply absent from the fleet.

use std::fmt;
use std::time::{Duration, Instant};

/// Device id bytes on the wire
pub const ID_LEN: usize = 6;

/// 48-bit device id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RobotId(u64);

impl RobotId {
    const MASK: u64 = 0xFFFF_FFFF_FFFF;

    /// Upper 16 bits are discarded
    pub const fn new(raw: u64) -> Self {
        Self(raw & Self::MASK)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Little-endian, lowest byte first, as the device id register is read
    pub fn encode(self) -> [u8; ID_LEN] {
        let bytes = self.0.to_le_bytes();
        let mut out = [0u8; ID_LEN];
        out.copy_from_slice(&bytes[..ID_LEN]);
        out
    }

    /// `None` unless `payload` is exactly [`ID_LEN`] bytes
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let bytes: &[u8; ID_LEN] = payload.try_into().ok()?;
        let mut wide = [0u8; 8];
        wide[..ID_LEN].copy_from_slice(bytes);
        Some(Self(u64::from_le_bytes(wide)))
    }
}

/// 12 lower-case hex characters, the key robots are known by in the shadow
impl fmt::Display for RobotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:012x}", self.0)
    }
}

/// What the announcer wants done now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Announce {
    /// Publish this id
    Send(RobotId),
    /// Nothing readable yet, poll again at this instant
    RetryAt(Instant),
    /// Attempts exhausted; the node stays silent
    GaveUp,
    /// No announcement pending
    Idle,
}

/// Retry schedule for the identity report
#[derive(Debug, Clone)]
pub struct IdentityAnnouncer {
    max_retries: u32,
    interval: Duration,
    retries: u32,
    due: Option<Instant>,
}

impl IdentityAnnouncer {
    pub fn new(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries,
            interval,
            retries: 0,
            due: None,
        }
    }

    /// Schedule an announcement, restarting the retry budget
    pub fn start(&mut self, now: Instant) {
        self.retries = 0;
        self.due = Some(now);
    }

    /// Next instant `poll` has work to do
    pub fn deadline(&self) -> Option<Instant> {
        self.due
    }

    /// Try to read the id if an attempt is due.
    pub fn poll<F>(&mut self, now: Instant, read_id: F) -> Announce
    where
        F: FnOnce() -> Option<RobotId>,
    {
        let Some(due) = self.due else {
            return Announce::Idle;
        };
        if now < due {
            return Announce::RetryAt(due);
        }

        if let Some(id) = read_id() {
            self.due = None;
            return Announce::Send(id);
        }

        if self.retries >= self.max_retries {
            self.due = None;
            log::warn!(
                "Device id unavailable after {} retries, identity not reported",
                self.retries
            );
            return Announce::GaveUp;
        }

        self.retries += 1;
        let next = now + self.interval;
        self.due = Some(next);
        Announce::RetryAt(next)
    }
}

impl Default for IdentityAnnouncer {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(50))
    }
}
