//! Movement model: set / ack / ready
//!
//! The gateway configures each robot with a Movement-Set; the robot stores it
//! and answers with exactly one Movement-Ack. Nothing moves until the
//! gateway broadcasts Movement-Ready, so the whole fleet starts together.

use super::{
    ALL_NODES, Address, MeshError, MeshTx, ModelId, Opcodes, VendorOp, check_unicast,
};

/// Movement-Set payload length
pub const SET_LEN: usize = 9;

/// Highest accepted speed, percent of full
pub const MAX_SPEED_PCT: u8 = 100;

/// One movement: drive for `time_ms`, turning by `angle_deg`, at `speed_pct`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MovementConfig {
    pub time_ms: u32,
    pub angle_deg: i32,
    pub speed_pct: u8,
}

impl MovementConfig {
    pub fn new(time_ms: u32, angle_deg: i32, speed_pct: u8) -> Self {
        Self {
            time_ms,
            angle_deg,
            speed_pct,
        }
    }

    /// `time | angle | speed`, big-endian
    pub fn encode(&self) -> [u8; SET_LEN] {
        let mut out = [0u8; SET_LEN];
        out[0..4].copy_from_slice(&self.time_ms.to_be_bytes());
        out[4..8].copy_from_slice(&self.angle_deg.to_be_bytes());
        out[8] = self.speed_pct;
        out
    }

    /// `None` unless `payload` is exactly [`SET_LEN`] bytes
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let p: &[u8; SET_LEN] = payload.try_into().ok()?;
        Some(Self {
            time_ms: u32::from_be_bytes([p[0], p[1], p[2], p[3]]),
            angle_deg: i32::from_be_bytes([p[4], p[5], p[6], p[7]]),
            speed_pct: p[8],
        })
    }
}

/// Gateway half of the movement model
#[derive(Debug, Clone)]
pub struct MovementClient<T> {
    tx: T,
    opcodes: Opcodes,
}

impl<T: MeshTx> MovementClient<T> {
    pub fn new(tx: T, opcodes: Opcodes) -> Self {
        Self { tx, opcodes }
    }

    /// Configure the robot at `dst`. The robot acknowledges once.
    pub fn set(&self, dst: Address, config: &MovementConfig) -> Result<(), MeshError> {
        check_unicast(dst)?;
        if config.speed_pct > MAX_SPEED_PCT {
            return Err(MeshError::InvalidArgument("speed above 100%"));
        }
        self.tx.transmit(
            ModelId::MovementClient,
            dst,
            self.opcodes.opcode(VendorOp::MovementSet),
            &config.encode(),
        )
    }

    /// Release every configured robot at once. Always the wildcard address.
    pub fn ready(&self) -> Result<(), MeshError> {
        self.tx.transmit(
            ModelId::MovementClient,
            ALL_NODES,
            self.opcodes.opcode(VendorOp::MovementReady),
            &[],
        )
    }
}

/// Robot half of the movement model
#[derive(Debug, Clone, Default)]
pub struct MovementServer {
    stored: Option<MovementConfig>,
}

impl MovementServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a Movement-Set. The caller owes the sender one ack.
    pub fn on_set(&mut self, config: MovementConfig) {
        if let Some(previous) = self.stored.replace(config) {
            log::debug!("Movement {:?} replaced before start", previous);
        }
    }

    /// Movement-Ready: hand out the stored movement, once.
    pub fn on_ready(&mut self) -> Option<MovementConfig> {
        self.stored.take()
    }

    pub fn pending(&self) -> Option<&MovementConfig> {
        self.stored.as_ref()
    }

    /// Ack for a stored set, sent back to `dst` (the configuring client)
    pub fn ack<T: MeshTx>(tx: &T, opcodes: &Opcodes, dst: Address) -> Result<(), MeshError> {
        check_unicast(dst)?;
        tx.transmit(
            ModelId::MovementServer,
            dst,
            opcodes.opcode(VendorOp::MovementAck),
            &[],
        )
    }
}
