//! RGB indicator model
//!
//! One-shot: the gateway sets a color and blink period, the robot applies
//! it. No acknowledgment.

use super::{Address, MeshError, MeshTx, ModelId, Opcodes, VendorOp, check_unicast};

/// Light-RGB-Set payload length
pub const SET_LEN: usize = 5;

/// Indicator color and blink period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightConfig {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub blink_time_ms: u16,
}

impl LightConfig {
    pub const fn new(red: u8, green: u8, blue: u8, blink_time_ms: u16) -> Self {
        Self {
            red,
            green,
            blue,
            blink_time_ms,
        }
    }

    /// `blink (u16 BE) | r | g | b`
    pub fn encode(&self) -> [u8; SET_LEN] {
        let blink = self.blink_time_ms.to_be_bytes();
        [blink[0], blink[1], self.red, self.green, self.blue]
    }

    pub fn decode(payload: &[u8]) -> Option<Self> {
        let p: &[u8; SET_LEN] = payload.try_into().ok()?;
        Some(Self {
            blink_time_ms: u16::from_be_bytes([p[0], p[1]]),
            red: p[2],
            green: p[3],
            blue: p[4],
        })
    }
}

/// Gateway half of the light model
#[derive(Debug, Clone)]
pub struct LightClient<T> {
    tx: T,
    opcodes: Opcodes,
}

impl<T: MeshTx> LightClient<T> {
    pub fn new(tx: T, opcodes: Opcodes) -> Self {
        Self { tx, opcodes }
    }

    pub fn set(&self, dst: Address, config: &LightConfig) -> Result<(), MeshError> {
        check_unicast(dst)?;
        self.tx.transmit(
            ModelId::LightRgbClient,
            dst,
            self.opcodes.opcode(VendorOp::LightRgbSet),
            &config.encode(),
        )
    }
}

/// Robot half of the light model: holds the last applied setting
#[derive(Debug, Clone, Default)]
pub struct LightServer {
    current: Option<LightConfig>,
}

impl LightServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received set; the caller drives the LEDs.
    pub fn on_set(&mut self, config: LightConfig) {
        self.current = Some(config);
    }

    /// Setting currently shown, `None` before the first set
    pub fn current(&self) -> Option<LightConfig> {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::testing::RecordingTx;

    #[test]
    fn test_payload_layout() {
        let config = LightConfig::new(230, 0, 10, 150);
        assert_eq!(config.encode(), [0x00, 0x96, 230, 0, 10]);
        assert_eq!(LightConfig::decode(&config.encode()), Some(config));
        assert_eq!(LightConfig::decode(&[0; 4]), None);
        assert_eq!(LightConfig::decode(&[0; 6]), None);
    }

    #[test]
    fn test_client_set() {
        let tx = RecordingTx::default();
        let client = LightClient::new(tx.clone(), Opcodes::default());
        client.set(0x0020, &LightConfig::new(0, 230, 10, 500)).unwrap();
        assert_eq!(client.set(0, &LightConfig::default()), Err(MeshError::NoDestination));

        let sent = tx.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].model, ModelId::LightRgbClient);
        assert_eq!(sent[0].dst, 0x0020);
        assert_eq!(sent[0].opcode, 0x00D0_0059);
        assert_eq!(sent[0].payload, vec![0x01, 0xF4, 0, 230, 10]);
    }

    #[test]
    fn test_server_keeps_latest_setting() {
        let mut server = LightServer::new();
        assert_eq!(server.current(), None);
        server.on_set(LightConfig::new(230, 0, 0, 0));
        server.on_set(LightConfig::new(0, 0, 230, 250));
        assert_eq!(server.current(), Some(LightConfig::new(0, 0, 230, 250)));
    }
}
