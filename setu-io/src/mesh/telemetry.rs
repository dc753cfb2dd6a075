//! Telemetry report: revolutions counted during the last movement

use super::{Address, MeshError, MeshTx, ModelId, Opcodes, VendorOp, check_unicast};

/// Telemetry-Report payload length
pub const REPORT_LEN: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Telemetry {
    pub revolutions: u8,
}

impl Telemetry {
    pub fn encode(&self) -> [u8; REPORT_LEN] {
        [self.revolutions]
    }

    pub fn decode(payload: &[u8]) -> Option<Self> {
        match payload {
            [revolutions] => Some(Self {
                revolutions: *revolutions,
            }),
            _ => None,
        }
    }

    /// Publish from a robot to the gateway at `dst`
    pub fn report<T: MeshTx>(
        &self,
        tx: &T,
        opcodes: &Opcodes,
        dst: Address,
    ) -> Result<(), MeshError> {
        check_unicast(dst)?;
        tx.transmit(
            ModelId::TelemetryServer,
            dst,
            opcodes.opcode(VendorOp::TelemetryReport),
            &self.encode(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::testing::RecordingTx;

    #[test]
    fn test_exact_length() {
        assert_eq!(Telemetry::decode(&[7]), Some(Telemetry { revolutions: 7 }));
        assert_eq!(Telemetry::decode(&[]), None);
        assert_eq!(Telemetry::decode(&[1, 2]), None);
    }

    #[test]
    fn test_report_goes_to_gateway() {
        let tx = RecordingTx::default();
        Telemetry { revolutions: 12 }
            .report(&tx, &Opcodes::default(), 0x0001)
            .unwrap();
        let sent = tx.take();
        assert_eq!(sent[0].model, ModelId::TelemetryServer);
        assert_eq!(sent[0].dst, 0x0001);
        assert_eq!(sent[0].opcode, 0x00CF_0059);
        assert_eq!(sent[0].payload, vec![12]);
    }
}
