//! Mesh vendor protocol
//!
//! Four message families ride on company-scoped 3-octet vendor opcodes:
//!
//! | Family    | Opcode            | Payload                                  | Pattern              |
//! |-----------|-------------------|------------------------------------------|----------------------|
//! | Identity  | Identity-Status   | 6 B device id                            | report (with retry)  |
//! | Movement  | Movement-Set      | 9 B: u32 time, i32 angle, u8 speed (BE)  | request / ack        |
//! | Movement  | Movement-Ack      | 0 B                                      | ack                  |
//! | Movement  | Movement-Ready    | 0 B, broadcast to [`ALL_NODES`]          | fire and forget      |
//! | Telemetry | Telemetry-Report  | 1 B: revolutions                         | one-shot             |
//! | Light     | Light-RGB-Set     | 5 B: u16 blink (BE), r, g, b             | one-shot             |
//!
//! Payload lengths are exact; anything else is rejected at decode.
//!
//! Each family is an independent capability object. The gateway holds
//! clients ([`MovementClient`], [`LightClient`]) and a [`MeshDispatcher`] for
//! inbound reports; a robot composes the server halves in a [`RobotNode`].

pub mod dispatch;
pub mod identity;
pub mod light;
pub mod movement;
pub mod node;
pub mod telemetry;

pub use dispatch::{MeshDispatcher, MeshEvent};
pub use identity::{Announce, IdentityAnnouncer, RobotId};
pub use light::{LightClient, LightConfig, LightServer};
pub use movement::{MovementClient, MovementConfig, MovementServer};
pub use node::{Actuators, RobotNode};
pub use telemetry::Telemetry;

use crate::frame::Frame;
use crate::transport::FrameSender;

/// Company id the robots ship with
pub const DEFAULT_COMPANY_ID: u16 = 0x0059;

/// 16-bit mesh address
pub type Address = u16;

/// Unassigned address, never a valid destination
pub const UNASSIGNED: Address = 0x0000;

/// Reserved wildcard address reaching every node
pub const ALL_NODES: Address = 0xFFFF;

/// True for addresses naming exactly one element
#[inline]
pub fn is_unicast(addr: Address) -> bool {
    addr != UNASSIGNED && addr < 0x8000
}

/// Operation byte of each vendor message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VendorOp {
    IdentityStatus = 0x0A,
    MovementSet = 0x0B,
    MovementAck = 0x0C,
    MovementReady = 0x0D,
    TelemetryReport = 0x0F,
    LightRgbSet = 0x10,
}

impl VendorOp {
    pub const ALL: [VendorOp; 6] = [
        VendorOp::IdentityStatus,
        VendorOp::MovementSet,
        VendorOp::MovementAck,
        VendorOp::MovementReady,
        VendorOp::TelemetryReport,
        VendorOp::LightRgbSet,
    ];

    /// Exact payload length on the wire
    pub const fn payload_len(self) -> usize {
        match self {
            VendorOp::IdentityStatus => identity::ID_LEN,
            VendorOp::MovementSet => movement::SET_LEN,
            VendorOp::MovementAck | VendorOp::MovementReady => 0,
            VendorOp::TelemetryReport => telemetry::REPORT_LEN,
            VendorOp::LightRgbSet => light::SET_LEN,
        }
    }
}

/// 3-octet vendor opcode: `0b11xxxxxx` op byte followed by the company id
pub const fn vendor_opcode(op: u8, company_id: u16) -> u32 {
    0x00C0_0000 | ((op as u32) << 16) | company_id as u32
}

/// Opcode table for one company id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcodes {
    company_id: u16,
}

impl Opcodes {
    pub const fn new(company_id: u16) -> Self {
        Self { company_id }
    }

    pub const fn company_id(&self) -> u16 {
        self.company_id
    }

    #[inline]
    pub const fn opcode(&self, op: VendorOp) -> u32 {
        vendor_opcode(op as u8, self.company_id)
    }

    /// Map a raw opcode back to its operation, if it is one of ours
    pub fn resolve(&self, opcode: u32) -> Option<VendorOp> {
        VendorOp::ALL
            .into_iter()
            .find(|&op| self.opcode(op) == opcode)
    }
}

impl Default for Opcodes {
    fn default() -> Self {
        Self::new(DEFAULT_COMPANY_ID)
    }
}

/// Vendor model ids; client models live on the gateway, servers on robots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ModelId {
    IdentityClient = 0x0B,
    IdentityServer = 0x0C,
    MovementClient = 0x0D,
    MovementServer = 0x0E,
    TelemetryClient = 0x11,
    TelemetryServer = 0x12,
    LightRgbClient = 0x13,
    LightRgbServer = 0x14,
}

impl ModelId {
    pub fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            0x0B => ModelId::IdentityClient,
            0x0C => ModelId::IdentityServer,
            0x0D => ModelId::MovementClient,
            0x0E => ModelId::MovementServer,
            0x11 => ModelId::TelemetryClient,
            0x12 => ModelId::TelemetryServer,
            0x13 => ModelId::LightRgbClient,
            0x14 => ModelId::LightRgbServer,
            _ => return None,
        })
    }

    /// Model on the other end of the exchange
    pub fn peer(self) -> Self {
        match self {
            ModelId::IdentityClient => ModelId::IdentityServer,
            ModelId::IdentityServer => ModelId::IdentityClient,
            ModelId::MovementClient => ModelId::MovementServer,
            ModelId::MovementServer => ModelId::MovementClient,
            ModelId::TelemetryClient => ModelId::TelemetryServer,
            ModelId::TelemetryServer => ModelId::TelemetryClient,
            ModelId::LightRgbClient => ModelId::LightRgbServer,
            ModelId::LightRgbServer => ModelId::LightRgbClient,
        }
    }

    /// Operations this model accepts from the mesh
    pub fn accepts(self) -> &'static [VendorOp] {
        match self {
            ModelId::IdentityClient => &[VendorOp::IdentityStatus],
            ModelId::MovementClient => &[VendorOp::MovementAck],
            ModelId::MovementServer => &[VendorOp::MovementSet, VendorOp::MovementReady],
            ModelId::TelemetryClient => &[VendorOp::TelemetryReport],
            ModelId::LightRgbServer => &[VendorOp::LightRgbSet],
            ModelId::IdentityServer | ModelId::TelemetryServer | ModelId::LightRgbClient => &[],
        }
    }
}

/// Command-side failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MeshError {
    /// Parameters out of range, or a targeted command to a group address
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Destination address is unassigned
    #[error("No destination address")]
    NoDestination,

    /// Carriage is not accepting messages
    #[error("Mesh transport not ready")]
    NotReady,
}

/// Carriage for encoded vendor messages
pub trait MeshTx: Send {
    /// Send `payload` as `opcode` from `model` to `dst`.
    fn transmit(
        &self,
        model: ModelId,
        dst: Address,
        opcode: u32,
        payload: &[u8],
    ) -> std::result::Result<(), MeshError>;
}

/// Gateway side: vendor messages become serial frames for the radio node
impl MeshTx for FrameSender {
    fn transmit(
        &self,
        model: ModelId,
        dst: Address,
        opcode: u32,
        payload: &[u8],
    ) -> std::result::Result<(), MeshError> {
        self.send(Frame::new(opcode, model as u32, dst, payload))
            .map_err(|_| MeshError::NotReady)
    }
}

/// Reject destinations a targeted command must not use
pub(crate) fn check_unicast(dst: Address) -> std::result::Result<(), MeshError> {
    if dst == UNASSIGNED {
        Err(MeshError::NoDestination)
    } else if !is_unicast(dst) {
        Err(MeshError::InvalidArgument("targeted command to a group address"))
    } else {
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_opcode_layout() {
        let opcodes = Opcodes::default();
        assert_eq!(opcodes.opcode(VendorOp::IdentityStatus), 0x00CA_0059);
        assert_eq!(opcodes.opcode(VendorOp::MovementSet), 0x00CB_0059);
        assert_eq!(opcodes.opcode(VendorOp::MovementAck), 0x00CC_0059);
        assert_eq!(opcodes.opcode(VendorOp::MovementReady), 0x00CD_0059);
        assert_eq!(opcodes.opcode(VendorOp::TelemetryReport), 0x00CF_0059);
        assert_eq!(opcodes.opcode(VendorOp::LightRgbSet), 0x00D0_0059);
    }

    #[test]
    fn test_resolve_respects_company_id() {
        let ours = Opcodes::new(0x1234);
        let theirs = Opcodes::default();
        let opcode = theirs.opcode(VendorOp::MovementSet);
        assert_eq!(theirs.resolve(opcode), Some(VendorOp::MovementSet));
        assert_eq!(ours.resolve(opcode), None);
        assert_eq!(ours.resolve(ours.opcode(VendorOp::LightRgbSet)), Some(VendorOp::LightRgbSet));
    }

    #[test]
    fn test_model_ids_round_trip() {
        for raw in [0x0B, 0x0C, 0x0D, 0x0E, 0x11, 0x12, 0x13, 0x14] {
            let model = ModelId::from_u32(raw).unwrap();
            assert_eq!(model as u32, raw);
            assert_eq!(model.peer().peer(), model);
        }
        assert_eq!(ModelId::from_u32(0x0F), None);
    }

    #[test]
    fn test_destination_checks() {
        assert_eq!(check_unicast(UNASSIGNED), Err(MeshError::NoDestination));
        assert!(matches!(check_unicast(ALL_NODES), Err(MeshError::InvalidArgument(_))));
        assert!(matches!(check_unicast(0xC000), Err(MeshError::InvalidArgument(_))));
        assert_eq!(check_unicast(0x0010), Ok(()));
    }

    #[test]
    fn test_frame_sender_carries_model_and_address() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let sender = FrameSender::new(tx);
        sender
            .transmit(ModelId::MovementClient, 0x0010, 0x00CB_0059, &[1, 2])
            .unwrap();
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.model_id, 0x0D);
        assert_eq!(frame.address, 0x0010);
        assert_eq!(frame.payload, vec![1, 2]);

        // Queue full: reported as not ready
        sender.transmit(ModelId::MovementClient, 0x0010, 0, &[]).unwrap();
        assert_eq!(
            sender.transmit(ModelId::MovementClient, 0x0010, 0, &[]),
            Err(MeshError::NotReady)
        );
    }
}
