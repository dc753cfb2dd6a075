//! Inbound vendor message decoding
//!
//! Models are registered explicitly. A message is turned into a
//! [`MeshEvent`] only when its model is registered, its opcode is one that
//! model accepts, and the payload has the exact expected length. Everything
//! else is dropped with a debug log.

use super::{
    Address, LightConfig, ModelId, MovementConfig, Opcodes, RobotId, Telemetry, VendorOp,
};
use crate::frame::Frame;

/// Decoded vendor message, tagged with its source address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshEvent {
    /// Robot announced its device id
    Identity { addr: Address, id: RobotId },
    /// Robot stored a movement
    MovementAck { addr: Address },
    /// Robot finished moving
    Telemetry { addr: Address, telemetry: Telemetry },
    /// Gateway configured this robot
    MovementSet { addr: Address, config: MovementConfig },
    /// Gateway released the fleet
    MovementReady { addr: Address },
    /// Gateway set the indicator
    LightSet { addr: Address, config: LightConfig },
}

impl MeshEvent {
    pub fn source(&self) -> Address {
        match *self {
            MeshEvent::Identity { addr, .. }
            | MeshEvent::MovementAck { addr }
            | MeshEvent::Telemetry { addr, .. }
            | MeshEvent::MovementSet { addr, .. }
            | MeshEvent::MovementReady { addr }
            | MeshEvent::LightSet { addr, .. } => addr,
        }
    }
}

/// Routes raw messages to the registered models
#[derive(Debug, Clone)]
pub struct MeshDispatcher {
    opcodes: Opcodes,
    models: Vec<ModelId>,
}

impl MeshDispatcher {
    pub fn new(opcodes: Opcodes) -> Self {
        Self {
            opcodes,
            models: Vec::new(),
        }
    }

    /// Dispatcher for the gateway: identity, movement and telemetry clients
    pub fn gateway(opcodes: Opcodes) -> Self {
        let mut dispatcher = Self::new(opcodes);
        dispatcher
            .register(ModelId::IdentityClient)
            .register(ModelId::MovementClient)
            .register(ModelId::TelemetryClient)
            .register(ModelId::LightRgbClient);
        dispatcher
    }

    /// Dispatcher for a robot: movement and light servers
    pub fn robot(opcodes: Opcodes) -> Self {
        let mut dispatcher = Self::new(opcodes);
        dispatcher
            .register(ModelId::IdentityServer)
            .register(ModelId::MovementServer)
            .register(ModelId::TelemetryServer)
            .register(ModelId::LightRgbServer);
        dispatcher
    }

    pub fn register(&mut self, model: ModelId) -> &mut Self {
        if !self.models.contains(&model) {
            self.models.push(model);
        }
        self
    }

    pub fn is_registered(&self, model: ModelId) -> bool {
        self.models.contains(&model)
    }

    pub fn dispatch_frame(&self, frame: &Frame) -> Option<MeshEvent> {
        self.dispatch(frame.model_id, frame.opcode, frame.address, &frame.payload)
    }

    /// Decode one message received by `model_id` from `src`.
    pub fn dispatch(
        &self,
        model_id: u32,
        opcode: u32,
        src: Address,
        payload: &[u8],
    ) -> Option<MeshEvent> {
        let Some(model) = ModelId::from_u32(model_id).filter(|m| self.is_registered(*m)) else {
            log::debug!("Message for unregistered model {:#04x} ignored", model_id);
            return None;
        };
        let Some(op) = self.opcodes.resolve(opcode) else {
            log::debug!("Unknown opcode {:#08x} from {:#06x}", opcode, src);
            return None;
        };
        if !model.accepts().contains(&op) {
            log::debug!("{:?} does not accept {:?}", model, op);
            return None;
        }
        if payload.len() != op.payload_len() {
            log::debug!(
                "{:?} from {:#06x}: expected {} bytes, got {}",
                op,
                src,
                op.payload_len(),
                payload.len()
            );
            return None;
        }

        let event = match op {
            VendorOp::IdentityStatus => MeshEvent::Identity {
                addr: src,
                id: RobotId::decode(payload)?,
            },
            VendorOp::MovementAck => MeshEvent::MovementAck { addr: src },
            VendorOp::TelemetryReport => MeshEvent::Telemetry {
                addr: src,
                telemetry: Telemetry::decode(payload)?,
            },
            VendorOp::MovementSet => MeshEvent::MovementSet {
                addr: src,
                config: MovementConfig::decode(payload)?,
            },
            VendorOp::MovementReady => MeshEvent::MovementReady { addr: src },
            VendorOp::LightRgbSet => MeshEvent::LightSet {
                addr: src,
                config: LightConfig::decode(payload)?,
            },
        };
        Some(event)
    }
}
