//! Robot-side composition of the vendor models
//!
//! A [`RobotNode`] owns the server halves (identity announcer, movement
//! server, light, telemetry) as separate fields and routes each decoded
//! message to the one that handles it. Motors and LEDs sit behind the
//! [`Actuators`] trait.

use super::{
    Address, Announce, IdentityAnnouncer, LightConfig, LightServer, MeshDispatcher, MeshError,
    MeshEvent, MeshTx, ModelId, MovementConfig, MovementServer, Opcodes, RobotId, Telemetry,
    VendorOp,
};
use std::time::Instant;

/// Hardware behind a robot node
pub trait Actuators: Send {
    /// Factory device id, `None` while not yet readable
    fn device_id(&mut self) -> Option<RobotId>;

    /// A movement was stored and will start on the next ready
    fn configure(&mut self, movement: &MovementConfig);

    /// Start driving. Completion is reported via [`RobotNode::movement_finished`].
    fn start_movement(&mut self, movement: &MovementConfig);

    fn set_light(&mut self, light: &LightConfig);
}

/// One robot on the mesh
pub struct RobotNode<T, A> {
    address: Address,
    gateway: Address,
    tx: T,
    opcodes: Opcodes,
    dispatcher: MeshDispatcher,
    announcer: IdentityAnnouncer,
    movement: MovementServer,
    light: LightServer,
    actuators: A,
}

impl<T: MeshTx, A: Actuators> RobotNode<T, A> {
    pub fn new(
        address: Address,
        gateway: Address,
        tx: T,
        opcodes: Opcodes,
        announcer: IdentityAnnouncer,
        actuators: A,
    ) -> Self {
        Self {
            address,
            gateway,
            tx,
            opcodes,
            dispatcher: MeshDispatcher::robot(opcodes),
            announcer,
            movement: MovementServer::new(),
            light: LightServer::new(),
            actuators,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn actuators(&self) -> &A {
        &self.actuators
    }

    pub fn light(&self) -> Option<LightConfig> {
        self.light.current()
    }

    pub fn actuators_mut(&mut self) -> &mut A {
        &mut self.actuators
    }

    /// Begin the identity announcement (after joining the mesh)
    pub fn announce(&mut self, now: Instant) {
        self.announcer.start(now);
    }

    /// Next instant [`RobotNode::poll`] has work to do
    pub fn deadline(&self) -> Option<Instant> {
        self.announcer.deadline()
    }

    /// Run due timers: the identity retry schedule.
    pub fn poll(&mut self, now: Instant) {
        let actuators = &mut self.actuators;
        match self.announcer.poll(now, || actuators.device_id()) {
            Announce::Send(id) => {
                let result = self.tx.transmit(
                    ModelId::IdentityServer,
                    self.gateway,
                    self.opcodes.opcode(VendorOp::IdentityStatus),
                    &id.encode(),
                );
                match result {
                    Ok(()) => log::info!("Node {:#06x}: announced id {}", self.address, id),
                    Err(e) => log::error!("Node {:#06x}: identity send failed: {}", self.address, e),
                }
            }
            Announce::GaveUp => {
                log::debug!("Node {:#06x}: identity disabled", self.address);
            }
            Announce::RetryAt(_) | Announce::Idle => {}
        }
    }

    /// Handle one message received by `model_id` from `src`.
    pub fn handle(&mut self, model_id: u32, opcode: u32, src: Address, payload: &[u8]) {
        let Some(event) = self.dispatcher.dispatch(model_id, opcode, src, payload) else {
            return;
        };
        match event {
            MeshEvent::MovementSet { addr, config } => {
                self.actuators.configure(&config);
                self.movement.on_set(config);
                if let Err(e) = MovementServer::ack(&self.tx, &self.opcodes, addr) {
                    log::error!("Node {:#06x}: movement ack failed: {}", self.address, e);
                }
            }
            MeshEvent::MovementReady { .. } => match self.movement.on_ready() {
                Some(config) => self.actuators.start_movement(&config),
                None => log::debug!("Node {:#06x}: ready without a stored movement", self.address),
            },
            MeshEvent::LightSet { config, .. } => {
                self.light.on_set(config);
                self.actuators.set_light(&config);
            }
            other => log::debug!("Node {:#06x}: ignoring {:?}", self.address, other),
        }
    }

    /// Report the revolutions counted during the finished movement.
    pub fn movement_finished(&mut self, revolutions: u8) -> Result<(), MeshError> {
        Telemetry { revolutions }.report(&self.tx, &self.opcodes, self.gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::testing::RecordingTx;
    use crate::mesh::ALL_NODES;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeActuators {
        id: Option<RobotId>,
        configured: Vec<MovementConfig>,
        started: Vec<MovementConfig>,
        lights: Vec<LightConfig>,
    }

    impl Actuators for FakeActuators {
        fn device_id(&mut self) -> Option<RobotId> {
            self.id
        }
        fn configure(&mut self, movement: &MovementConfig) {
            self.configured.push(*movement);
        }
        fn start_movement(&mut self, movement: &MovementConfig) {
            self.started.push(*movement);
        }
        fn set_light(&mut self, light: &LightConfig) {
            self.lights.push(*light);
        }
    }

    fn node(id: Option<RobotId>) -> (RobotNode<RecordingTx, FakeActuators>, RecordingTx) {
        let tx = RecordingTx::default();
        let actuators = FakeActuators {
            id,
            ..FakeActuators::default()
        };
        let node = RobotNode::new(
            0x0010,
            0x0001,
            tx.clone(),
            Opcodes::default(),
            IdentityAnnouncer::default(),
            actuators,
        );
        (node, tx)
    }

    fn op(op: VendorOp) -> u32 {
        Opcodes::default().opcode(op)
    }

    #[test]
    fn test_set_is_acked_exactly_once() {
        let (mut node, tx) = node(None);
        let config = MovementConfig::new(500, 90, 100);
        node.handle(0x0E, op(VendorOp::MovementSet), 0x0001, &config.encode());

        let sent = tx.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].opcode, op(VendorOp::MovementAck));
        assert_eq!(sent[0].dst, 0x0001);
        assert_eq!(node.actuators().configured, vec![config]);
        assert!(node.actuators().started.is_empty());
    }

    #[test]
    fn test_ready_starts_stored_movement_without_ack() {
        let (mut node, tx) = node(None);
        let config = MovementConfig::new(250, -45, 60);
        node.handle(0x0E, op(VendorOp::MovementSet), 0x0001, &config.encode());
        tx.take();

        node.handle(0x0E, op(VendorOp::MovementReady), 0x0001, &[]);
        assert_eq!(node.actuators().started, vec![config]);
        assert!(tx.take().is_empty());

        // A second ready has nothing to start
        node.handle(0x0E, op(VendorOp::MovementReady), 0x0001, &[]);
        assert_eq!(node.actuators().started.len(), 1);
    }

    #[test]
    fn test_malformed_set_is_not_acked() {
        let (mut node, tx) = node(None);
        node.handle(0x0E, op(VendorOp::MovementSet), 0x0001, &[0; 8]);
        assert!(tx.take().is_empty());
        assert!(node.actuators().configured.is_empty());
    }

    #[test]
    fn test_light_applied() {
        let (mut node, tx) = node(None);
        let light = LightConfig::new(0, 230, 10, 500);
        node.handle(0x14, op(VendorOp::LightRgbSet), 0x0001, &light.encode());
        assert_eq!(node.actuators().lights, vec![light]);
        assert_eq!(node.light(), Some(light));
        assert!(tx.take().is_empty());
    }

    #[test]
    fn test_identity_announced_to_gateway() {
        let id = RobotId::new(0xAAAA_AAAA_AAAA);
        let (mut node, tx) = node(Some(id));
        let now = Instant::now();
        node.announce(now);
        node.poll(now);

        let sent = tx.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].model, ModelId::IdentityServer);
        assert_eq!(sent[0].dst, 0x0001);
        assert_eq!(RobotId::decode(&sent[0].payload), Some(id));
        assert_eq!(node.deadline(), None);
    }

    #[test]
    fn test_identity_silent_when_unavailable() {
        let (mut node, tx) = node(None);
        let start = Instant::now();
        node.announce(start);
        for i in 0..10u32 {
            node.poll(start + Duration::from_millis(50) * i);
        }
        assert!(tx.take().is_empty());
        assert_eq!(node.deadline(), None);
    }

    #[test]
    fn test_telemetry_after_movement() {
        let (mut node, tx) = node(None);
        node.movement_finished(4).unwrap();
        let sent = tx.take();
        assert_eq!(sent[0].opcode, op(VendorOp::TelemetryReport));
        assert_eq!(sent[0].payload, vec![4]);
        assert_ne!(sent[0].dst, ALL_NODES);
    }
}
