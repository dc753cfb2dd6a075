//! Simulated mesh for hardware-free runs
//!
//! Stands in for the radio: hosts a [`RobotNode`] per configured robot and
//! routes gateway publishes to them. Movements finish after their drive time
//! (scaled by `speed_factor`) and report a revolution count derived from time
//! and speed.
//!
//! ```toml
//! [sim]
//! speed_factor = 4.0
//! gateway_address = 0x0001
//!
//! [[sim.robots]]
//! address = 0x0010
//! id = 0xAAAAAAAA0010
//! ```

use crate::bridge::MeshRadio;
use crate::config::{MeshConfig, SimConfig};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::mesh::{
    ALL_NODES, Actuators, Address, IdentityAnnouncer, LightConfig, MeshError, MeshTx, ModelId,
    MovementConfig, Opcodes, RobotId, RobotNode,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Drive time per wheel revolution at full speed
const MS_PER_REVOLUTION: u64 = 250;

/// Longest the sim thread sleeps between shutdown checks
const MAX_IDLE: Duration = Duration::from_millis(100);

/// Revolutions a movement produces
pub fn revolutions_for(movement: &MovementConfig) -> u8 {
    let revs = u64::from(movement.time_ms) * u64::from(movement.speed_pct)
        / (100 * MS_PER_REVOLUTION);
    revs.min(u64::from(u8::MAX)) as u8
}

/// Robot transmissions, looped back to the gateway as radio receptions
struct SimTx {
    src: Address,
    gateway: Address,
    inbound: Sender<Frame>,
}

impl MeshTx for SimTx {
    fn transmit(
        &self,
        model: ModelId,
        dst: Address,
        opcode: u32,
        payload: &[u8],
    ) -> std::result::Result<(), MeshError> {
        if dst != self.gateway && dst != ALL_NODES {
            log::debug!("Sim: {:#06x} -> {:#06x} not routed", self.src, dst);
            return Ok(());
        }
        let frame = Frame::new(opcode, model.peer() as u32, self.src, payload);
        match self.inbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::error!("Sim: radio inbound queue full, message from {:#06x} lost", self.src);
                Err(MeshError::NotReady)
            }
            Err(TrySendError::Disconnected(_)) => Err(MeshError::NotReady),
        }
    }
}

/// Simulated motors and LED
pub struct SimActuators {
    id: RobotId,
    speed_factor: f32,
    finish: Option<(Instant, u8)>,
    light: Option<LightConfig>,
}

impl SimActuators {
    pub fn new(id: RobotId, speed_factor: f32) -> Self {
        let speed_factor = if speed_factor > 0.0 { speed_factor } else { 1.0 };
        Self {
            id,
            speed_factor,
            finish: None,
            light: None,
        }
    }

    /// Instant the running movement completes
    pub fn finish_at(&self) -> Option<Instant> {
        self.finish.map(|(at, _)| at)
    }

    /// Revolution count of a movement that has completed by `now`
    pub fn take_finished(&mut self, now: Instant) -> Option<u8> {
        match self.finish {
            Some((at, revs)) if at <= now => {
                self.finish = None;
                Some(revs)
            }
            _ => None,
        }
    }

    pub fn light(&self) -> Option<LightConfig> {
        self.light
    }
}

impl Actuators for SimActuators {
    fn device_id(&mut self) -> Option<RobotId> {
        Some(self.id)
    }

    fn configure(&mut self, movement: &MovementConfig) {
        log::debug!("Sim {}: configured {:?}", self.id, movement);
    }

    fn start_movement(&mut self, movement: &MovementConfig) {
        let millis = (movement.time_ms as f32 / self.speed_factor) as u64;
        let revs = revolutions_for(movement);
        log::info!(
            "Sim {}: moving {} ms, {} deg at {}% ({} rev)",
            self.id,
            movement.time_ms,
            movement.angle_deg,
            movement.speed_pct,
            revs
        );
        self.finish = Some((Instant::now() + Duration::from_millis(millis), revs));
    }

    fn set_light(&mut self, light: &LightConfig) {
        log::debug!("Sim {}: light {:?}", self.id, light);
        self.light = Some(*light);
    }
}

/// [`MeshRadio`] backed by simulated robots
pub struct SimMesh {
    sim: SimConfig,
    mesh: MeshConfig,
    commands: Option<Sender<Frame>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimMesh {
    pub fn new(sim: SimConfig, mesh: MeshConfig) -> Self {
        Self {
            sim,
            mesh,
            commands: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl MeshRadio for SimMesh {
    fn start(&mut self, inbound: Sender<Frame>) -> Result<()> {
        let (commands_tx, commands_rx) = bounded::<Frame>(64);
        let opcodes = Opcodes::new(self.mesh.company_id);
        let retry = Duration::from_millis(self.mesh.identity_retry_ms);
        let now = Instant::now();

        let nodes: Vec<RobotNode<SimTx, SimActuators>> = self
            .sim
            .robots
            .iter()
            .map(|robot| {
                let tx = SimTx {
                    src: robot.address,
                    gateway: self.sim.gateway_address,
                    inbound: inbound.clone(),
                };
                let mut node = RobotNode::new(
                    robot.address,
                    self.sim.gateway_address,
                    tx,
                    opcodes,
                    IdentityAnnouncer::new(self.mesh.identity_retries, retry),
                    SimActuators::new(RobotId::new(robot.id), self.sim.speed_factor),
                );
                node.announce(now);
                node
            })
            .collect();

        log::info!("Simulated mesh with {} robots", nodes.len());
        self.shutdown.store(false, Ordering::Relaxed);
        let shutdown = Arc::clone(&self.shutdown);
        let gateway = self.sim.gateway_address;
        self.worker = Some(
            thread::Builder::new()
                .name("setu-sim".to_string())
                .spawn(move || sim_loop(nodes, gateway, commands_rx, shutdown))?,
        );
        self.commands = Some(commands_tx);
        Ok(())
    }

    fn publish(&mut self, frame: &Frame) -> Result<()> {
        let commands = self.commands.as_ref().ok_or(Error::NotStarted)?;
        match commands.try_send(frame.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::QueueFull("sim mesh")),
            Err(TrySendError::Disconnected(_)) => Err(Error::ChannelClosed("sim mesh")),
        }
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.commands = None;
        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            log::error!("Sim thread panicked");
        }
    }
}

impl Drop for SimMesh {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sim_loop(
    mut nodes: Vec<RobotNode<SimTx, SimActuators>>,
    gateway: Address,
    commands: Receiver<Frame>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        for node in nodes.iter_mut() {
            node.poll(now);
            if let Some(revs) = node.actuators_mut().take_finished(now)
                && let Err(e) = node.movement_finished(revs)
            {
                log::error!("Sim {:#06x}: telemetry failed: {}", node.address(), e);
            }
        }

        let wake = nodes
            .iter()
            .flat_map(|n| [n.deadline(), n.actuators().finish_at()])
            .flatten()
            .min()
            .unwrap_or(now + MAX_IDLE)
            .min(now + MAX_IDLE);

        match commands.recv_deadline(wake) {
            Ok(frame) => deliver(&mut nodes, gateway, &frame),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    log::info!("Sim thread exiting");
}

/// Hand a gateway publish to every addressed node, as its peer model
fn deliver(nodes: &mut [RobotNode<SimTx, SimActuators>], gateway: Address, frame: &Frame) {
    let Some(model) = ModelId::from_u32(frame.model_id) else {
        log::debug!("Sim: unknown model {:#04x}", frame.model_id);
        return;
    };
    let receiver = model.peer() as u32;
    let mut delivered = false;
    for node in nodes
        .iter_mut()
        .filter(|n| frame.address == ALL_NODES || n.address() == frame.address)
    {
        node.handle(receiver, frame.opcode, gateway, &frame.payload);
        delivered = true;
    }
    if !delivered {
        log::debug!("Sim: no node at {:#06x}", frame.address);
    }
}
