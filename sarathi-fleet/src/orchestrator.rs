//! Fleet orchestrator
//!
//! Owns the roster and reconciles it with the cloud shadow:
//!
//! - Identity reports add robots and show the presence indicator.
//! - Deltas become Movement-Set and Light-RGB-Set commands.
//! - Acknowledgements are gathered until every robot is configured, then the
//!   whole fleet is released with a single Movement-Ready broadcast.
//! - Telemetry is gathered until every robot is back to ready, then all
//!   revolution counts are reported in one document.
//!
//! Reports are only produced while the cloud is connected; a reconnect
//! re-reports the complete roster instead.

use crate::cloud::QosKind;
use crate::codec::{self, RobotDelta, RobotReport, RobotUpdate, ShadowDelta};
use crate::config::{FleetSettings, RemovalPolicy};
use crate::events::{CloudMsg, FleetMsg, Outbox, Report};
use crate::roster::{CONFIGURED_LED, ExecutionState, PRESENCE_LED, Robot, Roster};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use setu_io::mesh::{
    Address, LightClient, LightConfig, MeshEvent, MeshTx, MovementClient, Opcodes, RobotId,
    Telemetry,
};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetState {
    CloudDisconnected,
    CloudConnected,
}

pub struct FleetOrchestrator<T> {
    state: FleetState,
    roster: Roster,
    movement: MovementClient<T>,
    light: LightClient<T>,
    cloud: Outbox<CloudMsg>,
    default_speed: u8,
    removal_policy: RemovalPolicy,
    /// A configuration round is in progress and has not been released yet
    round_armed: bool,
    /// Robots that acknowledged a movement in the current round
    round_acks: BTreeSet<Address>,
}

impl<T: MeshTx + Clone> FleetOrchestrator<T> {
    pub fn new(tx: T, opcodes: Opcodes, cloud: Outbox<CloudMsg>, settings: &FleetSettings) -> Self {
        Self {
            state: FleetState::CloudDisconnected,
            roster: Roster::new(),
            movement: MovementClient::new(tx.clone(), opcodes),
            light: LightClient::new(tx, opcodes),
            cloud,
            default_speed: settings.default_speed,
            removal_policy: settings.removal_policy,
            round_armed: false,
            round_acks: BTreeSet::new(),
        }
    }
}

impl<T: MeshTx> FleetOrchestrator<T> {
    pub fn state(&self) -> FleetState {
        self.state
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn handle(&mut self, msg: FleetMsg) {
        match msg {
            FleetMsg::Mesh(MeshEvent::Identity { addr, id }) => self.on_identity(addr, id),
            FleetMsg::Mesh(MeshEvent::MovementAck { addr }) => self.on_movement_ack(addr),
            FleetMsg::Mesh(MeshEvent::Telemetry { addr, telemetry }) => {
                self.on_telemetry(addr, telemetry)
            }
            FleetMsg::Mesh(other) => debug!("Ignoring mesh event {:?}", other),
            FleetMsg::CloudConnected => self.on_cloud_connected(),
            FleetMsg::CloudDisconnected => {
                info!("Cloud disconnected");
                self.state = FleetState::CloudDisconnected;
            }
            FleetMsg::Delta(delta) => self.on_delta(delta),
        }
    }

    /// Consume the orchestrator queue until shutdown or until every producer is gone.
    pub fn run(mut self, inbox: Receiver<FleetMsg>, shutdown: Arc<AtomicBool>) {
        info!("Fleet orchestrator started");
        while !shutdown.load(Ordering::Relaxed) {
            match inbox.recv_timeout(Duration::from_millis(100)) {
                Ok(msg) => self.handle(msg),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("Fleet orchestrator exiting ({} robots)", self.roster.len());
    }

    fn on_identity(&mut self, addr: Address, id: RobotId) {
        if let Some(known) = self.roster.get(addr) {
            if known.id == id {
                debug!("Robot {} at {:#06x} announced again", id, addr);
                return;
            }
            warn!(
                "Address {:#06x} moved from robot {} to {}",
                addr, known.identity, id
            );
            if let Some(old) = self.roster.remove(addr) {
                self.publish_removal(&old.identity);
            }
        }

        let robot = Robot::new(addr, id, self.default_speed);
        info!("Robot {} joined at {:#06x}", robot.identity, addr);
        self.set_light(addr, PRESENCE_LED);
        let report = RobotReport::full(&robot);
        let identity = robot.identity.clone();
        self.roster.insert(robot);
        self.publish_reports([(identity, report)]);
    }

    fn on_cloud_connected(&mut self) {
        info!("Cloud connected, re-reporting {} robots", self.roster.len());
        self.state = FleetState::CloudConnected;
        self.publish(QosKind::ShadowClear, Cow::Borrowed(codec::REMOVE_ALL));
        let reports: Vec<(String, RobotReport)> = self
            .roster
            .iter()
            .map(|r| (r.identity.clone(), RobotReport::full(r)))
            .collect();
        if !reports.is_empty() {
            self.publish_reports(reports);
        }
    }

    fn on_delta(&mut self, delta: ShadowDelta) {
        if self.state != FleetState::CloudConnected {
            debug!("Delta v{} ignored while cloud disconnected", delta.version);
            return;
        }
        debug!(
            "Applying delta v{} ({} robots)",
            delta.version,
            delta.robots.len()
        );

        let mut removed = Vec::new();
        let mut updates = Vec::new();
        for (identity, entry) in &delta.robots {
            match entry {
                RobotDelta::Update(update) => updates.push((identity.as_str(), *update)),
                RobotDelta::Removed => removed.push(identity.as_str()),
            }
        }

        // Movement pass first, then LED pass
        for (identity, update) in &updates {
            if update.has_movement() {
                self.apply_movement(identity, update);
            }
        }
        for (identity, update) in &updates {
            if !update.led.is_empty() {
                self.apply_led(identity, update);
            }
        }
        for identity in removed {
            self.apply_removal(identity);
        }
    }

    fn apply_movement(&mut self, identity: &str, update: &RobotUpdate) {
        let speed = self.default_speed;
        let Some(robot) = self.roster.by_identity_mut(identity) else {
            debug!("Delta for unknown robot {}", identity);
            return;
        };

        let mut movement = robot.movement;
        if let Some(time_ms) = update.drive_time_ms {
            movement.time_ms = time_ms;
        }
        if let Some(angle_deg) = update.angle_deg {
            movement.angle_deg = angle_deg;
        }
        movement.speed_pct = speed;

        match self.movement.set(robot.address, &movement) {
            Ok(()) => {
                info!(
                    "Robot {}: movement {} ms, {} deg",
                    identity, movement.time_ms, movement.angle_deg
                );
                robot.movement = movement;
                robot.state = ExecutionState::Configuring;
                if !self.round_armed {
                    self.round_acks.clear();
                    self.round_armed = true;
                }
                // A new set supersedes an earlier ack in the same round
                self.round_acks.remove(&robot.address);
            }
            Err(e) => error!("Robot {}: movement set failed: {}", identity, e),
        }
    }

    fn apply_led(&mut self, identity: &str, update: &RobotUpdate) {
        let Some(robot) = self.roster.by_identity_mut(identity) else {
            debug!("Delta for unknown robot {}", identity);
            return;
        };
        let led = LightConfig {
            red: update.led.red.unwrap_or(robot.led.red),
            green: update.led.green.unwrap_or(robot.led.green),
            blue: update.led.blue.unwrap_or(robot.led.blue),
            blink_time_ms: update.led.blink_time_ms.unwrap_or(robot.led.blink_time_ms),
        };
        let address = robot.address;
        self.set_light(address, led);
    }

    fn apply_removal(&mut self, identity: &str) {
        match self.removal_policy {
            RemovalPolicy::Ignore => {
                debug!("Cloud removed robot {}, keeping it", identity);
            }
            RemovalPolicy::Forget => {
                if self.roster.remove_identity(identity).is_some() {
                    info!("Robot {} forgotten", identity);
                    self.publish_removal(identity);
                }
            }
        }
    }

    fn on_movement_ack(&mut self, addr: Address) {
        let Some(robot) = self.roster.get_mut(addr) else {
            warn!("Movement ack from unknown address {:#06x}", addr);
            return;
        };
        robot.state = ExecutionState::Configured;
        let report = (robot.identity.clone(), RobotReport::movement(robot));
        debug!("Robot {} configured", robot.identity);

        self.publish_reports([report]);
        self.set_light(addr, CONFIGURED_LED);

        if !self.round_armed {
            return;
        }
        self.round_acks.insert(addr);
        if self.round_complete() {
            match self.movement.ready() {
                Ok(()) => {
                    info!("All {} robots configured, releasing fleet", self.roster.len());
                    self.round_armed = false;
                    self.round_acks.clear();
                }
                Err(e) => error!("Movement ready broadcast failed: {}", e),
            }
        }
    }

    /// Every robot acknowledged in this round. Never true for an empty roster.
    fn round_complete(&self) -> bool {
        !self.roster.is_empty()
            && self.roster.iter().all(|r| {
                r.state == ExecutionState::Configured && self.round_acks.contains(&r.address)
            })
    }

    fn on_telemetry(&mut self, addr: Address, telemetry: Telemetry) {
        let Some(robot) = self.roster.get_mut(addr) else {
            warn!("Telemetry from unknown address {:#06x}", addr);
            return;
        };
        robot.revolutions = telemetry.revolutions;
        robot.state = ExecutionState::Ready;
        debug!(
            "Robot {} finished: {} revolutions",
            robot.identity, telemetry.revolutions
        );
        self.set_light(addr, PRESENCE_LED);

        if self.roster.all_in(ExecutionState::Ready) {
            let reports: Vec<(String, RobotReport)> = self
                .roster
                .iter()
                .map(|r| (r.identity.clone(), RobotReport::revolutions(r)))
                .collect();
            info!("All robots finished, reporting revolutions");
            self.publish_reports(reports);
        }
    }

    fn set_light(&mut self, addr: Address, led: LightConfig) {
        match self.light.set(addr, &led) {
            Ok(()) => {
                if let Some(robot) = self.roster.get_mut(addr) {
                    robot.led = led;
                }
            }
            Err(e) => error!("Light set for {:#06x} failed: {}", addr, e),
        }
    }

    fn publish_reports<I>(&self, reports: I)
    where
        I: IntoIterator<Item = (String, RobotReport)>,
    {
        if self.state != FleetState::CloudConnected {
            return;
        }
        match codec::encode_report(reports) {
            Ok(bytes) => self.publish(QosKind::ShadowUpdate, Cow::Owned(bytes)),
            Err(e) => error!("Report encoding failed: {}", e),
        }
    }

    fn publish_removal(&self, identity: &str) {
        if self.state != FleetState::CloudConnected {
            return;
        }
        match codec::encode_remove_robot(identity) {
            Ok(bytes) => self.publish(QosKind::ShadowUpdate, Cow::Owned(bytes)),
            Err(e) => error!("Removal encoding failed: {}", e),
        }
    }

    fn publish(&self, kind: QosKind, payload: Cow<'static, [u8]>) {
        if self.state != FleetState::CloudConnected {
            return;
        }
        self.cloud.post(CloudMsg::Publish(Report {
            kind,
            payload,
            ack_required: true,
        }));
    }
}
