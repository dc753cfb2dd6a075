//! Cloud connectivity state machine
//!
//! ```text
//! LteDisconnected ──LteConnected──▶ LteConnected(CloudDisconnected)
//!                                        │ connect ok     ▲ drop / timeout
//!                                        ▼                │
//!                                   LteConnected(CloudConnected)
//! ```
//!
//! Timers are plain deadlines checked by [`CloudSyncEngine::poll_timers`];
//! every entry point takes the current instant.

use super::backoff::Backoff;
use super::client::CloudClient;
use super::qos::QosQueue;
use crate::codec;
use crate::config::CloudConfig;
use crate::events::{ClientEvent, CloudMsg, FleetMsg, ModemEvent, Outbox, Report};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Longest idle wait of the engine thread
const IDLE_WAIT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudState {
    CloudDisconnected,
    CloudConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LteState {
    LteDisconnected,
    LteConnected(CloudState),
}

/// Accepts strictly increasing versions only
#[derive(Debug, Clone, Default)]
pub struct VersionGate {
    last: Option<u64>,
}

impl VersionGate {
    pub fn accept(&mut self, version: u64) -> bool {
        if self.last.is_some_and(|last| version <= last) {
            return false;
        }
        self.last = Some(version);
        true
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }
}

pub struct CloudSyncEngine<C> {
    client: C,
    state: LteState,
    backoff: Backoff,
    reconnect_at: Option<Instant>,
    qos: QosQueue,
    gate: VersionGate,
    fleet: Outbox<FleetMsg>,
}

impl<C: CloudClient> CloudSyncEngine<C> {
    pub fn new(client: C, config: &CloudConfig, fleet: Outbox<FleetMsg>) -> Self {
        Self {
            client,
            state: LteState::LteDisconnected,
            backoff: Backoff::new(config.backoff_base(), config.max_retries),
            reconnect_at: None,
            qos: QosQueue::new(
                config.qos_capacity,
                config.redelivery_interval(),
                config.max_redeliveries,
            ),
            gate: VersionGate::default(),
            fleet,
        }
    }

    pub fn state(&self) -> LteState {
        self.state
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn pending(&self) -> &QosQueue {
        &self.qos
    }

    fn cloud_connected(&self) -> bool {
        self.state == LteState::LteConnected(CloudState::CloudConnected)
    }

    pub fn handle(&mut self, msg: CloudMsg, now: Instant) {
        match msg {
            CloudMsg::Modem(ModemEvent::LteConnected) => self.on_lte_connected(now),
            CloudMsg::Modem(ModemEvent::LteDisconnected) => self.on_lte_disconnected(),
            CloudMsg::Client(event) => self.on_client(event, now),
            CloudMsg::Publish(report) => self.on_publish(report, now),
        }
    }

    /// Fire the reconnect timer and redeliver unacknowledged messages.
    pub fn poll_timers(&mut self, now: Instant) {
        if let Some(at) = self.reconnect_at
            && at <= now
        {
            self.reconnect_at = None;
            if self.state == LteState::LteConnected(CloudState::CloudDisconnected) {
                warn!("Cloud connect attempt timed out");
                self.connect(now);
            }
        }

        if self.cloud_connected() {
            for message in self.qos.due(now) {
                debug!("Redelivering message {}", message.id);
                if let Err(e) = self.client.publish(&message) {
                    warn!("Redelivery of {} failed: {}", message.id, e);
                }
            }
        }
    }

    /// Earliest instant [`CloudSyncEngine::poll_timers`] has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        let redelivery = if self.cloud_connected() {
            self.qos.next_deadline()
        } else {
            None
        };
        match (self.reconnect_at, redelivery) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn run(mut self, inbox: Receiver<CloudMsg>, shutdown: Arc<AtomicBool>) {
        info!("Cloud sync started");
        while !shutdown.load(Ordering::Relaxed) {
            let now = Instant::now();
            self.poll_timers(now);
            let wake = self
                .next_deadline()
                .map_or(now + IDLE_WAIT, |d| d.min(now + IDLE_WAIT));
            match inbox.recv_deadline(wake) {
                Ok(msg) => self.handle(msg, Instant::now()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.client.disconnect();
        info!("Cloud sync exiting");
    }

    /// Attempt a connection and arm the timer that retries it.
    fn connect(&mut self, now: Instant) {
        let Some(delay) = self.backoff.next_delay() else {
            error!(
                "Cloud connect failed {} times, waiting for the next LTE attach",
                self.backoff.retries()
            );
            self.reconnect_at = None;
            return;
        };
        info!(
            "Connecting to cloud (attempt {}, retry in {:?})",
            self.backoff.retries(),
            delay
        );
        if let Err(e) = self.client.connect() {
            warn!("Cloud connect could not start: {}", e);
        }
        self.reconnect_at = Some(now + delay);
    }

    fn on_lte_connected(&mut self, now: Instant) {
        if self.state != LteState::LteDisconnected {
            debug!("LTE connected again, ignored");
            return;
        }
        info!("LTE connected");
        self.state = LteState::LteConnected(CloudState::CloudDisconnected);
        self.backoff.reset();
        self.connect(now);
    }

    fn on_lte_disconnected(&mut self) {
        if self.state == LteState::LteDisconnected {
            return;
        }
        info!("LTE disconnected");
        if self.cloud_connected() {
            self.fleet.post(FleetMsg::CloudDisconnected);
        }
        self.client.disconnect();
        self.state = LteState::LteDisconnected;
        self.backoff.reset();
        self.reconnect_at = None;
    }

    fn on_client(&mut self, event: ClientEvent, now: Instant) {
        match event {
            ClientEvent::Connected => {
                if self.state != LteState::LteConnected(CloudState::CloudDisconnected) {
                    warn!("Cloud connected in state {:?}, dropping it", self.state);
                    self.client.disconnect();
                    return;
                }
                info!("Cloud connected");
                self.state = LteState::LteConnected(CloudState::CloudConnected);
                self.backoff.reset();
                self.reconnect_at = None;
                let dropped = self.qos.clear();
                if dropped > 0 {
                    debug!("{} pending messages superseded by full re-report", dropped);
                }
                self.fleet.post(FleetMsg::CloudConnected);
            }
            ClientEvent::ConnectFailed(reason) => {
                // The armed reconnect timer retries
                warn!("Cloud connect failed: {}", reason);
            }
            ClientEvent::Disconnected => {
                if !self.cloud_connected() {
                    return;
                }
                warn!("Cloud connection lost");
                self.state = LteState::LteConnected(CloudState::CloudDisconnected);
                self.fleet.post(FleetMsg::CloudDisconnected);
                self.backoff.reset();
                self.connect(now);
            }
            ClientEvent::Delta(bytes) => self.on_delta(&bytes),
            ClientEvent::PubAck(id) => {
                if self.qos.ack(id) {
                    debug!("Message {} acknowledged", id);
                }
            }
        }
    }

    fn on_delta(&mut self, bytes: &[u8]) {
        if !self.cloud_connected() {
            debug!("Delta while cloud disconnected, ignored");
            return;
        }
        let Some(delta) = codec::decode_delta(bytes) else {
            return;
        };
        if !self.gate.accept(delta.version) {
            debug!(
                "Stale delta v{} (last {:?}) discarded",
                delta.version,
                self.gate.last()
            );
            return;
        }
        self.fleet.post(FleetMsg::Delta(delta));
    }

    fn on_publish(&mut self, report: Report, now: Instant) {
        if !self.cloud_connected() {
            debug!("Report dropped while cloud disconnected");
            return;
        }
        let message = self
            .qos
            .add(report.kind, report.payload, report.ack_required, now);
        if let Err(e) = self.client.publish(&message) {
            warn!("Publish of {} failed: {}", message.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{QosKind, QosMessage};
    use crate::error::{FleetError, Result};
    use crossbeam_channel::unbounded;
    use std::borrow::Cow;

    #[derive(Default)]
    struct FakeClient {
        connects: u32,
        disconnects: u32,
        published: Vec<QosMessage>,
        fail_publish: bool,
    }

    impl CloudClient for FakeClient {
        fn connect(&mut self) -> Result<()> {
            self.connects += 1;
            Ok(())
        }
        fn disconnect(&mut self) {
            self.disconnects += 1;
        }
        fn publish(&mut self, message: &QosMessage) -> Result<()> {
            if self.fail_publish {
                return Err(FleetError::Cloud("down".into()));
            }
            self.published.push(message.clone());
            Ok(())
        }
    }

    const BASE: Duration = Duration::from_secs(1);

    fn engine() -> (CloudSyncEngine<FakeClient>, Receiver<FleetMsg>) {
        let (tx, rx) = unbounded();
        let config = CloudConfig {
            backoff_base_secs: 1,
            max_retries: 4,
            redelivery_ms: 100,
            ..CloudConfig::default()
        };
        (
            CloudSyncEngine::new(FakeClient::default(), &config, Outbox::new("fleet", tx)),
            rx,
        )
    }

    fn connected() -> (CloudSyncEngine<FakeClient>, Receiver<FleetMsg>, Instant) {
        let (mut e, rx) = engine();
        let now = Instant::now();
        e.handle(CloudMsg::Modem(ModemEvent::LteConnected), now);
        e.handle(CloudMsg::Client(ClientEvent::Connected), now);
        rx.try_iter().for_each(drop);
        (e, rx, now)
    }

    fn delta(version: u64) -> CloudMsg {
        let doc = format!(
            r#"{{"version":{},"state":{{"robots":{{"aaaaaaaaaaaa":{{"driveTimeMs":500}}}}}}}}"#,
            version
        );
        CloudMsg::Client(ClientEvent::Delta(doc.into_bytes()))
    }

    fn report() -> CloudMsg {
        CloudMsg::Publish(Report {
            kind: QosKind::ShadowUpdate,
            payload: Cow::Owned(b"{}".to_vec()),
            ack_required: true,
        })
    }

    #[test]
    fn test_version_gate() {
        let mut gate = VersionGate::default();
        assert!(gate.accept(0));
        assert!(!gate.accept(0));
        assert!(gate.accept(5));
        assert!(!gate.accept(4));
        assert!(!gate.accept(5));
        assert!(gate.accept(6));
    }

    #[test]
    fn test_lte_connect_starts_cloud_connect() {
        let (mut e, fleet) = engine();
        let now = Instant::now();
        e.handle(CloudMsg::Modem(ModemEvent::LteConnected), now);
        assert_eq!(e.client().connects, 1);
        assert_eq!(e.next_deadline(), Some(now + BASE));

        e.handle(CloudMsg::Client(ClientEvent::Connected), now);
        assert_eq!(e.state(), LteState::LteConnected(CloudState::CloudConnected));
        assert_eq!(e.next_deadline(), None);
        assert!(matches!(fleet.try_recv(), Ok(FleetMsg::CloudConnected)));
    }

    #[test]
    fn test_backoff_doubles_and_never_retries_early() {
        let (mut e, _fleet) = engine();
        let t0 = Instant::now();
        e.handle(CloudMsg::Modem(ModemEvent::LteConnected), t0);
        e.handle(
            CloudMsg::Client(ClientEvent::ConnectFailed("refused".into())),
            t0,
        );
        assert_eq!(e.client().connects, 1);

        // Attempts at t0, t0+1, t0+3, t0+7
        let mut attempt_at = t0;
        for (n, gap) in [1u32, 2, 4].into_iter().enumerate() {
            let due = attempt_at + BASE * gap;
            e.poll_timers(due - Duration::from_millis(1));
            assert_eq!(e.client().connects, n as u32 + 1, "early retry");
            e.poll_timers(due);
            assert_eq!(e.client().connects, n as u32 + 2);
            attempt_at = due;
        }
    }

    #[test]
    fn test_retries_exhausted_until_next_attach() {
        let (mut e, _fleet) = engine();
        let mut now = Instant::now();
        e.handle(CloudMsg::Modem(ModemEvent::LteConnected), now);
        for _ in 0..10 {
            now += Duration::from_secs(60);
            e.poll_timers(now);
        }
        assert_eq!(e.client().connects, 4);
        assert_eq!(e.next_deadline(), None);

        e.handle(CloudMsg::Modem(ModemEvent::LteDisconnected), now);
        e.handle(CloudMsg::Modem(ModemEvent::LteConnected), now);
        assert_eq!(e.client().connects, 5);
    }

    #[test]
    fn test_cloud_drop_reconnects() {
        let (mut e, fleet, now) = connected();
        e.handle(CloudMsg::Client(ClientEvent::Disconnected), now);
        assert_eq!(
            e.state(),
            LteState::LteConnected(CloudState::CloudDisconnected)
        );
        assert!(matches!(fleet.try_recv(), Ok(FleetMsg::CloudDisconnected)));
        assert_eq!(e.client().connects, 2);
    }

    #[test]
    fn test_lte_loss_resets_everything() {
        let (mut e, fleet, now) = connected();
        e.handle(report(), now);
        e.handle(CloudMsg::Modem(ModemEvent::LteDisconnected), now);
        assert_eq!(e.state(), LteState::LteDisconnected);
        assert_eq!(e.client().disconnects, 1);
        assert!(matches!(fleet.try_recv(), Ok(FleetMsg::CloudDisconnected)));
        // Redelivery suspended
        assert_eq!(e.next_deadline(), None);
        e.poll_timers(now + Duration::from_secs(10));
        assert_eq!(e.client().published.len(), 1);
    }

    #[test]
    fn test_same_delta_applied_once() {
        let (mut e, fleet, now) = connected();
        e.handle(delta(1), now);
        e.handle(delta(1), now);
        e.handle(delta(0), now);
        let forwarded: Vec<FleetMsg> = fleet.try_iter().collect();
        assert_eq!(forwarded.len(), 1);
        assert!(matches!(&forwarded[0], FleetMsg::Delta(d) if d.version == 1));

        e.handle(delta(2), now);
        assert_eq!(fleet.try_iter().count(), 1);
    }

    #[test]
    fn test_version_gate_survives_reconnect() {
        let (mut e, fleet, now) = connected();
        e.handle(delta(3), now);
        e.handle(CloudMsg::Client(ClientEvent::Disconnected), now);
        e.handle(CloudMsg::Client(ClientEvent::Connected), now);
        fleet.try_iter().for_each(drop);
        e.handle(delta(3), now);
        assert!(fleet.try_recv().is_err());
    }

    #[test]
    fn test_delta_ignored_while_disconnected() {
        let (mut e, fleet) = engine();
        e.handle(delta(1), Instant::now());
        assert!(fleet.try_recv().is_err());
    }

    #[test]
    fn test_report_redelivered_until_acked() {
        let (mut e, _fleet, now) = connected();
        e.handle(report(), now);
        let id = e.client().published[0].id;

        e.poll_timers(now + Duration::from_millis(50));
        assert_eq!(e.client().published.len(), 1);
        e.poll_timers(now + Duration::from_millis(100));
        assert_eq!(e.client().published.len(), 2);
        assert_eq!(e.client().published[1].id, id);

        e.handle(CloudMsg::Client(ClientEvent::PubAck(id)), now);
        e.poll_timers(now + Duration::from_secs(5));
        assert_eq!(e.client().published.len(), 2);
        assert!(e.pending().is_empty());
    }

    #[test]
    fn test_ack_before_deadline_prevents_redelivery() {
        let (mut e, _fleet, now) = connected();
        e.handle(report(), now);
        let id = e.client().published[0].id;
        assert_eq!(e.next_deadline(), Some(now + Duration::from_millis(100)));

        e.handle(
            CloudMsg::Client(ClientEvent::PubAck(id)),
            now + Duration::from_millis(40),
        );
        assert!(e.pending().is_empty());

        e.poll_timers(now + Duration::from_millis(100));
        e.poll_timers(now + Duration::from_millis(250));
        assert_eq!(e.client().published.len(), 1);
        assert_eq!(e.next_deadline(), None);
    }

    #[test]
    fn test_failed_publish_stays_pending() {
        let (mut e, _fleet, now) = connected();
        e.client_mut().fail_publish = true;
        e.handle(report(), now);
        assert_eq!(e.pending().len(), 1);

        e.client_mut().fail_publish = false;
        e.poll_timers(now + Duration::from_millis(100));
        assert_eq!(e.client().published.len(), 1);
    }

    #[test]
    fn test_reconnect_clears_pending() {
        let (mut e, _fleet, now) = connected();
        e.handle(report(), now);
        e.handle(CloudMsg::Client(ClientEvent::Disconnected), now);
        e.handle(CloudMsg::Client(ClientEvent::Connected), now);
        assert!(e.pending().is_empty());
    }

    #[test]
    fn test_reports_dropped_while_disconnected() {
        let (mut e, _fleet) = engine();
        e.handle(report(), Instant::now());
        assert!(e.client().published.is_empty());
        assert!(e.pending().is_empty());
    }
}
