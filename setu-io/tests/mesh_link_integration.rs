//! End-to-end: gateway transport <-> serial pair <-> bridge <-> simulated mesh

use crossbeam_channel::{Receiver, unbounded};
use setu_io::bridge::MeshBridge;
use setu_io::config::{LinkConfig, MeshConfig, SimConfig, SimRobotConfig};
use setu_io::mesh::{
    ALL_NODES, LightClient, LightConfig, MeshDispatcher, MeshEvent, MovementClient,
    MovementConfig, Opcodes, RobotId, Telemetry,
};
use setu_io::sim::SimMesh;
use setu_io::transport::{SerialTransport, link_pair};
use std::time::Duration;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sim_config() -> SimConfig {
    SimConfig {
        speed_factor: 20.0,
        gateway_address: 0x0001,
        robots: vec![
            SimRobotConfig {
                address: 0x0010,
                id: 0xAAAA_AAAA_AAAA,
            },
            SimRobotConfig {
                address: 0x0020,
                id: 0x0000_0000_0020,
            },
        ],
    }
}

fn next(events: &Receiver<MeshEvent>) -> MeshEvent {
    events
        .recv_timeout(Duration::from_secs(2))
        .expect("mesh event")
}

#[test]
fn test_full_round_over_serial_pair() {
    init_logger();
    let link_config = LinkConfig::default();
    let (gateway_link, radio_link) = link_pair();

    let dispatcher = MeshDispatcher::gateway(Opcodes::default());
    let (events_tx, events) = unbounded();
    let mut gateway = SerialTransport::start(gateway_link, &link_config, move |frame| {
        if let Some(event) = dispatcher.dispatch_frame(&frame) {
            let _ = events_tx.send(event);
        }
    })
    .unwrap();

    let radio = SimMesh::new(sim_config(), MeshConfig::default());
    let mut bridge = MeshBridge::start(radio_link, &link_config, radio).unwrap();

    // Both robots announce themselves
    let mut ids: Vec<(u16, RobotId)> = (0..2)
        .map(|_| match next(&events) {
            MeshEvent::Identity { addr, id } => (addr, id),
            other => panic!("expected identity, got {:?}", other),
        })
        .collect();
    ids.sort();
    assert_eq!(ids[0], (0x0010, RobotId::new(0xAAAA_AAAA_AAAA)));
    assert_eq!(ids[1].1.to_string(), "000000000020");

    let movement = MovementClient::new(gateway.sender(), Opcodes::default());
    let light = LightClient::new(gateway.sender(), Opcodes::default());
    light.set(0x0010, &LightConfig::new(0, 230, 10, 500)).unwrap();

    movement.set(0x0010, &MovementConfig::new(500, 90, 100)).unwrap();
    movement.set(0x0020, &MovementConfig::new(1000, -45, 50)).unwrap();
    let mut acks = vec![next(&events), next(&events)];
    acks.sort_by_key(|e| e.source());
    assert_eq!(
        acks,
        vec![
            MeshEvent::MovementAck { addr: 0x0010 },
            MeshEvent::MovementAck { addr: 0x0020 }
        ]
    );

    movement.ready().unwrap();
    let mut reports = vec![next(&events), next(&events)];
    reports.sort_by_key(|e| e.source());
    assert_eq!(
        reports,
        vec![
            MeshEvent::Telemetry {
                addr: 0x0010,
                telemetry: Telemetry { revolutions: 2 }
            },
            MeshEvent::Telemetry {
                addr: 0x0020,
                telemetry: Telemetry { revolutions: 2 }
            },
        ]
    );

    bridge.shutdown();
    gateway.shutdown();
    let stats = gateway.stats();
    assert_eq!(stats.rx_dropped, 0);
    assert_eq!(stats.tx_failed, 0);
}

#[test]
fn test_ready_never_targets_single_robot() {
    init_logger();
    let (tx, rx) = unbounded();
    let client = MovementClient::new(setu_io::transport::FrameSender::new(tx), Opcodes::default());
    client.ready().unwrap();
    client.ready().unwrap();
    for frame in rx.try_iter() {
        assert_eq!(frame.address, ALL_NODES);
        assert!(frame.payload.is_empty());
    }
}
