//! Gateway side of the serial link to the mesh radio
//!
//! Inbound frames are decoded by a gateway [`MeshDispatcher`] and posted to
//! the orchestrator. In mock mode the radio node runs in-process over a
//! crossover link, driving a simulated mesh.

use crate::config::{FleetConfig, LinkMode};
use crate::error::Result;
use crate::events::{FleetMsg, Outbox};
use setu_io::bridge::MeshBridge;
use setu_io::mesh::{MeshDispatcher, Opcodes};
use setu_io::sim::SimMesh;
use setu_io::transport::{FrameSender, Link, SerialPortLink, SerialTransport, StatsSnapshot, link_pair};
use setu_io::Frame;
use tracing::{debug, info};

pub struct MeshLink {
    transport: SerialTransport,
    sim: Option<MeshBridge<SimMesh>>,
}

impl MeshLink {
    pub fn start(config: &FleetConfig, fleet: Outbox<FleetMsg>) -> Result<Self> {
        let opcodes = Opcodes::new(config.mesh.company_id);
        match config.link.mode {
            LinkMode::Serial => {
                let serial = &config.link.serial;
                let link = SerialPortLink::open(&serial.port, serial.baud_rate, serial.read_chunk)?;
                let transport = start_gateway(link, config, opcodes, fleet)?;
                info!("Mesh link on {}", serial.port);
                Ok(Self {
                    transport,
                    sim: None,
                })
            }
            LinkMode::Mock => {
                let (gateway_link, radio_link) = link_pair();
                // Gateway first, so the robots' first announcements are heard
                let transport = start_gateway(gateway_link, config, opcodes, fleet)?;
                let radio = SimMesh::new(config.sim.clone(), config.mesh.clone());
                let bridge = MeshBridge::start(radio_link, &config.link.serial, radio)?;
                info!(
                    "Mesh link to simulated mesh ({} robots)",
                    config.sim.robots.len()
                );
                Ok(Self {
                    transport,
                    sim: Some(bridge),
                })
            }
        }
    }

    /// Carriage for the gateway's mesh clients
    pub fn sender(&self) -> FrameSender {
        self.transport.sender()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.transport.stats()
    }

    pub fn shutdown(&mut self) {
        if let Some(mut bridge) = self.sim.take() {
            bridge.shutdown();
        }
        self.transport.shutdown();
    }
}

fn start_gateway<L: Link + 'static>(
    link: L,
    config: &FleetConfig,
    opcodes: Opcodes,
    fleet: Outbox<FleetMsg>,
) -> Result<SerialTransport> {
    let dispatcher = MeshDispatcher::gateway(opcodes);
    let transport = SerialTransport::start(link, &config.link.serial, move |frame: Frame| {
        match dispatcher.dispatch_frame(&frame) {
            Some(event) => {
                fleet.post(FleetMsg::Mesh(event));
            }
            None => debug!("Frame from {:#06x} not for the gateway", frame.address),
        }
    })?;
    Ok(transport)
}
