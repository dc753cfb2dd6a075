//! Thread wiring
//!
//! - Orchestrator thread: roster, barriers, mesh commands
//! - Cloud thread: connectivity, version gate, QoS redelivery
//! - Modem thread: LTE link state
//!
//! plus the transport threads owned by the mesh link. Each consumer thread
//! reads one bounded queue.

use crate::cloud::{CloudSyncEngine, TcpShadowClient};
use crate::config::FleetConfig;
use crate::error::Result;
use crate::events::{CloudMsg, FleetMsg, Outbox};
use crate::mesh_link::MeshLink;
use crate::modem::StaticModem;
use crate::orchestrator::FleetOrchestrator;
use crossbeam_channel::bounded;
use setu_io::mesh::Opcodes;
use setu_io::transport::StatsSnapshot;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Running gateway
pub struct FleetApp {
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    mesh: MeshLink,
}

impl FleetApp {
    pub fn start(config: FleetConfig) -> Result<Self> {
        let (fleet_tx, fleet_rx) = bounded::<FleetMsg>(config.queues.depth);
        let (cloud_tx, cloud_rx) = bounded::<CloudMsg>(config.queues.depth);
        let fleet_outbox = Outbox::new("orchestrator", fleet_tx);
        let cloud_outbox = Outbox::new("cloud", cloud_tx);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mesh = MeshLink::start(&config, fleet_outbox.clone())?;

        let orchestrator = FleetOrchestrator::new(
            mesh.sender(),
            Opcodes::new(config.mesh.company_id),
            cloud_outbox.clone(),
            &config.fleet,
        );
        let orchestrator_shutdown = Arc::clone(&shutdown);
        let orchestrator_handle = thread::Builder::new()
            .name("orchestrator".into())
            .spawn(move || orchestrator.run(fleet_rx, orchestrator_shutdown))?;

        let engine = CloudSyncEngine::new(
            TcpShadowClient::new(&config.cloud, cloud_outbox.clone()),
            &config.cloud,
            fleet_outbox,
        );
        let cloud_shutdown = Arc::clone(&shutdown);
        let cloud_handle = thread::Builder::new()
            .name("cloud".into())
            .spawn(move || engine.run(cloud_rx, cloud_shutdown))?;

        let modem_handle =
            StaticModem::new(&config.modem, cloud_outbox).spawn(Arc::clone(&shutdown))?;

        info!("Gateway running, cloud relay {}", config.cloud.endpoint);
        Ok(Self {
            shutdown,
            threads: vec![orchestrator_handle, cloud_handle, modem_handle],
            mesh,
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.mesh.stats()
    }

    /// Stop every thread; the mesh link goes last.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                error!("{} thread panicked", name);
            }
        }
        self.mesh.shutdown();
    }
}
