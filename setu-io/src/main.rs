//! SetuIO - Mesh radio bridge daemon
//!
//! Runs the radio-node side of the serial link: frames from the gateway are
//! published on the mesh and robot reports are sent back up. Without radio
//! hardware attached, the mesh is simulated from the `[sim]` section.

use setu_io::bridge::MeshBridge;
use setu_io::config::SetuConfig;
use setu_io::error::{Error, Result};
use setu_io::sim::SimMesh;
use setu_io::transport::SerialPortLink;
use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `setu-io <path>` (positional)
/// - `setu-io --config <path>` (flag-based)
/// - `setu-io -c <path>` (short flag)
///
/// Defaults to `setu.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "setu.toml".to_string()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("SetuIO v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = parse_config_path();
    log::info!("Using config: {}", config_path);
    let config = SetuConfig::load(&config_path)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let link = SerialPortLink::open(
        &config.link.port,
        config.link.baud_rate,
        config.link.read_chunk,
    )?;
    let radio = SimMesh::new(config.sim.clone(), config.mesh.clone());
    let mut bridge = MeshBridge::start(link, &config.link, radio)?;

    log::info!(
        "Bridging {} <-> simulated mesh ({} robots, company id {:#06x}). Press Ctrl-C to stop.",
        config.link.port,
        config.sim.robots.len(),
        config.mesh.company_id
    );

    while running.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(200));
    }

    log::info!("Shutting down...");
    bridge.shutdown();
    let stats = bridge.stats();
    log::info!(
        "SetuIO stopped (rx {}, tx {}, rx dropped {}, tx failed {})",
        stats.frames_rx,
        stats.frames_tx,
        stats.rx_dropped,
        stats.tx_failed
    );
    Ok(())
}
