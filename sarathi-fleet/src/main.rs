//! SarathiFleet gateway daemon
//!
//! Threads:
//!
//! - **Transport rx/tx**: serial frames to and from the mesh radio
//! - **Orchestrator**: roster, configuration barriers, mesh commands
//! - **Cloud**: shadow connection, delta gate, at-least-once reports
//! - **Modem**: LTE link state

use sarathi_fleet::app::FleetApp;
use sarathi_fleet::config::FleetConfig;
use sarathi_fleet::error::{FleetError, Result};
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::info;

/// Parse config path from command line arguments.
///
/// Supports `sarathi-fleet <path>`, `--config <path>` and `-c <path>`.
/// Defaults to `sarathi.toml`.
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

    "sarathi.toml".to_string()
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sarathi_fleet=info,setu_io=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("SarathiFleet v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = parse_config_path();
    let config = if Path::new(&config_path).exists() {
        info!("Loading configuration from {}", config_path);
        FleetConfig::load(Path::new(&config_path))?
    } else {
        info!("Using default configuration");
        FleetConfig::default()
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| FleetError::Config(format!("Error setting Ctrl-C handler: {}", e)))?;

    let app = FleetApp::start(config)?;

    while running.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(200));
    }

    info!("Shutting down...");
    let stats = app.stats();
    app.shutdown();
    info!(
        "SarathiFleet stopped (frames rx {}, tx {}, rx dropped {}, tx failed {})",
        stats.frames_rx, stats.frames_tx, stats.rx_dropped, stats.tx_failed
    );
    Ok(())
}
