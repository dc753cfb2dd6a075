//! Configuration loading for SarathiFleet
//!
//! `sarathi.toml` layout:
//!
//! ```toml
//! [link]
//! mode = "mock"            # or "serial"
//!
//! [link.serial]            # setu-io link settings
//! port = "/dev/ttyACM0"
//!
//! [mesh]
//! company_id = 0x0059
//!
//! [cloud]
//! endpoint = "127.0.0.1:8883"
//! backoff_base_secs = 32
//!
//! [fleet]
//! removal_policy = "ignore"
//! ```

use crate::error::{FleetError, Result};
use serde::Deserialize;
use setu_io::config::{LinkConfig, MeshConfig, SimConfig};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub link: GatewayLinkConfig,
    #[serde(default)]
    pub mesh: MeshConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub fleet: FleetSettings,
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default)]
    pub modem: ModemConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

/// How the gateway reaches the mesh radio
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    /// Real radio node on a serial port
    Serial,
    /// In-process radio node driving a simulated mesh
    #[default]
    Mock,
}

/// Gateway link settings
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GatewayLinkConfig {
    #[serde(default)]
    pub mode: LinkMode,

    #[serde(default)]
    pub serial: LinkConfig,
}

/// Cloud shadow connection
#[derive(Clone, Debug, Deserialize)]
pub struct CloudConfig {
    /// Shadow relay address (default: 127.0.0.1:8883)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Client id presented on connect
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Connection attempt timeout in milliseconds (default: 5000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// First reconnect delay; doubled on every further failure (default: 32)
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Reconnect attempts before waiting for the next LTE attach (default: 8)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Unacknowledged messages retained for redelivery (default: 16)
    #[serde(default = "default_qos_capacity")]
    pub qos_capacity: usize,

    /// Redelivery interval for unacknowledged messages (default: 5000)
    #[serde(default = "default_redelivery_ms")]
    pub redelivery_ms: u64,

    /// Redeliveries before a message is given up, unlimited when absent
    #[serde(default)]
    pub max_redeliveries: Option<u32>,
}

/// Cloud-side robot removal handling
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    /// Keep the robot in the roster
    #[default]
    Ignore,
    /// Drop the robot from the roster and report its removal
    Forget,
}

/// Orchestrator behavior
#[derive(Clone, Debug, Deserialize)]
pub struct FleetSettings {
    /// Speed applied with every movement command (default: 100)
    #[serde(default = "default_speed")]
    pub default_speed: u8,

    #[serde(default)]
    pub removal_policy: RemovalPolicy,
}

/// Inter-thread queue sizes
#[derive(Clone, Debug, Deserialize)]
pub struct QueueConfig {
    /// Depth of the orchestrator and cloud queues (default: 32)
    #[serde(default = "default_queue_depth")]
    pub depth: usize,
}

/// LTE modem stand-in
#[derive(Clone, Debug, Deserialize)]
pub struct ModemConfig {
    /// Delay before the modem reports an attached link (default: 500)
    #[serde(default = "default_attach_delay_ms")]
    pub attach_delay_ms: u64,
}

impl CloudConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn redelivery_interval(&self) -> Duration {
        Duration::from_millis(self.redelivery_ms)
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            client_id: default_client_id(),
            connect_timeout_ms: default_connect_timeout_ms(),
            backoff_base_secs: default_backoff_base_secs(),
            max_retries: default_max_retries(),
            qos_capacity: default_qos_capacity(),
            redelivery_ms: default_redelivery_ms(),
            max_redeliveries: None,
        }
    }
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            default_speed: default_speed(),
            removal_policy: RemovalPolicy::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            depth: default_queue_depth(),
        }
    }
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            attach_delay_ms: default_attach_delay_ms(),
        }
    }
}

// Default value functions
fn default_endpoint() -> String {
    "127.0.0.1:8883".to_string()
}
fn default_client_id() -> String {
    "sarathi-gateway".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_backoff_base_secs() -> u64 {
    32
}
fn default_max_retries() -> u32 {
    8
}
fn default_qos_capacity() -> usize {
    16
}
fn default_redelivery_ms() -> u64 {
    5000
}
fn default_speed() -> u8 {
    100
}
fn default_queue_depth() -> usize {
    32
}
fn default_attach_delay_ms() -> u64 {
    500
}

impl FleetConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FleetError::Config(format!("Failed to read config file: {}", e)))?;
        let config: FleetConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.fleet.default_speed > setu_io::mesh::movement::MAX_SPEED_PCT {
            return Err(FleetError::Config(format!(
                "default_speed {} exceeds {}",
                self.fleet.default_speed,
                setu_io::mesh::movement::MAX_SPEED_PCT
            )));
        }
        if self.queues.depth == 0 {
            return Err(FleetError::Config("queue depth must be non-zero".into()));
        }
        if self.cloud.redelivery_ms == 0 {
            return Err(FleetError::Config("redelivery_ms must be non-zero".into()));
        }
        if self.cloud.backoff_base_secs == 0 {
            return Err(FleetError::Config(
                "backoff_base_secs must be non-zero".into(),
            ));
        }
        self.link
            .serial
            .validate()
            .map_err(|e| FleetError::Config(e.to_string()))?;
        Ok(())
    }
}
