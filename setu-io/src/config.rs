//! Configuration for the SetuIO bridge daemon
//!
//! Loads `setu.toml`. Every field has a default, so a partial file (or none
//! at all) is valid.

use crate::error::{Error, Result};
use crate::frame::DEFAULT_MAX_PAYLOAD;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SetuConfig {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub mesh: MeshConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

/// Serial link and transport queue settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    /// Serial device path
    #[serde(default = "default_port")]
    pub port: String,

    /// Baud rate (default: 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Max wait for the link to confirm a transmission (default: 500ms)
    #[serde(default = "default_tx_timeout_ms")]
    pub tx_timeout_ms: u64,

    /// Completed frames waiting for the receive thread
    #[serde(default = "default_queue_depth")]
    pub rx_queue_depth: usize,

    /// Outgoing frames waiting for the transmit thread
    #[serde(default = "default_queue_depth")]
    pub tx_queue_depth: usize,

    /// Largest payload accepted from the link
    #[serde(default = "default_max_payload_len")]
    pub max_payload_len: usize,

    /// Size of each of the two physical receive buffers
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
}

/// Mesh vendor protocol settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeshConfig {
    /// Company id used in the 3-octet vendor opcodes (default: 0x0059)
    #[serde(default = "default_company_id")]
    pub company_id: u16,

    /// Identity announce attempts when the id is not yet readable
    #[serde(default = "default_identity_retries")]
    pub identity_retries: u32,

    /// Delay between identity attempts
    #[serde(default = "default_identity_retry_ms")]
    pub identity_retry_ms: u64,
}

/// Simulated mesh used when no radio is attached
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    /// Playback speed of robot movements (2.0 = twice as fast)
    #[serde(default = "default_speed_factor")]
    pub speed_factor: f32,

    /// Mesh address of the gateway node
    #[serde(default = "default_gateway_address")]
    pub gateway_address: u16,

    /// Robots on the simulated mesh
    #[serde(default = "default_sim_robots")]
    pub robots: Vec<SimRobotConfig>,
}

/// One simulated robot
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimRobotConfig {
    pub address: u16,
    /// 48-bit device id
    pub id: u64,
}

fn default_port() -> String {
    "/dev/ttyACM0".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_tx_timeout_ms() -> u64 {
    500
}

fn default_queue_depth() -> usize {
    32
}

fn default_max_payload_len() -> usize {
    DEFAULT_MAX_PAYLOAD
}

fn default_read_chunk() -> usize {
    64
}

fn default_company_id() -> u16 {
    crate::mesh::DEFAULT_COMPANY_ID
}

fn default_identity_retries() -> u32 {
    5
}

fn default_identity_retry_ms() -> u64 {
    50
}

fn default_speed_factor() -> f32 {
    1.0
}

fn default_gateway_address() -> u16 {
    0x0001
}

fn default_sim_robots() -> Vec<SimRobotConfig> {
    vec![
        SimRobotConfig {
            address: 0x0010,
            id: 0x0000_AAAA_0010,
        },
        SimRobotConfig {
            address: 0x0020,
            id: 0x0000_AAAA_0020,
        },
    ]
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            tx_timeout_ms: default_tx_timeout_ms(),
            rx_queue_depth: default_queue_depth(),
            tx_queue_depth: default_queue_depth(),
            max_payload_len: default_max_payload_len(),
            read_chunk: default_read_chunk(),
        }
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            company_id: default_company_id(),
            identity_retries: default_identity_retries(),
            identity_retry_ms: default_identity_retry_ms(),
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            speed_factor: default_speed_factor(),
            gateway_address: default_gateway_address(),
            robots: default_sim_robots(),
        }
    }
}

impl LinkConfig {
    /// Reject values the transport cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.rx_queue_depth == 0 {
            return Err(Error::InvalidConfig("rx_queue_depth must be non-zero".into()));
        }
        if self.tx_queue_depth == 0 {
            return Err(Error::InvalidConfig("tx_queue_depth must be non-zero".into()));
        }
        if self.tx_timeout_ms == 0 {
            return Err(Error::InvalidConfig("tx_timeout_ms must be non-zero".into()));
        }
        Ok(())
    }
}

impl SetuConfig {
    /// Load configuration from a TOML file
    ///
    /// ```no_run
    /// use setu_io::config::SetuConfig;
    ///
    /// let config = SetuConfig::from_file("setu.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: SetuConfig = toml::from_str(&contents)?;
        config.link.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "Config {} not found, using defaults",
                path.as_ref().display()
            );
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SetuConfig::default();
        assert_eq!(config.link.baud_rate, 115_200);
        assert_eq!(config.link.max_payload_len, DEFAULT_MAX_PAYLOAD);
        assert_eq!(config.mesh.company_id, 0x0059);
        assert_eq!(config.mesh.identity_retries, 5);
        assert_eq!(config.mesh.identity_retry_ms, 50);
        assert_eq!(config.sim.robots.len(), 2);
    }

    fn load_str(content: &str) -> Result<SetuConfig> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        SetuConfig::from_file(file.path())
    }

    #[test]
    fn test_zero_rx_queue_rejected() {
        assert!(matches!(
            load_str("[link]\nrx_queue_depth = 0\n"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_tx_queue_rejected() {
        assert!(matches!(
            load_str("[link]\ntx_queue_depth = 0\n"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_tx_timeout_rejected() {
        assert!(matches!(
            load_str("[link]\ntx_timeout_ms = 0\n"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(LinkConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[link]
port = "/dev/ttyUSB1"

[[sim.robots]]
address = 0x30
id = 0xBEEF
"#
        )
        .unwrap();

        let config = SetuConfig::from_file(file.path()).unwrap();
        assert_eq!(config.link.port, "/dev/ttyUSB1");
        assert_eq!(config.link.tx_timeout_ms, 500);
        assert_eq!(config.mesh.company_id, 0x0059);
        assert_eq!(
            config.sim.robots,
            vec![SimRobotConfig {
                address: 0x30,
                id: 0xBEEF
            }]
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = SetuConfig::load("/nonexistent/setu.toml").unwrap();
        assert_eq!(config.link.port, "/dev/ttyACM0");
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[link\nport = 3").unwrap();
        assert!(SetuConfig::from_file(file.path()).is_err());
    }
}
