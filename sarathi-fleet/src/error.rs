//! Error types for SarathiFleet

use thiserror::Error;

/// SarathiFleet error type
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Mesh link error: {0}")]
    Link(#[from] setu_io::Error),

    #[error("Shadow document error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cloud error: {0}")]
    Cloud(String),
}

impl From<toml::de::Error> for FleetError {
    fn from(e: toml::de::Error) -> Self {
        FleetError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
