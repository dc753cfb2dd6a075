//! Error types for SetuIO

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// SetuIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration parsed but holds an unusable value
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Bounded queue is full, the item was dropped
    #[error("Queue full: {0}")]
    QueueFull(&'static str),

    /// Peer side of a channel is gone
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Byte buffer is not a valid frame
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Link was used before `start`
    #[error("Link not started")]
    NotStarted,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
