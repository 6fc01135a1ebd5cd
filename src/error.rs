use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BifrostError>;

/// Configuration errors are fatal at startup; nothing on the data plane
/// returns them.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid forward mode: {0}")]
    InvalidMode(String),
    #[error("invalid bind address: {0}")]
    InvalidBindAddress(String),
    #[error("invalid upstream address: {0}")]
    InvalidUpstream(String),
    #[error("empty upstream list")]
    EmptyUpstreams,
    #[error("invalid zone group (expected zone@addr[,addr]...): {0}")]
    InvalidZoneGroup(String),
    #[error("zone name longer than {1} octets: {0}")]
    ZoneTooLong(String, usize),
    #[error("failed to read config file {0}: {1}")]
    Read(String, String),
    #[error("failed to parse config file {0}: {1}")]
    Parse(String, String),
}

#[derive(Debug, Clone, Error)]
pub enum BifrostError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
    #[error("metrics error: {0}")]
    Metrics(String),
}

impl From<std::io::Error> for BifrostError {
    fn from(err: std::io::Error) -> Self {
        BifrostError::Io(Arc::new(err))
    }
}

impl From<prometheus::Error> for BifrostError {
    fn from(err: prometheus::Error) -> Self {
        BifrostError::Metrics(err.to_string())
    }
}
