use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Control request rejected: {0}")]
    Control(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl MonitorError {
    /// A superseded request was aborted on purpose.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, MonitorError::Cancelled)
    }
}

impl From<reqwest::Error> for MonitorError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            MonitorError::Timeout(error.to_string())
        } else if error.is_decode() {
            MonitorError::InvalidPayload(error.to_string())
        } else {
            MonitorError::Connection(error.to_string())
        }
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(error: serde_json::Error) -> Self {
        MonitorError::Serialization(error.to_string())
    }
}

impl From<config::ConfigError> for MonitorError {
    fn from(error: config::ConfigError) -> Self {
        MonitorError::Config(error.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for MonitorError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        MonitorError::Timeout(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
