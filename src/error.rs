use std::path::PathBuf;

use thiserror::Error;

/// Errors from a single sensor read attempt
#[derive(Debug, Error)]
pub enum SensorError {
    /// The sysfs attribute could not be read
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The attribute held something that is not a number
    #[error("unparseable value {value:?} in {path:?}")]
    Parse { path: PathBuf, value: String },

    /// The driver returned a physically impossible value
    #[error("implausible {quantity} reading: {value}")]
    Implausible { quantity: &'static str, value: f64 },
}

/// Errors raised by the network link collaborator
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("link unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the MQTT transport collaborator
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("session is not connected")]
    NotConnected,

    #[error("client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("broker refused connection: {0}")]
    Refused(String),

    /// A single message was refused; the session itself is intact
    #[error("message rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Whether the error means the session can no longer be trusted
    pub fn is_connection_loss(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Errors raised while updating the local display
#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("failed to write display output {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
