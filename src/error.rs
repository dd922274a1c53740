//! Error types for connecting to the sensor and writing batches.

use thiserror::Error;
use uuid::Uuid;

/// Failures while discovering, linking, or subscribing to the sensor.
///
/// None of these are retried automatically; they are meant to be shown to the
/// user, who may trigger a fresh connect.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The host has no usable Bluetooth adapter.
    #[error("no Bluetooth adapter found")]
    NoAdapter,

    /// No device with this exact name was discovered, or the user cancelled.
    #[error("device {name:?} not found")]
    DeviceNotFound { name: String },

    /// The link (GATT connection) could not be established.
    #[error("link failure: {0}")]
    LinkFailure(String),

    /// The connected device does not expose the requested service.
    #[error("service {0} unavailable on device")]
    ServiceUnavailable(Uuid),

    /// The service does not expose the requested characteristic.
    #[error("characteristic {0} unavailable on device")]
    CharacteristicUnavailable(Uuid),

    /// Enabling notifications on the characteristic failed.
    #[error("could not subscribe to notifications: {0}")]
    Subscribe(String),

    /// Any other error reported by the Bluetooth stack.
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
}

/// A rejected or failed write to the persistence sink.
///
/// Caught and logged by the flush scheduler; the batch is dropped.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The remote store answered with a non-success status.
    #[error("server error: HTTP {status}: {body}")]
    Server { status: u16, body: String },

    /// The batch could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local filesystem failure (directory sink).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The sink refused the write for a reason of its own.
    #[error("write rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => SinkError::Server {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => SinkError::Network(e.to_string()),
        }
    }
}
