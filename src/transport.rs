//! The wireless transport as a capability.
//!
//! [`crate::connection::ConnectionManager`] only talks to these traits. The
//! real implementation lives in [`crate::ble`] (btleplug); the simulator and
//! the test suite provide their own.
//!
//! ```text
//! Transport::discover ──► Device::connect_link ──► Device::subscribe ──► stream of payloads
//!                              │
//!                              └── Device::on_disconnect(observer)
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::ConnectError;

/// Callback fired once when the transport reports that the link dropped.
pub type DisconnectObserver = Box<dyn FnOnce() + Send + 'static>;

/// Raw notification values as delivered by a subscribed characteristic.
pub type PayloadStream = BoxStream<'static, Vec<u8>>;

/// Entry point of a transport: finds the sensor.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Device: Device;

    /// Find the device whose advertised name equals `name` exactly.
    ///
    /// `service_allowlist` names the services the caller intends to use once
    /// connected. Fails with [`ConnectError::DeviceNotFound`] when no device
    /// matches or discovery was cancelled.
    async fn discover(
        &self,
        name: &str,
        service_allowlist: &[Uuid],
    ) -> Result<Self::Device, ConnectError>;
}

/// A discovered device.
#[async_trait]
pub trait Device: Send + Sync + 'static {
    /// Advertised name.
    fn name(&self) -> &str;

    /// Platform identifier (UUID on macOS/Windows, MAC address on Linux).
    fn id(&self) -> String;

    /// Establish the link and resolve its services.
    /// Fails with [`ConnectError::LinkFailure`].
    async fn connect_link(&self) -> Result<(), ConnectError>;

    /// Resolve `service` → `characteristic` and enable notifications.
    ///
    /// Fails with [`ConnectError::ServiceUnavailable`] or
    /// [`ConnectError::CharacteristicUnavailable`] when resolution fails. The
    /// returned stream yields payloads in delivery order and ends when the link
    /// drops.
    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<PayloadStream, ConnectError>;

    /// Register `observer` to run when the link is lost, whatever the cause.
    fn on_disconnect(&self, observer: DisconnectObserver);

    /// Close the link from this side.
    async fn disconnect(&self) -> Result<(), ConnectError>;
}

/// Payloads from the subscribed characteristic, anchored to the instant the
/// connection was established.
///
/// Lazy and non-restartable: it yields until the link drops and then ends for
/// good. A new stream requires a new connect.
pub struct NotificationStream {
    inner: PayloadStream,
    started_at: Instant,
}

impl NotificationStream {
    pub fn new(inner: PayloadStream, started_at: Instant) -> Self {
        Self { inner, started_at }
    }

    /// Origin for all sample timestamps of this connection.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Milliseconds elapsed since [`NotificationStream::started_at`].
    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

impl Stream for NotificationStream {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
