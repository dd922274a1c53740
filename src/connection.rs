//! Connection manager: one sensor, one link, one notification stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::MirasClientConfig;
use crate::error::ConnectError;
use crate::transport::{Device, NotificationStream, Transport};
use crate::types::ConnectionState;

/// Owns the single modelled connection: its [`ConnectionState`] and the
/// handle of the connected device.
///
/// State changes come from two places. A successful [`connect`] moves to
/// `Connected`. The transport's disconnect notification moves to
/// `Disconnected` and clears the device handle, independently of any
/// explicit [`disconnect`] call. There is no automatic reconnection.
///
/// The manager assumes a single caller drives `connect`; the UI layer is
/// expected to disable the connect action while connected.
///
/// [`connect`]: ConnectionManager::connect
/// [`disconnect`]: ConnectionManager::disconnect
pub struct ConnectionManager<T: Transport> {
    transport: T,
    shared: Arc<Shared<T::Device>>,
}

struct Shared<D> {
    active: Mutex<Option<Active<D>>>,
    state: watch::Sender<ConnectionState>,
    /// Bumped on every successful connect so that a late observer from an
    /// earlier link cannot clear a newer one.
    generation: AtomicU64,
}

struct Active<D> {
    device: Arc<D>,
    generation: u64,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            shared: Arc::new(Shared {
                active: Mutex::new(None),
                state,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Discover `device_name`, link to it, subscribe to `characteristic` on
    /// `service`, and return the resulting notification stream.
    ///
    /// On success the state becomes `Connected` and the stream's
    /// [`NotificationStream::started_at`] is the origin for sample timestamps.
    /// On failure the state is left untouched and nothing is retried.
    pub async fn connect(
        &self,
        device_name: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, ConnectError> {
        info!("Discovering {device_name:?} …");
        let device = self.transport.discover(device_name, &[service]).await?;
        info!("Found {} [{}], connecting …", device.name(), device.id());

        device.connect_link().await?;

        let payloads = match device.subscribe(service, characteristic).await {
            Ok(p) => p,
            Err(e) => {
                // Do not leave the link half-open when resolution fails.
                if let Err(close_err) = device.disconnect().await {
                    debug!("disconnect after failed subscribe: {close_err}");
                }
                return Err(e);
            }
        };

        let device = Arc::new(device);
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut active = self.shared.active.lock();
            *active = Some(Active {
                device: Arc::clone(&device),
                generation,
            });
        }
        self.shared.state.send_replace(ConnectionState::Connected);

        let shared = Arc::clone(&self.shared);
        device.on_disconnect(Box::new(move || shared.link_lost(generation)));

        info!("Connected to {}; notifications enabled", device.name());
        Ok(NotificationStream::new(payloads, Instant::now()))
    }

    /// [`connect`](Self::connect) using the identifiers in `config`.
    pub async fn connect_with(
        &self,
        config: &MirasClientConfig,
    ) -> Result<NotificationStream, ConnectError> {
        self.connect(
            &config.device_name,
            config.service_uuid,
            config.characteristic_uuid,
        )
        .await
    }

    /// Close the current link, if any, and move to `Disconnected`.
    pub async fn disconnect(&self) -> Result<(), ConnectError> {
        let active = self.shared.active.lock().take();
        self.shared.state.send_replace(ConnectionState::Disconnected);
        match active {
            Some(active) => active.device.disconnect().await,
            None => Ok(()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Receiver that is notified on every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Handle of the connected device, `None` while disconnected.
    pub fn device(&self) -> Option<Arc<T::Device>> {
        self.shared
            .active
            .lock()
            .as_ref()
            .map(|a| Arc::clone(&a.device))
    }

    /// Advertised name of the connected device.
    pub fn device_name(&self) -> Option<String> {
        self.device().map(|d| d.name().to_owned())
    }
}

impl<D: Device> Shared<D> {
    /// Disconnect observer body: clear the handle if it still belongs to the
    /// link that registered the observer.
    fn link_lost(&self, generation: u64) {
        let lost = {
            let mut active = self.active.lock();
            match active.as_ref().map(|a| a.generation) {
                Some(current) if current == generation => active.take(),
                Some(_) => {
                    warn!("Ignoring disconnect from a superseded link (gen {generation})");
                    return;
                }
                None => {
                    debug!("Disconnect observed after the link was already closed");
                    return;
                }
            }
        };
        if let Some(lost) = lost {
            info!("Link to {} lost", lost.device.name());
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }
}
