//! btleplug implementation of [`Transport`].
//!
//! * [`BleTransport::discover`] scans the first adapter until a peripheral
//!   advertises exactly the requested name.
//! * [`BleDevice::connect_link`] connects and discovers GATT services, each
//!   under a hard timeout.
//! * [`BleDevice::subscribe`] resolves service → characteristic, enables
//!   notifications, and relays matching values into a channel-backed stream.
//! * [`BleDevice::on_disconnect`] watches the adapter's `CentralEvent` stream
//!   for `DeviceDisconnected` of this peripheral. The stream is opened in
//!   `connect_link`, before the link is reported up, so a drop that happens
//!   before the watcher runs is still delivered to it.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::config::MirasClientConfig;
use crate::error::ConnectError;
use crate::transport::{Device, DisconnectObserver, PayloadStream, Transport};

/// Notifications buffered between the btleplug stream and the ingestion task.
const NOTIFICATION_BUFFER: usize = 256;

/// Upper bound on GATT service discovery after the link is up.
const DISCOVER_SERVICES_TIMEOUT: Duration = Duration::from_secs(15);

type CentralEvents = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

// ── BleTransport ──────────────────────────────────────────────────────────────

/// Discovers MIRAS sensors on the host's first Bluetooth adapter.
#[derive(Debug, Clone)]
pub struct BleTransport {
    scan_timeout: Duration,
    connect_timeout: Duration,
}

impl BleTransport {
    pub fn new(config: &MirasClientConfig) -> Self {
        Self {
            scan_timeout: Duration::from_secs(config.scan_timeout_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }

    async fn first_adapter() -> Result<Adapter, ConnectError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(ConnectError::NoAdapter)?;

        // CoreBluetooth starts in an "unknown" state and silently ignores scan
        // requests until it reports PoweredOn.
        #[cfg(target_os = "macos")]
        {
            use btleplug::api::CentralState;

            let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
            loop {
                match adapter.adapter_state().await {
                    Ok(CentralState::PoweredOn) => break,
                    Ok(state) if tokio::time::Instant::now() >= deadline => {
                        warn!("macOS: adapter still {state:?} after 3 s, scanning anyway");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("macOS: adapter_state() failed: {e}");
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        Ok(adapter)
    }

    /// Poll the adapter's peripheral list until one advertises `name`.
    async fn find_by_name(&self, adapter: &Adapter, name: &str) -> Option<Peripheral> {
        let search = async {
            loop {
                for p in adapter.peripherals().await.unwrap_or_default() {
                    if let Ok(Some(props)) = p.properties().await {
                        if props.local_name.as_deref() == Some(name) {
                            return p;
                        }
                    }
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        };
        tokio::time::timeout(self.scan_timeout, search).await.ok()
    }
}

impl Default for BleTransport {
    fn default() -> Self {
        Self::new(&MirasClientConfig::default())
    }
}

#[async_trait]
impl Transport for BleTransport {
    type Device = BleDevice;

    async fn discover(
        &self,
        name: &str,
        service_allowlist: &[Uuid],
    ) -> Result<BleDevice, ConnectError> {
        let adapter = Self::first_adapter().await?;

        // The allow-list only matters once connected: MIRAS does not put its
        // service in the advertisement, so the scan itself is unfiltered.
        debug!("discover: service allow-list {service_allowlist:?}");
        info!(
            "Scanning for {name:?} (timeout: {} s) …",
            self.scan_timeout.as_secs()
        );
        adapter.start_scan(ScanFilter::default()).await?;
        let found = self.find_by_name(&adapter, name).await;
        adapter.stop_scan().await.ok();

        let peripheral = found.ok_or_else(|| ConnectError::DeviceNotFound {
            name: name.to_owned(),
        })?;
        let (link_lost, _) = watch::channel(false);

        Ok(BleDevice {
            name: name.to_owned(),
            peripheral,
            adapter,
            connect_timeout: self.connect_timeout,
            link_lost,
            events: Mutex::new(None),
            watcher: Mutex::new(None),
        })
    }
}

// ── BleDevice ─────────────────────────────────────────────────────────────────

/// A discovered MIRAS peripheral.
pub struct BleDevice {
    name: String,
    peripheral: Peripheral,
    /// Adapter that found the peripheral; its event stream reports disconnects.
    adapter: Adapter,
    connect_timeout: Duration,
    /// Flipped to `true` once the link is gone; ends the relay task.
    link_lost: watch::Sender<bool>,
    /// Adapter events subscribed in `connect_link`, handed to the watcher.
    events: Mutex<Option<CentralEvents>>,
    watcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Wait for this peripheral's `DeviceDisconnected`. `false` if the adapter
/// stream ended first.
async fn wait_for_disconnect(events: &mut CentralEvents, peripheral_id: &PeripheralId) -> bool {
    while let Some(event) = events.next().await {
        if let CentralEvent::DeviceDisconnected(id) = event {
            if &id == peripheral_id {
                return true;
            }
        }
    }
    false
}

#[async_trait]
impl Device for BleDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> String {
        self.peripheral.id().to_string()
    }

    async fn connect_link(&self) -> Result<(), ConnectError> {
        let events = self
            .adapter
            .events()
            .await
            .map_err(|e| ConnectError::LinkFailure(format!("cannot watch adapter events: {e}")))?;
        *self.events.lock() = Some(events);

        // BlueZ's Device1.Connect can block forever when the device is out of
        // range.
        tokio::time::timeout(self.connect_timeout, self.peripheral.connect())
            .await
            .map_err(|_| {
                ConnectError::LinkFailure(format!(
                    "connect timed out after {} s",
                    self.connect_timeout.as_secs()
                ))
            })?
            .map_err(|e| ConnectError::LinkFailure(e.to_string()))?;

        // bluez-async reports the connection before the GATT cache is filled;
        // discovering too early yields an empty service set.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        tokio::time::timeout(DISCOVER_SERVICES_TIMEOUT, self.peripheral.discover_services())
            .await
            .map_err(|_| ConnectError::LinkFailure("service discovery timed out".into()))?
            .map_err(|e| ConnectError::LinkFailure(e.to_string()))?;

        self.link_lost.send_replace(false);
        info!("{}: link up, services discovered", self.name);
        Ok(())
    }

    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<PayloadStream, ConnectError> {
        let services = self.peripheral.services();
        let svc = services
            .iter()
            .find(|s| s.uuid == service)
            .ok_or(ConnectError::ServiceUnavailable(service))?;
        let chr = svc
            .characteristics
            .iter()
            .find(|c| c.uuid == characteristic)
            .cloned()
            .ok_or(ConnectError::CharacteristicUnavailable(characteristic))?;

        self.peripheral
            .subscribe(&chr)
            .await
            .map_err(|e| ConnectError::Subscribe(e.to_string()))?;
        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| ConnectError::Subscribe(e.to_string()))?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>(NOTIFICATION_BUFFER);
        let mut link_lost = self.link_lost.subscribe();
        let name = self.name.clone();

        tokio::spawn(async move {
            let mut count: u64 = 0;
            loop {
                tokio::select! {
                    notif = notifications.next() => {
                        let Some(notif) = notif else { break };
                        if notif.uuid != characteristic {
                            debug!("{name}: ignoring notification from {}", notif.uuid);
                            continue;
                        }
                        count += 1;
                        if count <= 5 || count % 500 == 0 {
                            info!("{name}: notif #{count} len={}", notif.value.len());
                        }
                        if tx.send(notif.value).await.is_err() {
                            break;
                        }
                    }
                    _ = async { let _ = link_lost.wait_for(|lost| *lost).await; } => break,
                }
            }
            info!("{name}: notification relay ended after {count} notifications");
        });

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|value| (value, rx))
        })
        .boxed())
    }

    fn on_disconnect(&self, observer: DisconnectObserver) {
        let events = self.events.lock().take();
        let adapter = self.adapter.clone();
        let peripheral = self.peripheral.clone();
        let peripheral_id = self.peripheral.id();
        let link_lost = self.link_lost.clone();
        let name = self.name.clone();

        let task = tokio::spawn(async move {
            let mut events = match events {
                Some(events) => events,
                None => match adapter.events().await {
                    Ok(events) => events,
                    Err(e) => {
                        warn!("{name}: cannot watch adapter events, disconnects go unnoticed: {e}");
                        return;
                    }
                },
            };

            // The link may have dropped between connect and registration.
            let lost = if !peripheral.is_connected().await.unwrap_or(true) {
                info!("{name}: link already down when the watcher started");
                true
            } else {
                wait_for_disconnect(&mut events, &peripheral_id).await
            };
            if !lost {
                warn!("{name}: adapter event stream ended, disconnects go unnoticed");
                return;
            }

            info!("{name}: adapter reported disconnect");
            link_lost.send_replace(true);
            observer();
        });

        if let Some(previous) = self.watcher.lock().replace(task) {
            previous.abort();
        }
    }

    async fn disconnect(&self) -> Result<(), ConnectError> {
        self.link_lost.send_replace(true);
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
