//! Synthetic MIRAS sensor for running the full pipeline without hardware.
//!
//! [`SimulatedTransport`] "discovers" a device called `MIRAS` and, once
//! subscribed, emits 12-channel comma-separated integer payloads at a fixed
//! rate, encoded exactly as the firmware does. With
//! [`SimulatedTransport::drop_after`] the link drops by itself after a given
//! number of notifications, which exercises the passive disconnect path.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::ConnectError;
use crate::protocol::{
    encode_payload, CHANNEL_COUNT, DEVICE_NAME, MIRAS_CHARACTERISTIC_UUID, MIRAS_SERVICE_UUID,
};
use crate::transport::{Device, DisconnectObserver, PayloadStream, Transport};

/// Default notification rate of the simulated sensor.
pub const DEFAULT_RATE_HZ: f64 = 50.0;

/// One synthetic reading for channel `ch` at time `t` (seconds).
///
/// A slow 1 Hz wave plus a faster 7 Hz component, phase-shifted per channel,
/// riding on a baseline of 512 with a deterministic noise floor. Output stays
/// within 0..=1023, the range of the sensor's 10-bit ADC.
pub fn sim_reading(t: f64, ch: usize) -> i64 {
    let phi = ch as f64 * PI / 6.0;
    let slow = 300.0 * (2.0 * PI * 1.0 * t + phi).sin();
    let fast = 60.0 * (2.0 * PI * 7.0 * t + phi * 1.3).sin();
    let nx = t * 1000.7 + ch as f64 * 137.508;
    let noise = ((nx.sin() * 9973.1).fract() - 0.5) * 40.0;
    (512.0 + slow + fast + noise).round().clamp(0.0, 1023.0) as i64
}

/// A [`Transport`] whose only device is a software signal generator.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    advertised_name: String,
    rate_hz: f64,
    drop_after: Option<u64>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self {
            advertised_name: DEVICE_NAME.into(),
            rate_hz: DEFAULT_RATE_HZ,
            drop_after: None,
        }
    }

    /// Notifications per second. Clamped to at least 1 Hz.
    pub fn rate_hz(mut self, rate_hz: f64) -> Self {
        self.rate_hz = rate_hz.max(1.0);
        self
    }

    /// Drop the link on its own after `n` notifications.
    pub fn drop_after(mut self, n: u64) -> Self {
        self.drop_after = Some(n);
        self
    }

    /// Advertise under a different name, to exercise the not-found path.
    pub fn advertised_name(mut self, name: impl Into<String>) -> Self {
        self.advertised_name = name.into();
        self
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    type Device = SimulatedDevice;

    async fn discover(
        &self,
        name: &str,
        _service_allowlist: &[Uuid],
    ) -> Result<SimulatedDevice, ConnectError> {
        if name != self.advertised_name {
            return Err(ConnectError::DeviceNotFound {
                name: name.to_owned(),
            });
        }
        let (stop, _) = watch::channel(false);
        Ok(SimulatedDevice {
            inner: Arc::new(DeviceInner {
                name: self.advertised_name.clone(),
                period: Duration::from_secs_f64(1.0 / self.rate_hz),
                drop_after: self.drop_after,
                linked: AtomicBool::new(false),
                stop,
                observer: Mutex::new(None),
            }),
        })
    }
}

/// The simulated sensor.
pub struct SimulatedDevice {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    name: String,
    period: Duration,
    drop_after: Option<u64>,
    linked: AtomicBool,
    /// `true` once the link is down; stops the generator.
    stop: watch::Sender<bool>,
    observer: Mutex<Option<DisconnectObserver>>,
}

impl DeviceInner {
    /// Take the link down and fire the registered observer, at most once.
    fn drop_link(&self) {
        if !self.linked.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop.send_replace(true);
        info!("{}: simulated link down", self.name);
        let observer = self.observer.lock().take();
        if let Some(observer) = observer {
            observer();
        }
    }
}

#[async_trait]
impl Device for SimulatedDevice {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn id(&self) -> String {
        "sim-00:00:00:00:00:00".into()
    }

    async fn connect_link(&self) -> Result<(), ConnectError> {
        self.inner.linked.store(true, Ordering::SeqCst);
        self.inner.stop.send_replace(false);
        Ok(())
    }

    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<PayloadStream, ConnectError> {
        if !self.inner.linked.load(Ordering::SeqCst) {
            return Err(ConnectError::Subscribe("link is not up".into()));
        }
        if service != MIRAS_SERVICE_UUID {
            return Err(ConnectError::ServiceUnavailable(service));
        }
        if characteristic != MIRAS_CHARACTERISTIC_UUID {
            return Err(ConnectError::CharacteristicUnavailable(characteristic));
        }

        let (tx, rx) = mpsc::channel::<Vec<u8>>(64);
        let inner = Arc::clone(&self.inner);
        let mut stop = inner.stop.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.period);
            let dt = inner.period.as_secs_f64();
            let mut t = 0.0_f64;
            let mut sent: u64 = 0;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop.wait_for(|s| *s) => break,
                }
                let values: Vec<i64> = (0..CHANNEL_COUNT).map(|ch| sim_reading(t, ch)).collect();
                if tx.send(encode_payload(&values)).await.is_err() {
                    debug!("{}: generator stopped, receiver gone", inner.name);
                    break;
                }
                sent += 1;
                t += dt;
                if inner.drop_after.is_some_and(|n| sent >= n) {
                    inner.drop_link();
                    break;
                }
            }
            debug!("{}: generator ended after {sent} notifications", inner.name);
        });

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|value| (value, rx))
        })
        .boxed())
    }

    fn on_disconnect(&self, observer: DisconnectObserver) {
        *self.inner.observer.lock() = Some(observer);
    }

    async fn disconnect(&self) -> Result<(), ConnectError> {
        self.inner.drop_link();
        Ok(())
    }
}
