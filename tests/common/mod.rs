//! Scripted in-memory transport for driving `ConnectionManager` without a radio.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use miras_rs::error::ConnectError;
use miras_rs::protocol::{DEVICE_NAME, MIRAS_CHARACTERISTIC_UUID, MIRAS_SERVICE_UUID};
use miras_rs::transport::{Device, DisconnectObserver, PayloadStream, Transport};

/// Test-side view of whatever the mock device is doing.
#[derive(Default)]
pub struct Control {
    payloads: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    /// Every observer ever registered, oldest first.
    observers: Mutex<Vec<Option<DisconnectObserver>>>,
    disconnect_calls: AtomicUsize,
    discover_calls: AtomicUsize,
}

impl Control {
    /// Deliver one notification on the current subscription.
    pub fn notify(&self, payload: &[u8]) {
        let tx = self.payloads.lock();
        let tx = tx.as_ref().expect("no active subscription");
        tx.send(payload.to_vec()).expect("stream receiver dropped");
    }

    /// Simulate the radio dropping the link: end the stream, then fire the
    /// most recently registered observer.
    pub fn trigger_disconnect(&self) {
        self.payloads.lock().take();
        let observer = self.observers.lock().last_mut().and_then(Option::take);
        if let Some(observer) = observer {
            observer();
        }
    }

    /// Fire the observer registered by the `index`-th successful connect.
    pub fn fire_observer(&self, index: usize) {
        let observer = self
            .observers
            .lock()
            .get_mut(index)
            .and_then(Option::take);
        if let Some(observer) = observer {
            observer();
        }
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }
}

/// What the fake device exposes and where it fails.
#[derive(Clone)]
pub struct MockTransport {
    pub advertised_name: String,
    pub fail_link: bool,
    /// The link is already gone by the time an observer is registered.
    pub down_before_watch: bool,
    pub service: Uuid,
    pub characteristic: Uuid,
    pub control: Arc<Control>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            advertised_name: DEVICE_NAME.into(),
            fail_link: false,
            down_before_watch: false,
            service: MIRAS_SERVICE_UUID,
            characteristic: MIRAS_CHARACTERISTIC_UUID,
            control: Arc::new(Control::default()),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Device = MockDevice;

    async fn discover(
        &self,
        name: &str,
        _service_allowlist: &[Uuid],
    ) -> Result<MockDevice, ConnectError> {
        self.control.discover_calls.fetch_add(1, Ordering::SeqCst);
        if name != self.advertised_name {
            return Err(ConnectError::DeviceNotFound { name: name.into() });
        }
        Ok(MockDevice {
            script: self.clone(),
        })
    }
}

pub struct MockDevice {
    script: MockTransport,
}

#[async_trait]
impl Device for MockDevice {
    fn name(&self) -> &str {
        &self.script.advertised_name
    }

    fn id(&self) -> String {
        "mock-device".into()
    }

    async fn connect_link(&self) -> Result<(), ConnectError> {
        if self.script.fail_link {
            return Err(ConnectError::LinkFailure("out of range".into()));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<PayloadStream, ConnectError> {
        if service != self.script.service {
            return Err(ConnectError::ServiceUnavailable(service));
        }
        if characteristic != self.script.characteristic {
            return Err(ConnectError::CharacteristicUnavailable(characteristic));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.script.control.payloads.lock() = Some(tx);
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|v| (v, rx))
        })
        .boxed())
    }

    fn on_disconnect(&self, observer: DisconnectObserver) {
        if self.script.down_before_watch {
            self.script.control.payloads.lock().take();
            self.script.control.observers.lock().push(None);
            observer();
            return;
        }
        self.script.control.observers.lock().push(Some(observer));
    }

    async fn disconnect(&self) -> Result<(), ConnectError> {
        self.script
            .control
            .disconnect_calls
            .fetch_add(1, Ordering::SeqCst);
        self.script.control.payloads.lock().take();
        Ok(())
    }
}
