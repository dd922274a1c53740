mod common;

use common::MockTransport;
use uuid::Uuid;

use miras_rs::config::MirasClientConfig;
use miras_rs::connection::ConnectionManager;
use miras_rs::error::ConnectError;
use miras_rs::protocol::{MIRAS_CHARACTERISTIC_UUID, MIRAS_SERVICE_UUID};
use miras_rs::types::ConnectionState;

#[tokio::test]
async fn connect_moves_to_connected_and_exposes_device() {
    let manager = ConnectionManager::new(MockTransport::new());
    let mut state = manager.subscribe_state();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.device().is_none());

    manager
        .connect_with(&MirasClientConfig::default())
        .await
        .unwrap();

    assert!(manager.is_connected());
    assert_eq!(manager.device_name().as_deref(), Some("MIRAS"));
    assert!(state.has_changed().unwrap());
    assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);
}

#[tokio::test]
async fn unknown_name_is_device_not_found() {
    let manager = ConnectionManager::new(MockTransport::new());

    let err = manager
        .connect("NOT-MIRAS", MIRAS_SERVICE_UUID, MIRAS_CHARACTERISTIC_UUID)
        .await
        .err()
        .unwrap();

    assert!(matches!(err, ConnectError::DeviceNotFound { ref name } if name == "NOT-MIRAS"));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.device().is_none());
}

#[tokio::test]
async fn link_failure_leaves_state_untouched() {
    let mut transport = MockTransport::new();
    transport.fail_link = true;
    let manager = ConnectionManager::new(transport);

    let err = manager
        .connect_with(&MirasClientConfig::default())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, ConnectError::LinkFailure(_)));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn missing_service_closes_the_link() {
    let mut transport = MockTransport::new();
    transport.service = Uuid::from_u128(0xfeed);
    let control = transport.control.clone();
    let manager = ConnectionManager::new(transport);

    let err = manager
        .connect_with(&MirasClientConfig::default())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, ConnectError::ServiceUnavailable(u) if u == MIRAS_SERVICE_UUID));
    assert_eq!(control.disconnect_calls(), 1);
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn missing_characteristic_is_reported() {
    let mut transport = MockTransport::new();
    transport.characteristic = Uuid::from_u128(0xbeef);
    let manager = ConnectionManager::new(transport);

    let err = manager
        .connect_with(&MirasClientConfig::default())
        .await
        .err()
        .unwrap();

    assert!(matches!(
        err,
        ConnectError::CharacteristicUnavailable(u) if u == MIRAS_CHARACTERISTIC_UUID
    ));
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn transport_disconnect_clears_state_and_device() {
    let transport = MockTransport::new();
    let control = transport.control.clone();
    let manager = ConnectionManager::new(transport);
    manager
        .connect_with(&MirasClientConfig::default())
        .await
        .unwrap();

    control.trigger_disconnect();

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.device().is_none());
    // Passive detection only; nothing reconnects.
    assert_eq!(control.discover_calls(), 1);
}

#[tokio::test]
async fn link_lost_before_the_watcher_registers_still_disconnects() {
    use futures::StreamExt;

    let mut transport = MockTransport::new();
    transport.down_before_watch = true;
    let manager = ConnectionManager::new(transport);

    let mut stream = manager
        .connect_with(&MirasClientConfig::default())
        .await
        .unwrap();

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.device().is_none());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn explicit_disconnect_closes_the_device() {
    let transport = MockTransport::new();
    let control = transport.control.clone();
    let manager = ConnectionManager::new(transport);
    manager
        .connect_with(&MirasClientConfig::default())
        .await
        .unwrap();

    manager.disconnect().await.unwrap();

    assert_eq!(control.disconnect_calls(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.device().is_none());

    // A second call has no device left to close.
    manager.disconnect().await.unwrap();
    assert_eq!(control.disconnect_calls(), 1);
}

#[tokio::test]
async fn late_observer_from_an_old_link_is_ignored() {
    let transport = MockTransport::new();
    let control = transport.control.clone();
    let manager = ConnectionManager::new(transport);
    let config = MirasClientConfig::default();

    manager.connect_with(&config).await.unwrap();
    manager.disconnect().await.unwrap();
    manager.connect_with(&config).await.unwrap();

    // The first link's observer fires only now.
    control.fire_observer(0);
    assert!(manager.is_connected());
    assert!(manager.device().is_some());

    control.fire_observer(1);
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn stream_ends_when_the_link_drops() {
    use futures::StreamExt;

    let transport = MockTransport::new();
    let control = transport.control.clone();
    let manager = ConnectionManager::new(transport);
    let mut stream = manager
        .connect_with(&MirasClientConfig::default())
        .await
        .unwrap();

    control.notify(b"1,2,3");
    assert_eq!(stream.next().await.as_deref(), Some(&b"1,2,3"[..]));

    control.trigger_disconnect();
    assert!(stream.next().await.is_none());
}
