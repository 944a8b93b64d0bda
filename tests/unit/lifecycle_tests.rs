//! Socket registry and interrupt handling.

use std::time::Duration;

use fleetwire::lifecycle::{install_signal_listener, interrupted, Slot, SocketRegistry};
use fleetwire::AppError;
use nix::sys::signal::{raise, Signal};
use serial_test::serial;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;

#[test]
fn release_all_is_idempotent() {
    let mut registry: SocketRegistry<u8, u8> = SocketRegistry::new();
    registry.register_tcp(1).unwrap();
    registry.register_udp(2).unwrap();

    registry.release_all();
    registry.release_all();

    assert!(registry.is_released());
    assert!(registry.tcp().is_none());
    assert!(registry.udp().is_none());
}

#[test]
fn released_slots_cannot_be_reopened() {
    let mut registry: SocketRegistry<u8, u8> = SocketRegistry::new();
    registry.release_all();

    assert!(matches!(registry.register_tcp(1), Err(AppError::Io(_))));
    assert!(matches!(registry.register_udp(1), Err(AppError::Io(_))));
}

#[test]
fn occupied_slot_rejects_a_second_socket() {
    let mut registry: SocketRegistry<u8, u8> = SocketRegistry::new();
    registry.register_tcp(1).unwrap();

    assert!(registry.register_tcp(2).is_err());
    assert_eq!(registry.tcp(), Some(&1));
}

#[test]
fn release_tcp_leaves_udp_open() {
    let mut registry: SocketRegistry<u8, u8> = SocketRegistry::new();
    registry.register_tcp(1).unwrap();
    registry.register_udp(2).unwrap();

    registry.release_tcp();

    assert!(registry.tcp().is_none());
    assert_eq!(registry.udp(), Some(&2));
    assert!(!registry.is_released());
}

#[test]
fn empty_slot_is_not_closed() {
    let slot: Slot<u8> = Slot::Empty;
    assert!(!slot.is_closed());
    assert!(slot.get().is_none());
}

#[tokio::test]
async fn released_registry_frees_its_ports() {
    let mut registry: SocketRegistry<TcpListener, UdpSocket> = SocketRegistry::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    registry.register_tcp(listener).unwrap();

    registry.release_all();

    TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("port should be free after release");
}

#[test]
fn interrupted_maps_to_exit_130() {
    let err = interrupted("test");
    assert!(matches!(err, AppError::Interrupted(_)));
    assert_eq!(err.exit_status(), 130);
}

#[tokio::test]
#[serial]
async fn signal_cancels_the_token() {
    let cancel = CancellationToken::new();
    let listener = install_signal_listener(cancel.clone()).unwrap();

    raise(Signal::SIGHUP).unwrap();

    tokio::time::timeout(Duration::from_secs(5), cancel.cancelled())
        .await
        .expect("signal should cancel the token");
    listener.await.unwrap();
}

#[tokio::test]
#[serial]
async fn listener_exits_when_token_is_cancelled_elsewhere() {
    let cancel = CancellationToken::new();
    let listener = install_signal_listener(cancel.clone()).unwrap();

    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(5), listener)
        .await
        .expect("listener should stop")
        .unwrap();
}
