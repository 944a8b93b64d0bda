//! Control-plane handshake acceptance.

use std::net::SocketAddr;
use std::time::Duration;

use fleetwire::config::TimeoutConfig;
use fleetwire::orchestrator::handshake::accept_handshakes;
use fleetwire::orchestrator::WorkerRecord;
use fleetwire::protocol::{Handshake, WorkerId};
use fleetwire::AppError;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::test_helpers::FakePipe;

fn timeouts() -> TimeoutConfig {
    TimeoutConfig {
        accept_ms: 500,
        handshake_ms: 200,
        ..TimeoutConfig::default()
    }
}

fn records(n: i32) -> Vec<WorkerRecord<FakePipe>> {
    (0..n)
        .map(|id| WorkerRecord::spawned(id, FakePipe::new()))
        .collect()
}

async fn listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Connect and send raw bytes; the stream is kept open until the returned
/// handle is dropped.
async fn send_raw(addr: SocketAddr, bytes: &[u8]) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    stream
}

async fn send_handshake(addr: SocketAddr, worker_id: WorkerId) -> TcpStream {
    send_raw(addr, &Handshake::new(worker_id).encode()).await
}

#[tokio::test]
async fn handshakes_in_any_order_attach_to_their_records() {
    let (listener, addr) = listener().await;
    let mut table = records(3);
    let clients = tokio::spawn(async move {
        let mut streams = Vec::new();
        for id in [2, 0, 1] {
            streams.push(send_handshake(addr, id).await);
        }
        streams
    });

    accept_handshakes(&listener, &mut table, &timeouts(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(table.iter().all(|r| r.is_handshaken() && r.has_connection()));
    drop(clients.await.unwrap());
}

#[tokio::test]
async fn duplicate_worker_id_aborts_startup() {
    let (listener, addr) = listener().await;
    let mut table = records(2);
    let clients = tokio::spawn(async move {
        vec![send_handshake(addr, 1).await, send_handshake(addr, 1).await]
    });

    let err = accept_handshakes(&listener, &mut table, &timeouts(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Startup(ref msg) if msg.contains("duplicate")));
    drop(clients.await.unwrap());
}

#[tokio::test]
async fn out_of_range_worker_id_aborts_startup() {
    let (listener, addr) = listener().await;
    let mut table = records(2);
    let client = tokio::spawn(async move { send_handshake(addr, 5).await });

    let err = accept_handshakes(&listener, &mut table, &timeouts(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Startup(_)));
    assert!(!table[0].is_handshaken() && !table[1].is_handshaken());
    drop(client.await.unwrap());
}

#[tokio::test]
async fn bad_magic_aborts_startup() {
    let (listener, addr) = listener().await;
    let mut table = records(1);
    let mut bytes = Handshake::new(0).encode();
    bytes[0] ^= 0xFF;
    let client = tokio::spawn(async move { send_raw(addr, &bytes).await });

    let err = accept_handshakes(&listener, &mut table, &timeouts(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Protocol(_)));
    drop(client.await.unwrap());
}

#[tokio::test]
async fn silent_connection_hits_the_handshake_timeout() {
    let (listener, addr) = listener().await;
    let mut table = records(1);
    let client = tokio::spawn(async move { send_raw(addr, &[0xEF, 0xBE]).await });

    let err = accept_handshakes(&listener, &mut table, &timeouts(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Startup(ref msg) if msg.contains("handshake")));
    drop(client.await.unwrap());
}

#[tokio::test]
async fn missing_worker_hits_the_accept_timeout() {
    let (listener, addr) = listener().await;
    let mut table = records(2);
    let client = tokio::spawn(async move { send_handshake(addr, 0).await });

    let err = accept_handshakes(&listener, &mut table, &timeouts(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Startup(ref msg) if msg.contains("2/2")));
    assert!(table[0].is_handshaken());
    drop(client.await.unwrap());
}

#[tokio::test]
async fn cancellation_interrupts_accept() {
    let (listener, _addr) = listener().await;
    let mut table = records(1);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = accept_handshakes(&listener, &mut table, &timeouts(), &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.exit_status(), 130);
}
