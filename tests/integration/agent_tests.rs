//! Worker agent against a hand-driven orchestrator endpoint.

use std::time::Duration;

use fleetwire::agent::{run_agent, AgentConfig, TaskSpec};
use fleetwire::orchestrator::handshake::read_handshake;
use fleetwire::protocol::{LifecycleMessage, MessageKind};
use fleetwire::AppError;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;

fn config(tcp_port: u16, udp_port: u16, task: TaskSpec) -> AgentConfig {
    AgentConfig {
        worker_id: 1,
        tcp_port,
        udp_port,
        task_id: 11,
        connect_timeout: Duration::from_secs(2),
        task,
    }
}

async fn receive_until_terminal(socket: &UdpSocket) -> Vec<MessageKind> {
    let mut kinds = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .expect("agent should keep reporting")
            .unwrap();
        let message = LifecycleMessage::decode(&buf[..len]).unwrap();
        assert_eq!(message.worker_id, 1);
        kinds.push(message.kind);
        if message.kind.is_terminal() {
            return kinds;
        }
    }
}

#[tokio::test]
async fn agent_registers_reports_and_shuts_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let tcp_port = listener.local_addr().unwrap().port();
    let udp_port = socket.local_addr().unwrap().port();

    let agent = tokio::spawn(async move {
        let task = TaskSpec::Lines {
            count: 2,
            text: "abcd".into(),
            interval: Duration::ZERO,
        };
        let mut out = Vec::new();
        let status = run_agent(
            &config(tcp_port, udp_port, task),
            &mut out,
            &CancellationToken::new(),
        )
        .await;
        (status, out)
    });

    let (mut stream, _) = listener.accept().await.unwrap();
    let handshake = read_handshake(&mut stream, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(handshake.worker_id, 1);

    let kinds = receive_until_terminal(&socket).await;
    assert_eq!(
        kinds,
        vec![
            MessageKind::TaskInit { task_id: 11 },
            MessageKind::Update { bytes_written: 5 },
            MessageKind::Update { bytes_written: 5 },
            MessageKind::TaskDone { status_code: 0 },
            MessageKind::Shutdown,
        ]
    );

    let (status, out) = agent.await.unwrap();
    assert_eq!(status.unwrap(), 0);
    assert_eq!(out, b"abcd\nabcd\n");
}

#[tokio::test]
async fn agent_without_orchestrator_fails_fast() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tcp_port = listener.local_addr().unwrap().port();
    drop(listener);

    let task = TaskSpec::Lines {
        count: 1,
        text: "x".into(),
        interval: Duration::ZERO,
    };
    let mut out = Vec::new();
    let err = run_agent(
        &config(tcp_port, 9, task),
        &mut out,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::Agent(_)));
    assert!(out.is_empty(), "no task output before registration");
}

#[tokio::test]
async fn failing_task_sends_crash() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let tcp_port = listener.local_addr().unwrap().port();
    let udp_port = socket.local_addr().unwrap().port();

    let agent = tokio::spawn(async move {
        let task = TaskSpec::Command {
            program: "sh".into(),
            args: vec!["-c".into(), "kill -KILL $$".into()],
            update_interval: Duration::from_millis(10),
        };
        let mut out = Vec::new();
        run_agent(
            &config(tcp_port, udp_port, task),
            &mut out,
            &CancellationToken::new(),
        )
        .await
    });

    let (_stream, _) = listener.accept().await.unwrap();
    let kinds = receive_until_terminal(&socket).await;

    assert_eq!(kinds.first(), Some(&MessageKind::TaskInit { task_id: 11 }));
    assert_eq!(kinds.last(), Some(&MessageKind::Crash));
    assert!(agent.await.unwrap().is_err());
}

#[tokio::test]
async fn lost_lifecycle_datagrams_keep_the_task_status() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tcp_port = listener.local_addr().unwrap().port();
    let closed = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let udp_port = closed.local_addr().unwrap().port();
    drop(closed);

    let agent = tokio::spawn(async move {
        let task = TaskSpec::Lines {
            count: 1,
            text: "x".into(),
            interval: Duration::ZERO,
        };
        let mut out = Vec::new();
        let status = run_agent(
            &config(tcp_port, udp_port, task),
            &mut out,
            &CancellationToken::new(),
        )
        .await;
        (status, out)
    });

    let (_stream, _) = listener.accept().await.unwrap();
    let (status, out) = agent.await.unwrap();

    assert_eq!(status.unwrap(), 0);
    assert_eq!(out, b"x\n");
}
