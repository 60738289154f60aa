//! Integration tests for Go-Back-N data transfer.
//!
//! Each test spins up two in-process endpoints talking over the loopback
//! interface.  Both sides run as separate tokio tasks so they can make
//! progress concurrently without blocking each other.  Where frame counts
//! matter, the endpoints sit behind a [`Simulator`] so the traffic can be
//! inspected or shaped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gbn_over_udp::{
    Channel, Config, Connection, FrameType, Simulator, SimulatorConfig, Socket,
};

/// Bind a socket to an OS-assigned port on loopback.
async fn ephemeral() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

/// Deterministic, non-repeating test payload.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Server half: accept, read until end of stream, close.
async fn receive_all<C: Channel>(channel: C, config: Config) -> Vec<u8> {
    let mut conn = Connection::accept(channel, config).await.expect("accept");
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = conn.recv(&mut buf).await.expect("server recv");
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    conn.close().await.expect("server close");
    out
}

/// Client half: connect, send everything, close.
async fn send_all<C: Channel>(channel: C, server: SocketAddr, config: Config, data: &[u8]) {
    let mut conn = Connection::connect(channel, server, config)
        .await
        .expect("connect");
    let sent = conn.send(data).await.expect("client send");
    assert_eq!(sent, data.len());
    conn.close().await.expect("client close");
}

// ---------------------------------------------------------------------------
// Exact frame accounting
// ---------------------------------------------------------------------------

/// 5000 bytes become four full frames and one of 904 bytes; with a window of
/// eight and no faults every frame is sent and acknowledged exactly once.
#[tokio::test]
async fn five_frames_five_acks_without_faults() {
    let cfg = Config::default()
        .with_timeout(Duration::from_millis(250))
        .with_window(8, 8);
    let data = pattern(5000);

    let server_sim = Arc::new(Simulator::reliable(ephemeral().await));
    let server_addr = server_sim.inner().local_addr;
    let client_sim = Arc::new(Simulator::reliable(ephemeral().await));

    let server = tokio::spawn(receive_all(Arc::clone(&server_sim), cfg.clone()));
    send_all(Arc::clone(&client_sim), server_addr, cfg, &data).await;

    assert_eq!(server.await.unwrap(), data);
    assert_eq!(client_sim.stats().sent(FrameType::Data), 5);
    assert_eq!(server_sim.stats().sent(FrameType::DataAck), 5);
}

/// Losing one frame in the middle of a window produces duplicate acks; the
/// first one sends the whole outstanding window again.
#[tokio::test]
async fn dropped_mid_window_frame_resends_window() {
    let cfg = Config::default()
        .with_timeout(Duration::from_millis(250))
        .with_window(8, 8);
    let data = pattern(5 * 1024);

    let server_sock = ephemeral().await;
    let server_addr = server_sock.local_addr;
    let client_sim = Arc::new(Simulator::reliable(ephemeral().await));
    client_sim.drop_next(FrameType::Data, Some(2), 1);

    let server = tokio::spawn(receive_all(server_sock, cfg.clone()));

    let mut conn = Connection::connect(Arc::clone(&client_sim), server_addr, cfg)
        .await
        .expect("connect");
    conn.send(&data).await.expect("client send");
    let stats = conn.stats();
    conn.close().await.expect("client close");

    assert_eq!(server.await.unwrap(), data);
    // 0..=4 once, then 2, 3 and 4 again.
    assert_eq!(client_sim.stats().sent(FrameType::Data), 8);
    assert_eq!(stats.retransmissions, 3);
    assert_eq!(stats.go_backs, 1);
    assert_eq!(stats.timeouts, 0);
}

// ---------------------------------------------------------------------------
// Reliability under faults
// ---------------------------------------------------------------------------

/// Random loss and corruption in both directions; the stream must arrive
/// intact, in order and without duplicates.
#[tokio::test]
async fn lossy_channel_reassembles_exactly() {
    let cfg = Config {
        linger: Duration::from_secs(2),
        ..Config::default()
            .with_timeout(Duration::from_millis(40))
            .with_max_attempts(30)
    };
    let data = pattern(40 * 1024 + 17);

    let server_sim = Simulator::new(
        ephemeral().await,
        SimulatorConfig::lossy(0.1, 0.01).with_seed(0x5eed),
    )
    .unwrap();
    let server_addr = server_sim.inner().local_addr;
    let client_sim = Simulator::new(
        ephemeral().await,
        SimulatorConfig::lossy(0.1, 0.01).with_seed(0xfeed),
    )
    .unwrap();

    let server = tokio::spawn(receive_all(server_sim, cfg.clone()));
    send_all(client_sim, server_addr, cfg, &data).await;

    let received = server.await.unwrap();
    assert_eq!(received.len(), data.len());
    assert_eq!(received, data);
}

/// Every ack for the first full window is lost.  After the timeout the
/// receiver answers each resent copy with the same ack; those repeats are
/// absorbed, so the default retry budget is never in danger.
#[tokio::test]
async fn lost_window_of_acks_recovers_with_default_budget() {
    let cfg = Config::default()
        .with_timeout(Duration::from_millis(250))
        .with_window(16, 16);
    let data = pattern(40 * 1024);

    let server_sim = Arc::new(Simulator::reliable(ephemeral().await));
    let server_addr = server_sim.inner().local_addr;
    server_sim.drop_next(FrameType::DataAck, None, 16);

    let server = tokio::spawn(receive_all(Arc::clone(&server_sim), cfg.clone()));

    let mut conn = Connection::connect(ephemeral().await, server_addr, cfg)
        .await
        .expect("connect");
    conn.send(&data).await.expect("client send");
    let stats = conn.stats();
    conn.close().await.expect("client close");

    assert_eq!(server.await.unwrap(), data);
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.go_backs, 1);
    assert_eq!(stats.retransmissions, 8);
}

/// Random loss in both directions with the default retry budget.
#[tokio::test]
async fn lossy_channel_with_default_budget() {
    let cfg = Config {
        linger: Duration::from_secs(2),
        ..Config::default().with_timeout(Duration::from_millis(40))
    };
    let data = pattern(16 * 1024);

    let server_sim = Simulator::new(
        ephemeral().await,
        SimulatorConfig::lossy(0.05, 0.0).with_seed(0xacdc),
    )
    .unwrap();
    let server_addr = server_sim.inner().local_addr;
    let client_sim = Simulator::new(
        ephemeral().await,
        SimulatorConfig::lossy(0.05, 0.0).with_seed(0xbeef),
    )
    .unwrap();

    let server = tokio::spawn(receive_all(server_sim, cfg.clone()));
    send_all(client_sim, server_addr, cfg, &data).await;

    assert_eq!(server.await.unwrap(), data);
}

/// More than 256 frames forces the 8-bit sequence numbers to wrap.
#[tokio::test]
async fn sequence_numbers_wrap_around() {
    let cfg = Config::default()
        .with_timeout(Duration::from_millis(250))
        .with_window(4, 8)
        .with_max_payload(16);
    let data = pattern(300 * 16);

    let server_sock = ephemeral().await;
    let server_addr = server_sock.local_addr;
    let client_sim = Arc::new(Simulator::reliable(ephemeral().await));

    let server = tokio::spawn(receive_all(server_sock, cfg.clone()));
    send_all(Arc::clone(&client_sim), server_addr, cfg, &data).await;

    assert_eq!(server.await.unwrap(), data);
    assert!(client_sim.stats().sent(FrameType::Data) >= 300);
}

// ---------------------------------------------------------------------------
// Session behaviour
// ---------------------------------------------------------------------------

/// Data flows both ways over one connection.
#[tokio::test]
async fn bidirectional_echo() {
    let cfg = Config::default()
        .with_timeout(Duration::from_millis(100))
        .with_window(2, 8);
    let request = pattern(3000);

    let server_sock = ephemeral().await;
    let server_addr = server_sock.local_addr;

    let server = tokio::spawn({
        let cfg = cfg.clone();
        let expected = request.len();
        async move {
            let mut conn = Connection::accept(server_sock, cfg).await.expect("accept");
            let mut got = Vec::new();
            let mut buf = [0u8; 1000];
            while got.len() < expected {
                let n = conn.recv(&mut buf).await.expect("server recv");
                assert_ne!(n, 0, "stream ended early");
                got.extend_from_slice(&buf[..n]);
            }
            let reply: Vec<u8> = got.iter().map(|b| b.wrapping_add(1)).collect();
            conn.send(&reply).await.expect("server send");

            assert_eq!(conn.recv(&mut buf).await.expect("server eof"), 0);
            conn.close().await.expect("server close");
        }
    });

    let mut conn = Connection::connect(ephemeral().await, server_addr, cfg)
        .await
        .expect("connect");
    conn.send(&request).await.expect("client send");

    let mut reply = Vec::new();
    let mut buf = [0u8; 700];
    while reply.len() < request.len() {
        let n = conn.recv(&mut buf).await.expect("client recv");
        assert_ne!(n, 0, "reply ended early");
        reply.extend_from_slice(&buf[..n]);
    }
    conn.close().await.expect("client close");
    server.await.unwrap();

    let expected: Vec<u8> = request.iter().map(|b| b.wrapping_add(1)).collect();
    assert_eq!(reply, expected);
}

/// Independent connections in one process do not interfere.
#[tokio::test]
async fn concurrent_connections_are_independent() {
    let cfg = Config::default()
        .with_timeout(Duration::from_millis(100))
        .with_window(4, 16);

    let mut pairs = Vec::new();
    for i in 0..4usize {
        let data = pattern(2000 + i * 1111);
        let server_sock = ephemeral().await;
        let server_addr = server_sock.local_addr;
        let server = tokio::spawn(receive_all(server_sock, cfg.clone()));
        let client = tokio::spawn({
            let cfg = cfg.clone();
            let data = data.clone();
            async move { send_all(ephemeral().await, server_addr, cfg, &data).await }
        });
        pairs.push((data, server, client));
    }

    for (data, server, client) in pairs {
        client.await.unwrap();
        assert_eq!(server.await.unwrap(), data);
    }
}
