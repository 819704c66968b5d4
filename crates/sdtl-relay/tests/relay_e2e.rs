//! Relay end-to-end tests over loopback UDP.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use sdtl_client::{ClientError, Endpoint, HandshakeConfig};
use sdtl_crypto::{IdentityKeypair, PeerIdentity};
use sdtl_relay::{Dispatcher, Registry, RelayServer, ServerOptions};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);

struct TestRelay {
    addr: SocketAddr,
    key: PeerIdentity,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

async fn start_relay(hosts: &[(Ipv4Addr, &IdentityKeypair)]) -> TestRelay {
    let identity = IdentityKeypair::generate();
    let key = identity.public_identity();
    let mut registry = Registry::new();
    for (ip, host) in hosts {
        registry.register_static(*ip, host.public_identity()).unwrap();
    }

    let server = RelayServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        Dispatcher::new(registry, identity),
        ServerOptions::default(),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel();
    let handle = tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));
    TestRelay {
        addr,
        key,
        stop,
        handle,
    }
}

fn handshake_config() -> HandshakeConfig {
    HandshakeConfig {
        initial_timeout: Duration::from_millis(200),
        attempts: 3,
    }
}

async fn connect(relay: &TestRelay, identity: &IdentityKeypair, ip: Ipv4Addr) -> Endpoint {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    Endpoint::connect(socket, relay.addr, identity, &relay.key, ip, &handshake_config())
        .await
        .unwrap()
}

fn ipv4_packet(src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
    let total = 20 + payload.len();
    let mut packet = vec![0u8; total];
    packet[0] = 0x45;
    packet[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    packet[8] = 64;
    packet[9] = 17;
    packet[12..16].copy_from_slice(&src.octets());
    packet[16..20].copy_from_slice(&dst.octets());
    packet[20..].copy_from_slice(payload);
    packet
}

async fn stop(relay: TestRelay) {
    relay.stop.send(()).unwrap();
    let result = timeout(Duration::from_secs(5), relay.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_relay_routes_between_peers() {
    let a = IdentityKeypair::generate();
    let b = IdentityKeypair::generate();
    let relay = start_relay(&[(A, &a), (B, &b)]).await;

    let client_a = connect(&relay, &a, A).await;
    let client_b = connect(&relay, &b, B).await;
    // let the relay process both ClientResponses before any data flows
    tokio::time::sleep(Duration::from_millis(100)).await;

    let to_b = ipv4_packet(A, B, b"hello from a");
    client_a.send(&to_b).await.unwrap();
    let received = timeout(Duration::from_secs(2), client_b.recv()).await.unwrap().unwrap();
    assert_eq!(received, to_b);

    let to_a = ipv4_packet(B, A, b"hello from b");
    client_b.send(&to_a).await.unwrap();
    let received = timeout(Duration::from_secs(2), client_a.recv()).await.unwrap().unwrap();
    assert_eq!(received, to_a);

    stop(relay).await;
}

#[tokio::test]
async fn test_relay_ignores_unknown_host() {
    let a = IdentityKeypair::generate();
    let relay = start_relay(&[(A, &a)]).await;

    let stranger = IdentityKeypair::generate();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let result = Endpoint::connect(
        socket,
        relay.addr,
        &stranger,
        &relay.key,
        A,
        &HandshakeConfig {
            initial_timeout: Duration::from_millis(100),
            attempts: 2,
        },
    )
    .await;
    assert!(matches!(result, Err(ClientError::HandshakeTimeout { attempts: 2 })));

    // the configured host still gets through
    let client_a = connect(&relay, &a, A).await;
    assert_eq!(client_a.peer_addr(), relay.addr);

    stop(relay).await;
}

#[tokio::test]
async fn test_reconnect_replaces_session() {
    let a = IdentityKeypair::generate();
    let b = IdentityKeypair::generate();
    let relay = start_relay(&[(A, &a), (B, &b)]).await;

    let first = connect(&relay, &a, A).await;
    let client_b = connect(&relay, &b, B).await;
    let second = connect(&relay, &a, A).await;
    assert_ne!(first.session_id(), second.session_id());
    tokio::time::sleep(Duration::from_millis(100)).await;

    // frames on the superseded session are dropped
    first.send(&ipv4_packet(A, B, b"stale")).await.unwrap();
    let fresh = ipv4_packet(A, B, b"fresh");
    second.send(&fresh).await.unwrap();

    let received = timeout(Duration::from_secs(2), client_b.recv()).await.unwrap().unwrap();
    assert_eq!(received, fresh);

    stop(relay).await;
}
