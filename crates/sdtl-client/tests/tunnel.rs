//! Tunnel pump tests over an in-memory device.

use std::net::Ipv4Addr;
use std::time::Duration;

use sdtl_client::{run_tunnel, ClientError, Endpoint, HandshakeConfig, DEFAULT_MTU};
use sdtl_crypto::IdentityKeypair;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::time::timeout;

async fn endpoint_pair() -> (Endpoint, Endpoint) {
    let initiator = IdentityKeypair::generate();
    let responder = IdentityKeypair::generate();
    let initiator_key = initiator.public_identity();
    let responder_key = responder.public_identity();
    let config = HandshakeConfig {
        initial_timeout: Duration::from_millis(200),
        attempts: 3,
    };

    let listen = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let listen_addr = listen.local_addr().unwrap();
    let accepting = tokio::spawn(async move {
        Endpoint::accept(listen, None, &responder, &initiator_key, &config).await
    });

    let client = Endpoint::connect(
        UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        listen_addr,
        &initiator,
        &responder_key,
        Ipv4Addr::new(10, 0, 0, 2),
        &config,
    )
    .await
    .unwrap();
    let server = accepting.await.unwrap().unwrap();
    (client, server)
}

#[tokio::test]
async fn test_tunnel_moves_packets_both_ways() {
    let (client, peer) = endpoint_pair().await;
    let (mut host, device) = tokio::io::duplex(4096);
    let tunnel = tokio::spawn(async move { run_tunnel(&client, device, DEFAULT_MTU).await });

    host.write_all(b"outbound packet").await.unwrap();
    let received = timeout(Duration::from_secs(2), peer.recv()).await.unwrap().unwrap();
    assert_eq!(received, b"outbound packet");

    peer.send(b"inbound packet").await.unwrap();
    let mut buf = [0u8; 64];
    let len = timeout(Duration::from_secs(2), host.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..len], b"inbound packet");

    drop(host);
    let result = timeout(Duration::from_secs(2), tunnel).await.unwrap().unwrap();
    assert!(matches!(result, Err(ClientError::DeviceClosed)));
}
