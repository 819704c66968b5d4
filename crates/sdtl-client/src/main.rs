//! SDTL client: brings up a TUN interface and tunnels it through a relay.

#![forbid(unsafe_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sdtl_client::{run_tunnel, Endpoint, HandshakeConfig, DEFAULT_MTU};
use sdtl_crypto::{IdentityKeypair, PeerIdentity};
use tokio::net::UdpSocket;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sdtl-client")]
#[command(about = "SDTL client - encrypted UDP tunnel endpoint")]
struct Args {
    /// Relay address to connect to
    #[arg(long, required_unless_present = "listen", conflicts_with = "listen")]
    server: Option<SocketAddr>,

    /// Wait for a single peer on this address instead of connecting
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Only accept a peer connecting from this address (with --listen)
    #[arg(long, requires = "listen")]
    peer: Option<SocketAddr>,

    /// Virtual IP of this host inside the tunnel
    #[arg(long)]
    ip: Ipv4Addr,

    #[arg(long, default_value = "255.255.255.0")]
    netmask: Ipv4Addr,

    #[arg(long, default_value_t = DEFAULT_MTU)]
    mtu: u16,

    /// PKCS#8 PEM signing key
    #[arg(long, default_value = "private.pem")]
    private_key: PathBuf,

    /// Public key of the relay, or of the connecting peer with --listen
    #[arg(long, default_value = "sdtl_public.pem")]
    server_public_key: PathBuf,

    /// Local UDP address to bind when connecting
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// First handshake timeout; doubled on every retry
    #[arg(long, default_value_t = 1000)]
    handshake_timeout_ms: u64,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn open_device(args: &Args) -> Result<tun::AsyncDevice> {
    let mut config = tun::Configuration::default();
    config
        .address(args.ip)
        .netmask(args.netmask)
        .mtu(i32::from(args.mtu))
        .up();

    #[cfg(target_os = "linux")]
    config.platform(|config| {
        config.packet_information(false);
    });

    tun::create_as_async(&config).context("creating TUN device")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    sdtl_common::init_tracing_with_default(&args.log_level);

    info!("Starting sdtl-client v{}", env!("CARGO_PKG_VERSION"));

    let identity = IdentityKeypair::load(&args.private_key)
        .with_context(|| format!("loading private key {}", args.private_key.display()))?;
    let peer_key = PeerIdentity::load(&args.server_public_key).with_context(|| {
        format!("loading public key {}", args.server_public_key.display())
    })?;
    let handshake = HandshakeConfig {
        initial_timeout: Duration::from_millis(args.handshake_timeout_ms),
        ..HandshakeConfig::default()
    };

    let device = open_device(&args)?;
    info!("TUN device up: {}/{} mtu {}", args.ip, args.netmask, args.mtu);

    let endpoint = match (args.server, args.listen) {
        (_, Some(listen)) => {
            let socket = UdpSocket::bind(listen).await?;
            info!("Waiting for peer on {}", socket.local_addr()?);
            Endpoint::accept(socket, args.peer, &identity, &peer_key, &handshake).await?
        }
        (Some(server), None) => {
            let bind = args
                .bind
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
            let socket = UdpSocket::bind(bind).await?;
            Endpoint::connect(socket, server, &identity, &peer_key, args.ip, &handshake).await?
        }
        (None, None) => anyhow::bail!("either --server or --listen is required"),
    };
    info!(
        "Tunnel established with {} (session {})",
        endpoint.peer_addr(),
        endpoint.session_id()
    );

    run_tunnel(&endpoint, device, args.mtu).await?;
    Ok(())
}
