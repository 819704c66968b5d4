//! SDTL relay daemon.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sdtl_common::RelayConfig;
use sdtl_crypto::{IdentityKeypair, PeerIdentity};
use sdtl_relay::{Dispatcher, Registry, RelayServer, ServerOptions};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sdtl-relay")]
#[command(about = "SDTL relay - routes encrypted tunnel traffic between configured peers")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, short, default_value = "config.json")]
    config: PathBuf,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_registry(config: &RelayConfig) -> Result<Registry> {
    let mut registry = Registry::new();
    for host in &config.hosts {
        let key = PeerIdentity::load(&host.public_key).with_context(|| {
            format!("loading public key {} for {}", host.public_key.display(), host.ip)
        })?;
        registry.register_static(host.ip, key)?;
    }
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    sdtl_common::init_tracing_with_default(&args.log_level);

    info!("Starting sdtl-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = RelayConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let identity = IdentityKeypair::load(&config.server.private_key).with_context(|| {
        format!("loading private key {}", config.server.private_key.display())
    })?;
    let registry = load_registry(&config)?;
    info!("Loaded {} hosts", registry.len());
    if registry.is_empty() {
        warn!("No hosts configured, every handshake will be dropped");
    }

    let server = RelayServer::bind(
        config.listen_addr()?,
        Dispatcher::new(registry, identity),
        ServerOptions::from(&config.server),
    )
    .await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Relay stopped");
    Ok(())
}
