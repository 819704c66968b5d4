//! SDTL CLI tools: key generation and handshake diagnostics.

#![forbid(unsafe_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sdtl_client::{ClientError, Endpoint, HandshakeConfig};
use sdtl_crypto::{IdentityKeypair, PeerIdentity};

#[derive(Parser, Debug)]
#[command(name = "sdtl")]
#[command(about = "SDTL CLI tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new P-256 identity keypair
    Keygen {
        /// Output path prefix; writes <out>_private.pem and <out>_public.pem
        #[arg(short, long, default_value = "sdtl")]
        out: String,
    },

    /// Print the SEC1 encoding of a public key file
    ShowKey {
        /// Public key file path
        #[arg(short, long)]
        key: PathBuf,
    },

    /// Run a handshake against a relay and report the round trip
    Probe {
        /// Relay address (host:port)
        #[arg(short, long)]
        server: SocketAddr,

        /// Virtual IP to claim
        #[arg(long)]
        ip: Ipv4Addr,

        #[arg(long, default_value = "private.pem")]
        private_key: PathBuf,

        #[arg(long, default_value = "sdtl_public.pem")]
        server_public_key: PathBuf,

        /// First handshake timeout; doubled on every retry
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },

    /// Show version information
    Version,
}

fn key_paths(out: &str) -> (String, String) {
    (format!("{out}_private.pem"), format!("{out}_public.pem"))
}

fn main() -> Result<()> {
    sdtl_common::init_tracing_with_default("warn");

    let args = Args::parse();

    match args.command {
        Command::Keygen { out } => {
            println!("Generating P-256 keypair...");

            let keypair = IdentityKeypair::generate();
            let (private_path, public_path) = key_paths(&out);
            keypair.save(&private_path, &public_path)?;

            println!("Private key: {}", private_path);
            println!("Public key:  {}", public_path);
        }
        Command::ShowKey { key } => {
            let identity = PeerIdentity::load(&key)
                .with_context(|| format!("loading {}", key.display()))?;
            println!("{}", hex::encode(identity.to_sec1_bytes()));
        }
        Command::Probe {
            server,
            ip,
            private_key,
            server_public_key,
            timeout_ms,
        } => {
            let identity = IdentityKeypair::load(&private_key)
                .with_context(|| format!("loading {}", private_key.display()))?;
            let server_key = PeerIdentity::load(&server_public_key)
                .with_context(|| format!("loading {}", server_public_key.display()))?;
            let config = HandshakeConfig {
                initial_timeout: Duration::from_millis(timeout_ms),
                ..HandshakeConfig::default()
            };

            println!("Probing {} as {}...", server, ip);

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;

            rt.block_on(async {
                let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
                let started = tokio::time::Instant::now();
                match Endpoint::connect(socket, server, &identity, &server_key, ip, &config).await
                {
                    Ok(endpoint) => println!(
                        "Handshake with {} complete: session={} time={:?}",
                        endpoint.peer_addr(),
                        endpoint.session_id(),
                        started.elapsed()
                    ),
                    Err(ClientError::HandshakeTimeout { attempts }) => {
                        println!("No valid response from {} after {} attempts", server, attempts)
                    }
                    Err(e) => return Err(e.into()),
                }
                Ok::<(), anyhow::Error>(())
            })?;
        }
        Command::Version => {
            println!("sdtl {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_paths() {
        let (private, public) = key_paths("relay");
        assert_eq!(private, "relay_private.pem");
        assert_eq!(public, "relay_public.pem");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["sdtl", "keygen", "--out", "a"]).unwrap();
        assert!(matches!(args.command, Command::Keygen { out } if out == "a"));

        let args = Args::try_parse_from([
            "sdtl",
            "probe",
            "--server",
            "127.0.0.1:7000",
            "--ip",
            "10.0.0.2",
        ])
        .unwrap();
        match args.command {
            Command::Probe { ip, timeout_ms, .. } => {
                assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 2));
                assert_eq!(timeout_ms, 1000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
