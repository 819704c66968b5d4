//! Relay configuration file.
//!
//! ```json
//! {
//!   "server": { "listen": "0.0.0.0", "port": 7000, "private_key": "relay_private.pem" },
//!   "hosts": [ { "ip": "10.0.0.2", "public_key": "a_public.pem" } ]
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default depth of the relay's inbound and outbound queues.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

/// Relay listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address, without port.
    pub listen: String,
    pub port: u16,
    /// PKCS#8 PEM signing key of the relay.
    pub private_key: PathBuf,
    /// Close sessions idle for longer than this. Unset keeps them forever.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

/// One statically configured peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Virtual IP the peer owns inside the tunnel.
    pub ip: Ipv4Addr,
    /// SPKI PEM verifying key of the peer.
    pub public_key: PathBuf,
}

/// Top-level relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

impl RelayConfig {
    /// Read and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let config = Self::from_json(&raw)?;
        tracing::debug!(
            "Loaded {} with {} hosts",
            path.display(),
            config.hosts.len()
        );
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::config("server.port must be non-zero"));
        }
        if self.server.queue_depth == 0 {
            return Err(Error::config("server.queue_depth must be at least 1"));
        }
        self.server
            .listen
            .parse::<IpAddr>()
            .map_err(|_| Error::config(format!("invalid listen address {:?}", self.server.listen)))?;

        let mut seen = HashSet::new();
        for host in &self.hosts {
            if !seen.insert(host.ip) {
                return Err(Error::config(format!("duplicate host {}", host.ip)));
            }
        }
        Ok(())
    }

    /// Socket address the relay binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .listen
            .parse()
            .map_err(|_| Error::config(format!("invalid listen address {:?}", self.server.listen)))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "server": { "listen": "0.0.0.0", "port": 7000, "private_key": "relay_private.pem" },
        "hosts": [
            { "ip": "10.0.0.2", "public_key": "a_public.pem" },
            { "ip": "10.0.0.3", "public_key": "b_public.pem" }
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = RelayConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.listen_addr().unwrap(), "0.0.0.0:7000".parse().unwrap());
        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.hosts[1].ip, Ipv4Addr::new(10, 0, 0, 3));
        assert_eq!(config.server.queue_depth, DEFAULT_QUEUE_DEPTH);
        assert_eq!(config.server.idle_timeout(), None);
    }

    #[test]
    fn test_optional_fields() {
        let raw = r#"{
            "server": { "listen": "127.0.0.1", "port": 7000, "private_key": "k.pem",
                        "idle_timeout_secs": 120, "queue_depth": 8 }
        }"#;
        let config = RelayConfig::from_json(raw).unwrap();
        assert_eq!(config.server.idle_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.server.queue_depth, 8);
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn test_rejects_duplicate_hosts() {
        let raw = r#"{
            "server": { "listen": "0.0.0.0", "port": 7000, "private_key": "k.pem" },
            "hosts": [
                { "ip": "10.0.0.2", "public_key": "a.pem" },
                { "ip": "10.0.0.2", "public_key": "b.pem" }
            ]
        }"#;
        assert!(matches!(RelayConfig::from_json(raw), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_bad_values() {
        let zero_port = r#"{ "server": { "listen": "0.0.0.0", "port": 0, "private_key": "k.pem" } }"#;
        assert!(matches!(RelayConfig::from_json(zero_port), Err(Error::Config(_))));

        let bad_listen = r#"{ "server": { "listen": "nowhere", "port": 7000, "private_key": "k.pem" } }"#;
        assert!(matches!(RelayConfig::from_json(bad_listen), Err(Error::Config(_))));

        let bad_host = r#"{
            "server": { "listen": "0.0.0.0", "port": 7000, "private_key": "k.pem" },
            "hosts": [ { "ip": "fe80::1", "public_key": "a.pem" } ]
        }"#;
        assert!(matches!(RelayConfig::from_json(bad_host), Err(Error::Serialization(_))));

        assert!(matches!(RelayConfig::from_json("{"), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, SAMPLE).unwrap();

        let config = RelayConfig::load(&path).unwrap();
        assert_eq!(config.server.private_key, PathBuf::from("relay_private.pem"));

        let missing = RelayConfig::load(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(Error::Io(_))));
    }
}
