//! UDP relay server.
//!
//! Three tasks share the socket:
//!
//! ```text
//!   reader --Inbound--> dispatcher --Outbound--> writer
//! ```
//!
//! Both queues are bounded. A fatal read error travels down the inbound queue
//! as [`Inbound::Fatal`]; the dispatcher then sends [`Outbound::Shutdown`] so
//! the writer drains and exits, and `run` returns after joining both tasks.

use std::future::{pending, Future};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sdtl_common::config::DEFAULT_QUEUE_DEPTH;
use sdtl_common::ServerConfig;
use sdtl_core::MAX_DATAGRAM_SIZE;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Datagram, Dispatcher};

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Item on the reader -> dispatcher queue.
#[derive(Debug)]
pub enum Inbound {
    Datagram { payload: Bytes, src: SocketAddr },
    Fatal(io::Error),
}

/// Item on the dispatcher -> writer queue.
#[derive(Debug)]
pub enum Outbound {
    Datagram(Datagram),
    Shutdown,
}

/// Tunables for [`RelayServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    pub queue_depth: usize,
    /// Close sessions idle at least this long. `None` keeps them forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            idle_timeout: None,
        }
    }
}

impl From<&ServerConfig> for ServerOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            queue_depth: config.queue_depth.max(1),
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Relay bound to a UDP socket.
pub struct RelayServer {
    socket: Arc<UdpSocket>,
    dispatcher: Dispatcher,
    options: ServerOptions,
}

impl RelayServer {
    pub async fn bind(
        addr: SocketAddr,
        dispatcher: Dispatcher,
        options: ServerOptions,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Relay listening on {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
            dispatcher,
            options,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve until the socket fails.
    pub async fn run(self) -> io::Result<()> {
        self.run_until(pending()).await
    }

    /// Serve until the socket fails or `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            socket,
            mut dispatcher,
            options,
        } = self;

        let (inbound_tx, mut inbound_rx) = mpsc::channel(options.queue_depth);
        let (outbound_tx, outbound_rx) = mpsc::channel(options.queue_depth);
        let reader = tokio::spawn(read_loop(socket.clone(), inbound_tx));
        let writer = tokio::spawn(write_loop(socket, outbound_rx));

        let sweep_period = options
            .idle_timeout
            .map_or(MAX_SWEEP_INTERVAL, |timeout| {
                (timeout / 2).clamp(Duration::from_millis(100), MAX_SWEEP_INTERVAL)
            });
        let mut sweep = tokio::time::interval(sweep_period);
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                item = inbound_rx.recv() => match item {
                    Some(Inbound::Datagram { payload, src }) => {
                        if let Some(reply) = dispatcher.dispatch(&payload, src) {
                            if outbound_tx.send(Outbound::Datagram(reply)).await.is_err() {
                                break Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer stopped"));
                            }
                        }
                    }
                    Some(Inbound::Fatal(err)) => {
                        error!("Socket read failed: {}", err);
                        break Err(err);
                    }
                    None => break Ok(()),
                },
                _ = sweep.tick(), if options.idle_timeout.is_some() => {
                    if let Some(timeout) = options.idle_timeout {
                        let closed = dispatcher.sweep_idle(timeout);
                        if closed > 0 {
                            info!("Closed {} idle sessions", closed);
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Relay shutting down");
                    break Ok(());
                }
            }
        };

        let _ = outbound_tx.send(Outbound::Shutdown).await;
        drop(inbound_rx);
        reader.abort();
        let _ = reader.await;
        let _ = writer.await;
        result
    }
}

async fn read_loop(socket: Arc<UdpSocket>, tx: mpsc::Sender<Inbound>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                let item = Inbound::Datagram {
                    payload: Bytes::copy_from_slice(&buf[..len]),
                    src,
                };
                if tx.send(item).await.is_err() {
                    return;
                }
            }
            // ICMP unreachable from an earlier send, not a socket failure
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                ) =>
            {
                debug!("Ignoring transient read error: {}", e);
            }
            Err(e) => {
                let _ = tx.send(Inbound::Fatal(e)).await;
                return;
            }
        }
    }
}

async fn write_loop(socket: Arc<UdpSocket>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Datagram(datagram) => {
                if let Err(e) = socket.send_to(&datagram.payload, datagram.dest).await {
                    warn!(peer = %datagram.dest, error = %e, "send failed");
                }
            }
            Outbound::Shutdown => break,
        }
    }
}
