//! Full-duplex pump between an [`Endpoint`] and a local packet device.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::ClientError;

/// Largest IP packet that still fits a 1500-byte path once the UDP/IPv4
/// headers, the SDTL header and the frame overhead are added.
pub const DEFAULT_MTU: u16 = 1442;

/// Copy packets in both directions until either side fails.
///
/// `device` must deliver one IP packet per read, as a TUN device does. The
/// first error ends the tunnel; the other direction is dropped with it.
pub async fn run_tunnel<D>(endpoint: &Endpoint, device: D, mtu: u16) -> Result<(), ClientError>
where
    D: AsyncRead + AsyncWrite,
{
    let (reader, writer) = tokio::io::split(device);
    tokio::select! {
        result = device_to_peer(endpoint, reader, mtu) => result,
        result = peer_to_device(endpoint, writer) => result,
    }
}

async fn device_to_peer<R>(endpoint: &Endpoint, mut reader: R, mtu: u16) -> Result<(), ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; usize::from(mtu)];
    loop {
        let len = reader.read(&mut buf).await?;
        if len == 0 {
            return Err(ClientError::DeviceClosed);
        }
        debug!("device -> peer: {} bytes", len);
        endpoint.send(&buf[..len]).await?;
    }
}

async fn peer_to_device<W>(endpoint: &Endpoint, mut writer: W) -> Result<(), ClientError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let packet = endpoint.recv().await?;
        debug!("peer -> device: {} bytes", packet.len());
        writer.write_all(&packet).await?;
        writer.flush().await?;
    }
}
