//! Minimal IPv4 header inspection for routing.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};

const IPV4_MIN_HEADER: usize = 20;

/// Destination address of a raw IPv4 packet.
///
/// Only the fixed header is inspected: version, header length, total length
/// and the destination field. Options and payload are not looked at.
pub fn ipv4_destination(packet: &[u8]) -> Result<Ipv4Addr> {
    if packet.len() < IPV4_MIN_HEADER {
        return Err(Error::Format(format!(
            "IPv4 header truncated: {} bytes",
            packet.len()
        )));
    }

    let version = packet[0] >> 4;
    if version != 4 {
        return Err(Error::Format(format!("not an IPv4 packet (version {version})")));
    }

    let header_len = usize::from(packet[0] & 0x0f) * 4;
    if header_len < IPV4_MIN_HEADER || header_len > packet.len() {
        return Err(Error::Format(format!("invalid IPv4 header length {header_len}")));
    }

    let total_len = usize::from(u16::from_be_bytes([packet[2], packet[3]]));
    if total_len < header_len {
        return Err(Error::Format(format!("invalid IPv4 total length {total_len}")));
    }

    Ok(Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(dst: [u8; 4]) -> Vec<u8> {
        let mut ipv4 = vec![0u8; 28];
        ipv4[0] = 0x45; // Version 4, IHL 5
        ipv4[2..4].copy_from_slice(&28u16.to_be_bytes());
        ipv4[12..16].copy_from_slice(&[10, 0, 0, 2]);
        ipv4[16..20].copy_from_slice(&dst);
        ipv4
    }

    #[test]
    fn test_extracts_destination() {
        let dst = ipv4_destination(&packet([10, 0, 0, 3])).unwrap();
        assert_eq!(dst, Ipv4Addr::new(10, 0, 0, 3));
    }

    #[test]
    fn test_rejects_ipv6() {
        let mut ipv6 = vec![0u8; 40];
        ipv6[0] = 0x60;
        assert!(ipv4_destination(&ipv6).is_err());
    }

    #[test]
    fn test_rejects_truncated_and_bad_lengths() {
        assert!(ipv4_destination(&[]).is_err());
        assert!(ipv4_destination(&packet([1, 2, 3, 4])[..19]).is_err());

        let mut bad_ihl = packet([1, 2, 3, 4]);
        bad_ihl[0] = 0x44;
        assert!(ipv4_destination(&bad_ihl).is_err());

        let mut long_ihl = packet([1, 2, 3, 4]);
        long_ihl[0] = 0x4f; // 60-byte header in a 28-byte packet
        assert!(ipv4_destination(&long_ihl).is_err());

        let mut bad_total = packet([1, 2, 3, 4]);
        bad_total[2..4].copy_from_slice(&10u16.to_be_bytes());
        assert!(ipv4_destination(&bad_total).is_err());
    }
}
