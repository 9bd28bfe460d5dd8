//! Subscription requests
//!
//! A subscriber registers with a publisher by sending its listening address
//! as a 6-byte datagram: IPv4 address (4 bytes) followed by the port (u16,
//! big-endian).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use thiserror::Error;

pub const SUBSCRIPTION_FRAME_SIZE: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("subscription request must be {expected} bytes, got {0}", expected = SUBSCRIPTION_FRAME_SIZE)]
    MalformedRequest(usize),

    #[error("only IPv4 subscribers are supported, got {0}")]
    UnsupportedAddress(SocketAddr),
}

pub fn encode_subscription(addr: SocketAddr) -> Result<[u8; SUBSCRIPTION_FRAME_SIZE], SubscriptionError> {
    let SocketAddr::V4(v4) = addr else {
        return Err(SubscriptionError::UnsupportedAddress(addr));
    };

    let mut buf = [0u8; SUBSCRIPTION_FRAME_SIZE];
    buf[..4].copy_from_slice(&v4.ip().octets());
    buf[4..].copy_from_slice(&v4.port().to_be_bytes());
    Ok(buf)
}

pub fn decode_subscription(buf: &[u8]) -> Result<SocketAddr, SubscriptionError> {
    let frame: &[u8; SUBSCRIPTION_FRAME_SIZE] = buf
        .try_into()
        .map_err(|_| SubscriptionError::MalformedRequest(buf.len()))?;

    let ip = Ipv4Addr::new(frame[0], frame[1], frame[2], frame[3]);
    let port = u16::from_be_bytes([frame[4], frame[5]]);
    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

/// A subscriber bound to `0.0.0.0` can't be reached at that address, so
/// advertise the address the request came from instead.
pub fn effective_subscriber(advertised: SocketAddr, sender: SocketAddr) -> SocketAddr {
    if advertised.ip().is_unspecified() {
        SocketAddr::new(sender.ip(), advertised.port())
    } else {
        advertised
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_roundtrip() {
        let addr: SocketAddr = "192.168.1.20:50403".parse().unwrap();
        let bytes = encode_subscription(addr).unwrap();
        assert_eq!(bytes, [192, 168, 1, 20, 0xC4, 0xE3]);
        assert_eq!(decode_subscription(&bytes).unwrap(), addr);
    }

    #[test]
    fn test_rejects_ipv6_and_bad_lengths() {
        let v6: SocketAddr = "[::1]:9000".parse().unwrap();
        assert_eq!(
            encode_subscription(v6),
            Err(SubscriptionError::UnsupportedAddress(v6))
        );
        assert_eq!(
            decode_subscription(&[1, 2, 3]),
            Err(SubscriptionError::MalformedRequest(3))
        );
        assert!(decode_subscription(&[0u8; 22]).is_err());
    }

    #[test]
    fn test_unspecified_address_uses_sender_ip() {
        let advertised: SocketAddr = "0.0.0.0:7000".parse().unwrap();
        let sender: SocketAddr = "10.0.0.5:41234".parse().unwrap();
        assert_eq!(
            effective_subscriber(advertised, sender),
            "10.0.0.5:7000".parse::<SocketAddr>().unwrap()
        );
    }
}
