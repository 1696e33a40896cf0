//! Peer identity.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::Message;

/// Network identity of a peer: the address its history server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerKey {
    pub ip: IpAddr,
    pub port: u16,
}

/// Why a message could not be turned into a [`PeerKey`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedPeer {
    #[error("message has no sender ip")]
    MissingIp,

    #[error("invalid sender ip: {0:?}")]
    InvalidIp(String),

    #[error("message has no sender port")]
    MissingPort,

    #[error("invalid peer address: {0:?}")]
    InvalidAddress(String),
}

impl PeerKey {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Derive the sender identity of a message.
    ///
    /// The ip must parse as an IPv4/IPv6 literal and the port must be non-zero.
    pub fn from_message(message: &Message) -> Result<Self, MalformedPeer> {
        let ip = message.sender_ip.trim();
        if ip.is_empty() {
            return Err(MalformedPeer::MissingIp);
        }
        let ip: IpAddr = ip
            .parse()
            .map_err(|_| MalformedPeer::InvalidIp(message.sender_ip.clone()))?;
        if message.sender_port == 0 {
            return Err(MalformedPeer::MissingPort);
        }
        Ok(Self::new(ip, message.sender_port))
    }
}

impl From<SocketAddr> for PeerKey {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl FromStr for PeerKey {
    type Err = MalformedPeer;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: SocketAddr = s
            .trim()
            .parse()
            .map_err(|_| MalformedPeer::InvalidAddress(s.to_string()))?;
        if addr.port() == 0 {
            return Err(MalformedPeer::MissingPort);
        }
        Ok(addr.into())
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(ip: &str, port: u16) -> Message {
        Message {
            sender_ip: ip.to_string(),
            sender_port: port,
            author: "a".to_string(),
            content: "c".to_string(),
            timestamp: 0,
            extra: Default::default(),
        }
    }

    #[test]
    fn test_from_message() {
        let key = PeerKey::from_message(&message("10.0.0.2", 9001)).unwrap();
        assert_eq!(key.to_string(), "10.0.0.2:9001");
    }

    #[test]
    fn test_from_message_rejects_malformed() {
        assert_eq!(
            PeerKey::from_message(&message("", 9001)),
            Err(MalformedPeer::MissingIp)
        );
        assert_eq!(
            PeerKey::from_message(&message("not-an-ip", 9001)),
            Err(MalformedPeer::InvalidIp("not-an-ip".to_string()))
        );
        assert_eq!(
            PeerKey::from_message(&message("10.0.0.2", 0)),
            Err(MalformedPeer::MissingPort)
        );
    }

    #[test]
    fn test_parse_and_display_ipv6() {
        let key: PeerKey = "[::1]:7000".parse().unwrap();
        assert_eq!(key.ip, "::1".parse::<IpAddr>().unwrap());
        assert_eq!(key.to_string(), "[::1]:7000");
    }

    #[test]
    fn test_parse_rejects_port_zero() {
        assert_eq!(
            "127.0.0.1:0".parse::<PeerKey>(),
            Err(MalformedPeer::MissingPort)
        );
        assert!("localhost".parse::<PeerKey>().is_err());
    }
}
