use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};

/// Privacy-preserving peer identifier: 32 lowercase hex chars derived from
/// the peer's static public key. See [`crate::identity::peer_id_from_public_key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a peer can be reached. Variant order is priority order: BLE wins
/// ties because it works without any infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionType {
    Ble,
    Lan,
    Internet,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Ble => write!(f, "BLE"),
            ConnectionType::Lan => write!(f, "LAN"),
            ConnectionType::Internet => write!(f, "Internet"),
        }
    }
}

/// Ephemeral sighting of a peer produced by a discovery source. Folded into
/// the registry and discarded; never stored.
///
/// `public_key` is optional because the DHT can report reachability before
/// the identity record is fetched; the registry refuses to create a record
/// from a key-less observation.
#[derive(Debug, Clone)]
pub struct Observation {
    pub public_key: Option<[u8; 32]>,
    pub port: String,
    pub address_ip: Option<Ipv4Addr>,
    pub ble_addr: Option<String>,
    pub transport: ConnectionType,
}

/// A single chat line. The author is a peer ID, never a display name;
/// names exist only in the UI layer.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub time: DateTime<Utc>,
    pub author: PeerId,
    pub text: String,
}

impl ChatMessage {
    pub fn now(author: PeerId, text: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            author,
            text: text.into(),
        }
    }
}
