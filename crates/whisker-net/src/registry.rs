//! Shared peer registry.
//!
//! One record per known remote identity, keyed by peer ID. The map itself
//! sits behind a reader-writer lock; merges run under the write lock so
//! concurrent observations of the same peer are serialized. Each record
//! additionally carries its own async mutex owning the optional
//! [`ActiveLink`], which serializes dialing, handshaking and outbound
//! sends for that peer. No lock is ever held across network I/O except
//! that per-peer link mutex.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use whisker_shared::identity::peer_id_from_public_key;
use whisker_shared::types::{ChatMessage, ConnectionType, Observation, PeerId};

use crate::link::ActiveLink;

/// Network-facing fields of a peer record. Merged, never overwritten:
/// an observed value is adopted only when the existing one is empty.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub public_key: [u8; 32],
    pub address_ip: Option<Ipv4Addr>,
    pub port: String,
    pub ble_addr: Option<String>,
    /// Insertion-order preserved.
    pub connection_types: Vec<ConnectionType>,
    /// Priority-minimal member of `connection_types` (BLE < LAN < Internet).
    pub primary: Option<ConnectionType>,
}

impl PeerInfo {
    fn add_connection_type(&mut self, transport: ConnectionType) {
        if !self.connection_types.contains(&transport) {
            self.connection_types.push(transport);
        }
        self.primary = self.connection_types.iter().min().copied();
    }
}

/// One known remote identity.
pub struct PeerRecord {
    peer_id: PeerId,
    info: RwLock<PeerInfo>,
    messages: Mutex<Vec<ChatMessage>>,
    /// Socket + session with one lifetime; present iff a handshake has
    /// completed or is in progress. At most one per peer, serialized here.
    pub(crate) link: tokio::sync::Mutex<Option<ActiveLink>>,
}

impl PeerRecord {
    fn new(peer_id: PeerId, info: PeerInfo) -> Self {
        Self {
            peer_id,
            info: RwLock::new(info),
            messages: Mutex::new(Vec::new()),
            link: tokio::sync::Mutex::new(None),
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn info(&self) -> PeerInfo {
        self.info.read().clone()
    }

    pub fn push_message(&self, message: ChatMessage) {
        self.messages.lock().push(message);
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().clone()
    }

    pub async fn has_link(&self) -> bool {
        self.link.lock().await.is_some()
    }

    fn merge(&self, observation: &Observation) {
        let mut info = self.info.write();
        if info.address_ip.is_none() {
            info.address_ip = observation.address_ip;
        }
        if info.port.is_empty() && !observation.port.is_empty() {
            info.port = observation.port.clone();
        }
        if info.ble_addr.is_none() {
            info.ble_addr = observation.ble_addr.clone();
        }
        info.add_connection_type(observation.transport);
    }
}

/// Thread-safe map of peer ID to peer record.
pub struct PeerRegistry {
    local_id: PeerId,
    peers: RwLock<BTreeMap<PeerId, Arc<PeerRecord>>>,
}

impl PeerRegistry {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            peers: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Fold a discovery observation into the registry: insert a new record
    /// or merge into the existing one. Observations of our own identity
    /// and observations without a public key are dropped — a record with
    /// an empty key never enters the map.
    pub fn add(&self, observation: Observation) {
        let Some(public_key) = observation.public_key else {
            trace!(transport = %observation.transport, "dropping observation without identity");
            return;
        };
        let peer_id = peer_id_from_public_key(&public_key);
        if peer_id == self.local_id {
            return;
        }

        let mut peers = self.peers.write();
        if let Some(existing) = peers.get(&peer_id) {
            existing.merge(&observation);
            return;
        }

        let mut info = PeerInfo {
            public_key,
            address_ip: observation.address_ip,
            port: observation.port.clone(),
            ble_addr: observation.ble_addr.clone(),
            connection_types: Vec::new(),
            primary: None,
        };
        info.add_connection_type(observation.transport);

        debug!(peer = %peer_id.short(), transport = %observation.transport, "new peer discovered");
        peers.insert(peer_id.clone(), Arc::new(PeerRecord::new(peer_id, info)));
    }

    /// Attach an inbound session's identity: look the peer up by the
    /// static key recovered from the handshake, creating a minimal record
    /// seeded with the remote address when the peer is not yet known.
    /// Association is never done by source IP.
    pub fn associate_inbound(
        &self,
        public_key: [u8; 32],
        remote_ip: Option<Ipv4Addr>,
    ) -> Option<Arc<PeerRecord>> {
        let peer_id = peer_id_from_public_key(&public_key);
        if peer_id == self.local_id {
            warn!("inbound session presented our own static key");
            return None;
        }

        let mut peers = self.peers.write();
        if let Some(existing) = peers.get(&peer_id) {
            let mut info = existing.info.write();
            if info.address_ip.is_none() {
                info.address_ip = remote_ip;
            }
            return Some(existing.clone());
        }

        debug!(peer = %peer_id.short(), "inbound session from unknown peer, creating record");
        let record = Arc::new(PeerRecord::new(
            peer_id.clone(),
            PeerInfo {
                public_key,
                address_ip: remote_ip,
                port: String::new(),
                ble_addr: None,
                connection_types: Vec::new(),
                primary: None,
            },
        ));
        peers.insert(peer_id, record.clone());
        Some(record)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<Arc<PeerRecord>> {
        self.peers.read().get(peer_id).cloned()
    }

    pub fn delete(&self, peer_id: &PeerId) {
        if self.peers.write().remove(peer_id).is_some() {
            debug!(peer = %peer_id.short(), "peer evicted");
        }
    }

    /// All records, ascending by peer ID, so UI rendering is stable
    /// across ticks.
    pub fn list(&self) -> Vec<Arc<PeerRecord>> {
        self.peers.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whisker_shared::types::ConnectionType::{Ble, Internet, Lan};

    fn observation(key: [u8; 32], transport: ConnectionType) -> Observation {
        Observation {
            public_key: Some(key),
            port: "25042".to_string(),
            address_ip: None,
            ble_addr: None,
            transport,
        }
    }

    fn registry() -> PeerRegistry {
        PeerRegistry::new(peer_id_from_public_key(&[0xee; 32]))
    }

    #[test]
    fn test_add_inserts_record() {
        let reg = registry();
        reg.add(observation([1; 32], Lan));
        assert_eq!(reg.len(), 1);

        let record = &reg.list()[0];
        assert_eq!(record.peer_id(), &peer_id_from_public_key(&[1; 32]));
        let info = record.info();
        assert_eq!(info.connection_types, vec![Lan]);
        assert_eq!(info.primary, Some(Lan));
    }

    #[test]
    fn test_own_beacon_suppressed() {
        let reg = registry();
        reg.add(observation([0xee; 32], Lan));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_keyless_observation_dropped() {
        let reg = registry();
        reg.add(Observation {
            public_key: None,
            port: "25042".to_string(),
            address_ip: Some(Ipv4Addr::new(10, 0, 0, 1)),
            ble_addr: None,
            transport: Internet,
        });
        assert!(reg.is_empty());
    }

    #[test]
    fn test_merge_never_overwrites() {
        let reg = registry();
        let mut first = observation([2; 32], Lan);
        first.address_ip = Some(Ipv4Addr::new(192, 168, 1, 10));
        reg.add(first);

        let mut second = observation([2; 32], Lan);
        second.address_ip = Some(Ipv4Addr::new(10, 0, 0, 99));
        second.port = "9999".to_string();
        reg.add(second);

        assert_eq!(reg.len(), 1);
        let info = reg.list()[0].info();
        assert_eq!(info.address_ip, Some(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(info.port, "25042");
    }

    #[test]
    fn test_merge_fills_empty_fields() {
        let reg = registry();
        let mut lan = observation([3; 32], Lan);
        lan.address_ip = Some(Ipv4Addr::new(192, 168, 1, 20));
        reg.add(lan);

        let mut ble = observation([3; 32], Ble);
        ble.ble_addr = Some("aa:bb:cc:dd:ee:ff".to_string());
        reg.add(ble);

        let info = reg.list()[0].info();
        assert_eq!(info.address_ip, Some(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(info.ble_addr.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        // LAN seen first, BLE added after: insertion order kept, BLE wins
        // the primary slot.
        assert_eq!(info.connection_types, vec![Lan, Ble]);
        assert_eq!(info.primary, Some(Ble));
    }

    #[test]
    fn test_duplicate_transport_not_duplicated() {
        let reg = registry();
        reg.add(observation([4; 32], Internet));
        reg.add(observation([4; 32], Internet));
        let info = reg.list()[0].info();
        assert_eq!(info.connection_types, vec![Internet]);
        assert_eq!(info.primary, Some(Internet));
    }

    #[test]
    fn test_list_sorted_by_peer_id() {
        let reg = registry();
        for key in [[9u8; 32], [1u8; 32], [5u8; 32]] {
            reg.add(observation(key, Lan));
        }
        let ids: Vec<_> = reg.list().iter().map(|r| r.peer_id().clone()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_delete() {
        let reg = registry();
        reg.add(observation([6; 32], Lan));
        let id = reg.list()[0].peer_id().clone();
        reg.delete(&id);
        assert!(reg.is_empty());
        assert!(reg.get(&id).is_none());
    }

    #[test]
    fn test_associate_inbound_creates_minimal_record() {
        let reg = registry();
        let record = reg
            .associate_inbound([7; 32], Some(Ipv4Addr::new(172, 16, 0, 2)))
            .unwrap();
        let info = record.info();
        assert_eq!(info.address_ip, Some(Ipv4Addr::new(172, 16, 0, 2)));
        assert!(info.port.is_empty());
        assert!(info.connection_types.is_empty());
        assert_eq!(info.primary, None);
    }

    #[test]
    fn test_associate_inbound_finds_existing() {
        let reg = registry();
        reg.add(observation([8; 32], Lan));
        let record = reg.associate_inbound([8; 32], None).unwrap();
        assert_eq!(record.peer_id(), &peer_id_from_public_key(&[8; 32]));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_associate_inbound_rejects_own_key() {
        let reg = PeerRegistry::new(peer_id_from_public_key(&[0xaa; 32]));
        assert!(reg.associate_inbound([0xaa; 32], None).is_none());
    }

    #[test]
    fn test_messages_append_in_order() {
        let reg = registry();
        reg.add(observation([10; 32], Lan));
        let record = &reg.list()[0];
        record.push_message(ChatMessage::now(record.peer_id().clone(), "one"));
        record.push_message(ChatMessage::now(record.peer_id().clone(), "two"));

        let texts: Vec<_> = record.messages().iter().map(|m| m.text.clone()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }
}
