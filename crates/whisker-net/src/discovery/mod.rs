//! Peer discovery sources.
//!
//! Three sources run concurrently and independently, all feeding the same
//! [`PeerRegistry::add`](crate::registry::PeerRegistry::add) API: LAN
//! multicast beacons, BLE advertisements, and a Kademlia DHT rendezvous.
//! None is required; each degrades gracefully when its transport is
//! unavailable.

pub mod ble;
pub mod dht;
pub mod lan;
