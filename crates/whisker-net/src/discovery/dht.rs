//! DHT discovery.
//!
//! Thin consumer of a Kademlia DHT: a dedicated libp2p swarm (TCP + Noise
//! + Yamux, Kademlia + Identify) joins the network, announces a fixed
//! rendezvous key as a provider, and publishes a small identity record
//! (`me0w` beacon format) under a key derived from its own DHT peer ID.
//! Discovering a provider therefore takes two steps: the provider set
//! tells us *who* announced the rendezvous, their identity records tell
//! us *which Whisker key and chat port* they carry, and the routing table
//! supplies an IPv4 address. Only when all three are known does the
//! source emit an `Internet`-tagged observation — the registry refuses
//! key-less records.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

use libp2p::{
    identify,
    kad::{self, store::MemoryStore},
    multiaddr::Protocol,
    noise,
    swarm::{NetworkBehaviour, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId as DhtPeerId, SwarmBuilder,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use futures_util::StreamExt;

use whisker_shared::constants::{DHT_IDENTITY_PREFIX, DHT_QUERY_INTERVAL, DHT_RENDEZVOUS};
use whisker_shared::identity::Identity;
use whisker_shared::types::{ConnectionType, Observation};
use whisker_shared::wire::{encode_beacon, parse_beacon};

use crate::registry::PeerRegistry;

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "DhtSourceEvent")]
struct DhtBehaviour {
    kad: kad::Behaviour<MemoryStore>,
    identify: identify::Behaviour,
}

#[derive(Debug)]
enum DhtSourceEvent {
    Kad(kad::Event),
    Identify(identify::Event),
}

impl From<kad::Event> for DhtSourceEvent {
    fn from(event: kad::Event) -> Self {
        DhtSourceEvent::Kad(event)
    }
}

impl From<identify::Event> for DhtSourceEvent {
    fn from(event: identify::Event) -> Self {
        DhtSourceEvent::Identify(event)
    }
}

pub struct DhtConfig {
    /// Port the DHT swarm listens on (conventionally the chat port + 1).
    pub listen_port: u16,
    /// Nodes dialed to join the network. Empty means a private DHT of
    /// whoever dials us.
    pub bootstrap: Vec<Multiaddr>,
}

/// Spawn the DHT source. Initialization failures are logged and the
/// source gives up — the node keeps running on its other transports.
pub fn spawn_dht_source(
    identity: Arc<Identity>,
    chat_port: u16,
    config: DhtConfig,
    registry: Arc<PeerRegistry>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = run(identity, chat_port, config, registry, cancel).await {
            warn!(error = %e, "DHT source unavailable");
        }
    })
}

async fn run(
    identity: Arc<Identity>,
    chat_port: u16,
    config: DhtConfig,
    registry: Arc<PeerRegistry>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut swarm = SwarmBuilder::with_new_identity()
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )?
        .with_behaviour(|key| {
            let local_peer_id = key.public().to_peer_id();
            let store = MemoryStore::new(local_peer_id);
            let mut kad = kad::Behaviour::new(local_peer_id, store);
            kad.set_mode(Some(kad::Mode::Server));

            let identify = identify::Behaviour::new(identify::Config::new(
                "/whisker/1.0.0".to_string(),
                key.public(),
            ));

            DhtBehaviour { kad, identify }
        })?
        .build();

    let local_peer_id = *swarm.local_peer_id();
    swarm.listen_on(format!("/ip4/0.0.0.0/tcp/{}", config.listen_port).parse()?)?;

    for addr in &config.bootstrap {
        if let Err(e) = swarm.dial(addr.clone()) {
            warn!(addr = %addr, error = %e, "failed to dial bootstrap peer");
            continue;
        }
        if let Some(peer_id) = extract_peer_id(addr) {
            swarm
                .behaviour_mut()
                .kad
                .add_address(&peer_id, addr.clone());
        }
    }
    if !config.bootstrap.is_empty() {
        if let Err(e) = swarm.behaviour_mut().kad.bootstrap() {
            warn!(error = %e, "kademlia bootstrap failed to start");
        }
    }

    // Announce: provide the rendezvous key, publish our identity record.
    let rendezvous = kad::RecordKey::new(&DHT_RENDEZVOUS);
    if let Err(e) = swarm.behaviour_mut().kad.start_providing(rendezvous.clone()) {
        warn!(error = %e, "failed to announce rendezvous key");
    }
    let beacon = encode_beacon(identity.public_key(), &chat_port.to_string());
    let record = kad::Record::new(identity_record_key(&local_peer_id), beacon);
    if let Err(e) = swarm
        .behaviour_mut()
        .kad
        .put_record(record, kad::Quorum::One)
    {
        warn!(error = %e, "failed to publish identity record");
    }

    info!(peer_id = %local_peer_id, port = config.listen_port, "DHT source running");

    // Provider set, fetched identity records and learned addresses are
    // merged as they arrive; an observation needs all three.
    let mut queried: HashSet<DhtPeerId> = HashSet::new();
    let mut addresses: HashMap<DhtPeerId, Ipv4Addr> = HashMap::new();
    let mut pending: HashMap<DhtPeerId, ([u8; 32], String)> = HashMap::new();

    let mut ticker = tokio::time::interval(DHT_QUERY_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                swarm.behaviour_mut().kad.get_providers(rendezvous.clone());
            }
            event = swarm.select_next_some() => match event {
                SwarmEvent::Behaviour(DhtSourceEvent::Kad(kad::Event::OutboundQueryProgressed {
                    result,
                    ..
                })) => match result {
                    kad::QueryResult::GetProviders(Ok(kad::GetProvidersOk::FoundProviders {
                        providers,
                        ..
                    })) => {
                        for provider in providers {
                            if provider == local_peer_id || !queried.insert(provider) {
                                continue;
                            }
                            debug!(provider = %provider, "rendezvous provider found");
                            swarm
                                .behaviour_mut()
                                .kad
                                .get_record(identity_record_key(&provider));
                        }
                    }
                    kad::QueryResult::GetRecord(Ok(kad::GetRecordOk::FoundRecord(found))) => {
                        let Some(subject) = peer_from_record_key(found.record.key.as_ref()) else {
                            trace!("identity record with unrecognized key");
                            continue;
                        };
                        let Ok((public_key, port)) = parse_beacon(&found.record.value) else {
                            trace!(subject = %subject, "malformed identity record");
                            continue;
                        };
                        match addresses.get(&subject) {
                            Some(ip) => emit(&registry, public_key, port, *ip),
                            None => {
                                pending.insert(subject, (public_key, port));
                            }
                        }
                    }
                    kad::QueryResult::GetRecord(Err(e)) => {
                        trace!(error = %e, "identity record lookup failed");
                    }
                    kad::QueryResult::GetProviders(Err(e)) => {
                        trace!(error = %e, "provider lookup failed");
                    }
                    _ => {}
                },

                SwarmEvent::Behaviour(DhtSourceEvent::Kad(kad::Event::RoutingUpdated {
                    peer,
                    addresses: peer_addresses,
                    ..
                })) => {
                    if let Some(ip) = peer_addresses.iter().find_map(multiaddr_ipv4) {
                        addresses.insert(peer, ip);
                        if let Some((public_key, port)) = pending.remove(&peer) {
                            emit(&registry, public_key, port, ip);
                        }
                    }
                }

                SwarmEvent::Behaviour(DhtSourceEvent::Identify(identify::Event::Received {
                    peer_id,
                    info,
                    ..
                })) => {
                    for addr in &info.listen_addrs {
                        swarm
                            .behaviour_mut()
                            .kad
                            .add_address(&peer_id, addr.clone());
                    }
                    if let Some(ip) = info.listen_addrs.iter().find_map(multiaddr_ipv4) {
                        addresses.insert(peer_id, ip);
                        if let Some((public_key, port)) = pending.remove(&peer_id) {
                            emit(&registry, public_key, port, ip);
                        }
                    }
                }

                SwarmEvent::NewListenAddr { address, .. } => {
                    debug!(addr = %address, "DHT swarm listening");
                }

                _ => {}
            },
        }
    }

    debug!("DHT source stopped");
    Ok(())
}

fn emit(registry: &PeerRegistry, public_key: [u8; 32], port: String, ip: Ipv4Addr) {
    registry.add(Observation {
        public_key: Some(public_key),
        port,
        address_ip: Some(ip),
        ble_addr: None,
        transport: ConnectionType::Internet,
    });
}

fn identity_record_key(peer: &DhtPeerId) -> kad::RecordKey {
    kad::RecordKey::new(&format!("{DHT_IDENTITY_PREFIX}{peer}"))
}

fn peer_from_record_key(key: &[u8]) -> Option<DhtPeerId> {
    std::str::from_utf8(key)
        .ok()?
        .strip_prefix(DHT_IDENTITY_PREFIX)?
        .parse()
        .ok()
}

fn multiaddr_ipv4(addr: &Multiaddr) -> Option<Ipv4Addr> {
    addr.iter().find_map(|component| match component {
        Protocol::Ip4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    })
}

fn extract_peer_id(addr: &Multiaddr) -> Option<DhtPeerId> {
    addr.iter().find_map(|component| {
        if let Protocol::P2p(peer_id) = component {
            Some(peer_id)
        } else {
            None
        }
    })
}
