//! LAN multicast discovery.
//!
//! Broadcasts a `me0w:<key>:<port>` beacon to the multicast group every
//! second and listens for other nodes' beacons on the same group. Our own
//! beacons (multicast loop is enabled) are discarded by comparing the
//! parsed key against our identity. Malformed datagrams are dropped and
//! counted; socket errors back off for two seconds and retry.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use whisker_shared::constants::{
    BEACON_BUFFER_SIZE, BEACON_INTERVAL, DISCOVERY_BACKOFF, MULTICAST_GROUP,
};
use whisker_shared::error::DiscoveryError;
use whisker_shared::identity::Identity;
use whisker_shared::types::{ConnectionType, Observation};
use whisker_shared::wire::{encode_beacon, parse_beacon};

use crate::netutil::multicast_listen_socket;
use crate::registry::PeerRegistry;

pub fn spawn_lan_discovery(
    identity: Arc<Identity>,
    port: u16,
    registry: Arc<PeerRegistry>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let group: Ipv4Addr = MULTICAST_GROUP.parse().expect("valid multicast group");
        run(identity, group, port, registry, cancel).await;
    })
}

async fn run(
    identity: Arc<Identity>,
    group: Ipv4Addr,
    port: u16,
    registry: Arc<PeerRegistry>,
    cancel: CancellationToken,
) {
    let beacon = encode_beacon(identity.public_key(), &port.to_string());
    let destination = (group, port);
    let mut dropped: u64 = 0;

    let send_socket = loop {
        match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
            Ok(socket) => break socket,
            Err(e) => {
                warn!(error = %e, "beacon send socket failed, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(DISCOVERY_BACKOFF) => {}
                }
            }
        }
    };

    let mut buf = vec![0u8; BEACON_BUFFER_SIZE];
    let mut ticker = tokio::time::interval(BEACON_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(group = %group, port, "LAN discovery running");

    'reopen: loop {
        let Some(socket) = open_recv_socket(group, port, &cancel).await else {
            break;
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break 'reopen,
                _ = ticker.tick() => {
                    if let Err(e) = send_socket.send_to(&beacon, destination).await {
                        warn!(error = %e, "beacon send failed, backing off");
                        tokio::time::sleep(DISCOVERY_BACKOFF).await;
                    }
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, source)) => {
                        handle_datagram(&buf[..len], source.ip(), &identity, &registry, &mut dropped);
                    }
                    Err(e) => {
                        warn!(error = %e, "beacon receive failed, reopening socket");
                        tokio::time::sleep(DISCOVERY_BACKOFF).await;
                        continue 'reopen;
                    }
                },
            }
        }
    }
    debug!("LAN discovery stopped");
}

/// Open (or reopen) the multicast listen socket, backing off until it
/// succeeds or shutdown is requested. `None` only on shutdown.
async fn open_recv_socket(
    group: Ipv4Addr,
    port: u16,
    cancel: &CancellationToken,
) -> Option<UdpSocket> {
    loop {
        match try_open(group, port) {
            Ok(socket) => return Some(socket),
            Err(e) => {
                warn!(error = %e, "multicast socket failed, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(DISCOVERY_BACKOFF) => {}
                }
            }
        }
    }
}

fn try_open(group: Ipv4Addr, port: u16) -> Result<UdpSocket, DiscoveryError> {
    let socket = multicast_listen_socket(group, port)?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

fn handle_datagram(
    datagram: &[u8],
    source: IpAddr,
    identity: &Identity,
    registry: &PeerRegistry,
    dropped: &mut u64,
) {
    let (public_key, port) = match parse_beacon(datagram) {
        Ok(parsed) => parsed,
        Err(e) => {
            *dropped += 1;
            trace!(error = %e, total_dropped = *dropped, "malformed beacon dropped");
            return;
        }
    };

    // Our own beacon comes back via multicast loop.
    if &public_key == identity.public_key() {
        return;
    }

    let address_ip = match source {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(_) => None,
    };

    registry.add(Observation {
        public_key: Some(public_key),
        port,
        address_ip,
        ble_addr: None,
        transport: ConnectionType::Lan,
    });
}
