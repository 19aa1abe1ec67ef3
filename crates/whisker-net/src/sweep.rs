//! Liveness sweep.
//!
//! Every second, snapshot the peer list (read lock released before any
//! I/O) and probe each IP-reachable peer's `/meow` endpoint: connect,
//! close. Peers that definitely refuse are deleted; transient failures
//! (timeouts, temporary unreachability) keep the record. BLE-primary
//! peers are exempt — they may have no IP address at all.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use whisker_shared::constants::{LIVENESS_PATH, LIVENESS_TIMEOUT, SWEEP_INTERVAL};
use whisker_shared::types::ConnectionType;

use crate::registry::PeerRegistry;

#[derive(Debug, PartialEq, Eq)]
enum Probe {
    Alive,
    Transient,
    Dead,
}

pub fn spawn_sweeper(registry: Arc<PeerRegistry>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => sweep_once(&registry).await,
            }
        }
        debug!("liveness sweeper stopped");
    })
}

async fn sweep_once(registry: &PeerRegistry) {
    // Snapshot under the read lock, probe without it.
    for record in registry.list() {
        let info = record.info();
        if info.primary == Some(ConnectionType::Ble) {
            continue;
        }
        let Some(ip) = info.address_ip else { continue };
        if info.port.is_empty() {
            continue;
        }

        match probe(&ip.to_string(), &info.port).await {
            Probe::Alive | Probe::Transient => {}
            Probe::Dead => {
                debug!(peer = %record.peer_id().short(), "liveness probe refused, deleting");
                registry.delete(record.peer_id());
            }
        }
    }
}

/// Stateless probe: connect to the liveness endpoint, then close.
async fn probe(host: &str, port: &str) -> Probe {
    let url = format!("ws://{host}:{port}{LIVENESS_PATH}");
    match tokio::time::timeout(LIVENESS_TIMEOUT, connect_async(url.as_str())).await {
        Err(_) => Probe::Transient,
        Ok(Ok((mut ws, _))) => {
            let _ = ws.close(None).await;
            Probe::Alive
        }
        Ok(Err(e)) => {
            trace!(url = %url, error = %e, "liveness probe failed");
            classify(&e)
        }
    }
}

// Definite refusals delete the peer; anything plausibly temporary keeps
// it for the next sweep.
fn classify(error: &WsError) -> Probe {
    use std::io::ErrorKind;
    match error {
        WsError::Io(io) => match io.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotFound => Probe::Dead,
            ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted => {
                Probe::Transient
            }
            _ => Probe::Transient,
        },
        WsError::Url(_) | WsError::Http(_) | WsError::HttpFormat(_) => Probe::Dead,
        _ => Probe::Transient,
    }
}
