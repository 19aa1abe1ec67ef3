//! Inbound listener.
//!
//! Binds `0.0.0.0:<port>` and serves two upgrade paths: `/chat` carries
//! the real ciphertext stream through a responder-role Noise session,
//! `/meow` accepts the upgrade and immediately closes (peers use it as a
//! liveness indicator). Inbound sessions are associated with a peer record
//! by the static key recovered from the handshake — never by source IP,
//! which lies behind NAT.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use whisker_shared::constants::{CHAT_PATH, DISCOVERY_BACKOFF, LIVENESS_PATH};
use whisker_shared::error::ConfigError;
use whisker_shared::identity::Identity;
use whisker_shared::session::SessionCipher;
use whisker_shared::types::ChatMessage;

use crate::registry::PeerRegistry;

pub struct Listener {
    tcp: TcpListener,
    identity: Arc<Identity>,
    registry: Arc<PeerRegistry>,
}

impl Listener {
    /// Bind the listener socket. A failure here is fatal at startup.
    pub async fn bind(
        port: u16,
        identity: Arc<Identity>,
        registry: Arc<PeerRegistry>,
    ) -> Result<Self, ConfigError> {
        let addr = format!("0.0.0.0:{port}");
        let tcp = TcpListener::bind(&addr)
            .await
            .map_err(|source| ConfigError::Bind { addr, source })?;
        Ok(Self {
            tcp,
            identity,
            registry,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Accept loop. Each connection runs in its own task; accept errors
    /// back off and retry rather than killing the node.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.tcp.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let identity = self.identity.clone();
                        let registry = self.registry.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer_addr, identity, registry).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed, backing off");
                        tokio::time::sleep(DISCOVERY_BACKOFF).await;
                    }
                },
            }
        }
        debug!("listener stopped");
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    identity: Arc<Identity>,
    registry: Arc<PeerRegistry>,
) {
    let mut path = String::new();
    let callback = |req: &Request, resp: Response| {
        path = req.uri().path().to_string();
        if path == CHAT_PATH || path == LIVENESS_PATH {
            Ok(resp)
        } else {
            let mut rejection = ErrorResponse::new(None);
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let mut ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            trace!(from = %peer_addr, error = %e, "upgrade failed");
            return;
        }
    };

    if path == LIVENESS_PATH {
        let _ = ws.close(None).await;
        return;
    }

    let mut cipher = match SessionCipher::responder(identity.private_key()) {
        Ok(cipher) => cipher,
        Err(e) => {
            warn!(error = %e, "failed to create responder session");
            return;
        }
    };

    let remote_ip = match peer_addr.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(_) => None,
    };
    let mut record = None;

    while let Some(frame) = ws.next().await {
        let data = match frame {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                trace!(from = %peer_addr, error = %e, "socket error");
                break;
            }
        };

        let plaintext = match cipher.read(&data) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                // Fatal for the session: drop it with the socket. The peer
                // record, if any, stays and may be re-dialed.
                warn!(from = %peer_addr, error = %e, "session failed, closing");
                break;
            }
        };

        // The initiator's static key arrives in the final handshake
        // message; that is the only reliable identity for association.
        if record.is_none() {
            if let Some(remote_static) = cipher.remote_static() {
                record = registry.associate_inbound(remote_static, remote_ip);
                if record.is_none() {
                    break;
                }
            }
        }

        if cipher.is_handshaking() {
            let response = match cipher.write(&[]) {
                Ok(response) => response,
                Err(e) => {
                    warn!(from = %peer_addr, error = %e, "handshake write failed");
                    break;
                }
            };
            if ws.send(Message::Binary(response.into())).await.is_err() {
                break;
            }
        } else if !plaintext.is_empty() {
            if let Some(record) = &record {
                let text = String::from_utf8_lossy(&plaintext).into_owned();
                record.push_message(ChatMessage::now(record.peer_id().clone(), text));
            }
        }
    }

    if let Some(record) = &record {
        debug!(peer = %record.peer_id().short(), "inbound session ended");
    }
}
