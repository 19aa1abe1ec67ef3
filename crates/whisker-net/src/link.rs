//! Outbound encrypted links.
//!
//! An [`ActiveLink`] owns a framed WebSocket connection and its Noise
//! session as a single value: the two share a lifetime, so there is never
//! a session without a socket or vice versa. The link lives in the
//! per-peer slot on the registry record and is dropped whole on any
//! failure; re-establishment requires a re-dial.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use whisker_shared::constants::CHAT_PATH;
use whisker_shared::error::TransportError;
use whisker_shared::session::SessionCipher;

use crate::registry::PeerRecord;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A dialed `/chat` connection with its established initiator session.
pub struct ActiveLink {
    ws: WsStream,
    cipher: SessionCipher,
}

impl ActiveLink {
    /// Dial the peer and run the XX handshake as initiator. The first user
    /// plaintext rides as the payload of the final handshake message, so a
    /// fresh dial costs no extra round trip for the message itself.
    pub async fn connect(
        local_private_key: &[u8],
        host: &str,
        port: &str,
        first_text: &str,
    ) -> Result<Self, TransportError> {
        let url = format!("ws://{host}:{port}{CHAT_PATH}");
        let (mut ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Dial(format!("{e}")))?;

        let mut cipher = SessionCipher::initiator(local_private_key)?;

        let m1 = cipher.write(&[])?;
        ws.send(Message::Binary(m1.into()))
            .await
            .map_err(|e| TransportError::Send(format!("{e}")))?;

        let m2 = next_binary(&mut ws).await?;
        cipher.read(&m2)?;

        let m3 = cipher.write(first_text.as_bytes())?;
        ws.send(Message::Binary(m3.into()))
            .await
            .map_err(|e| TransportError::Send(format!("{e}")))?;

        debug!(url = %url, "outbound session established");
        Ok(Self { ws, cipher })
    }

    /// Encrypt and transmit one message over the established session.
    pub async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let frame = self.cipher.write(text.as_bytes())?;
        self.ws
            .send(Message::Binary(frame.into()))
            .await
            .map_err(|e| TransportError::Send(format!("{e}")))
    }

    pub fn is_established(&self) -> bool {
        self.cipher.is_established()
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

async fn next_binary(ws: &mut WsStream) -> Result<Vec<u8>, TransportError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
            Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TransportError::Send(format!("{e}"))),
        }
    }
}

impl PeerRecord {
    /// Encrypt and transmit `text` to this peer, dialing first when no
    /// link exists. The per-peer mutex serializes dial, handshake and
    /// send ordering. On failure the link is torn down (session and
    /// socket cleared together) and the error propagates to the caller.
    pub async fn send(&self, local_private_key: &[u8], text: &str) -> Result<(), TransportError> {
        let mut slot = self.link.lock().await;

        if slot.is_none() {
            let (host, port) = {
                let info = self.info();
                let ip = info.address_ip.ok_or(TransportError::NoAddress)?;
                if info.port.is_empty() {
                    return Err(TransportError::NoAddress);
                }
                (ip.to_string(), info.port)
            };
            let link = ActiveLink::connect(local_private_key, &host, &port, text).await?;
            *slot = Some(link);
            return Ok(());
        }

        let link = slot.as_mut().expect("link slot checked above");
        match link.send(text).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(link) = slot.take() {
                    link.close().await;
                }
                Err(e)
            }
        }
    }
}
