use snow::{Builder, HandshakeState, TransportState};

use crate::constants::{NOISE_PATTERN, PUBKEY_SIZE};
use crate::error::CryptoError;

/// Maximum size of a single Noise message.
const MAX_NOISE_MESSAGE: usize = 65535;

/// AEAD tag overhead per transport message.
const TAG_SIZE: usize = 16;

enum State {
    /// Three-message XX exchange in progress.
    Handshake(Box<HandshakeState>),
    /// Terminal usable state: independent send and receive cipher states
    /// with monotonic nonces, managed by snow.
    Established(Box<TransportState>),
    /// Terminal. Any cryptographic failure lands here; the session must be
    /// discarded and the peer re-dialed.
    Failed,
}

/// Noise XX session wrapping one connection. Both `write` and `read`
/// advance the handshake until it completes, then encrypt/decrypt with the
/// derived cipher states. The first call on an initiator is a write; the
/// first call on a responder is a read.
pub struct SessionCipher {
    state: State,
    initiator: bool,
    handshake_step: u8,
}

impl SessionCipher {
    pub fn initiator(local_private_key: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            state: State::Handshake(Box::new(build(local_private_key, true)?)),
            initiator: true,
            handshake_step: 0,
        })
    }

    pub fn responder(local_private_key: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            state: State::Handshake(Box::new(build(local_private_key, false)?)),
            initiator: false,
            handshake_step: 0,
        })
    }

    /// In `Handshake`: produce the next handshake message, carrying
    /// `plaintext` as its payload. In `Established`: encrypt with the send
    /// cipher state. Any failure is terminal for the session.
    pub fn write(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match &mut self.state {
            State::Handshake(hs) => {
                let mut buf = vec![0u8; MAX_NOISE_MESSAGE];
                match hs.write_message(plaintext, &mut buf) {
                    Ok(n) => {
                        buf.truncate(n);
                        self.handshake_step += 1;
                        self.try_promote()?;
                        Ok(buf)
                    }
                    Err(e) => {
                        self.state = State::Failed;
                        Err(CryptoError::Handshake(format!("{e}")))
                    }
                }
            }
            State::Established(transport) => {
                let mut buf = vec![0u8; plaintext.len() + TAG_SIZE];
                match transport.write_message(plaintext, &mut buf) {
                    Ok(n) => {
                        buf.truncate(n);
                        Ok(buf)
                    }
                    Err(e) => {
                        self.state = State::Failed;
                        Err(CryptoError::Cipher(format!("{e}")))
                    }
                }
            }
            State::Failed => Err(CryptoError::SessionFailed),
        }
    }

    /// Symmetric to [`write`](Self::write): consume the next handshake
    /// message, or decrypt a transport ciphertext. A MAC failure or
    /// malformed frame moves the session to `Failed`.
    pub fn read(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match &mut self.state {
            State::Handshake(hs) => {
                let mut buf = vec![0u8; MAX_NOISE_MESSAGE];
                match hs.read_message(ciphertext, &mut buf) {
                    Ok(n) => {
                        buf.truncate(n);
                        self.handshake_step += 1;
                        self.try_promote()?;
                        Ok(buf)
                    }
                    Err(e) => {
                        self.state = State::Failed;
                        Err(CryptoError::Handshake(format!("{e}")))
                    }
                }
            }
            State::Established(transport) => {
                let mut buf = vec![0u8; ciphertext.len()];
                match transport.read_message(ciphertext, &mut buf) {
                    Ok(n) => {
                        buf.truncate(n);
                        Ok(buf)
                    }
                    Err(e) => {
                        self.state = State::Failed;
                        Err(CryptoError::Cipher(format!("{e}")))
                    }
                }
            }
            State::Failed => Err(CryptoError::SessionFailed),
        }
    }

    /// The remote static public key, known from handshake message 2
    /// (responder's) or 3 (initiator's) onward.
    pub fn remote_static(&self) -> Option<[u8; PUBKEY_SIZE]> {
        let raw = match &self.state {
            State::Handshake(hs) => hs.get_remote_static(),
            State::Established(transport) => transport.get_remote_static(),
            State::Failed => None,
        }?;
        let mut key = [0u8; PUBKEY_SIZE];
        key.copy_from_slice(raw);
        Some(key)
    }

    pub fn is_handshaking(&self) -> bool {
        matches!(self.state, State::Handshake(_))
    }

    pub fn is_established(&self) -> bool {
        matches!(self.state, State::Established(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, State::Failed)
    }

    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    /// Completed handshake messages so far (0..=3).
    pub fn handshake_step(&self) -> u8 {
        self.handshake_step
    }

    // Once both sides hold the derived cipher states the session switches
    // to transport mode atomically.
    fn try_promote(&mut self) -> Result<(), CryptoError> {
        let finished = match &self.state {
            State::Handshake(hs) => hs.is_handshake_finished(),
            _ => return Ok(()),
        };
        if !finished {
            return Ok(());
        }

        match std::mem::replace(&mut self.state, State::Failed) {
            State::Handshake(hs) => match hs.into_transport_mode() {
                Ok(transport) => {
                    self.state = State::Established(Box::new(transport));
                    Ok(())
                }
                Err(e) => Err(CryptoError::Handshake(format!("{e}"))),
            },
            other => {
                self.state = other;
                Ok(())
            }
        }
    }
}

fn build(local_private_key: &[u8], initiator: bool) -> Result<HandshakeState, CryptoError> {
    let params = NOISE_PATTERN
        .parse()
        .map_err(|e| CryptoError::Handshake(format!("{e}")))?;
    let builder = Builder::new(params).local_private_key(local_private_key);
    let result = if initiator {
        builder.build_initiator()
    } else {
        builder.build_responder()
    };
    result.map_err(|e| CryptoError::Handshake(format!("{e}")))
}
