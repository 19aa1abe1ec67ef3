// Shared primitives: identity, Noise session cipher, wire formats, errors.

pub mod constants;
pub mod error;
pub mod identity;
pub mod session;
pub mod types;
pub mod wire;

pub use error::{ConfigError, CryptoError, DecodeError, DiscoveryError, TransportError, WhiskerError};
pub use identity::{peer_id_from_public_key, Identity};
pub use session::SessionCipher;
pub use types::{ChatMessage, ConnectionType, Observation, PeerId};

#[cfg(test)]
mod proptests;
