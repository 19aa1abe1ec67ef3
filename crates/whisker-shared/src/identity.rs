use blake2::{Blake2b512, Digest};
use snow::Builder;

use crate::constants::{NOISE_PATTERN, PUBKEY_SIZE};
use crate::error::CryptoError;
use crate::types::PeerId;

/// Process-lifetime identity: a static Curve25519 keypair. A node has no
/// account; its public key *is* its identity.
pub struct Identity {
    private_key: Vec<u8>,
    public_key: [u8; PUBKEY_SIZE],
    peer_id: PeerId,
}

impl Identity {
    /// Generate a fresh static keypair from the OS RNG. The only failure
    /// mode is the RNG itself, which is fatal at startup.
    pub fn generate() -> Result<Self, CryptoError> {
        let params = NOISE_PATTERN
            .parse()
            .map_err(|e| CryptoError::Keygen(format!("{e}")))?;
        let keypair = Builder::new(params)
            .generate_keypair()
            .map_err(|e| CryptoError::Keygen(format!("{e}")))?;

        let mut public_key = [0u8; PUBKEY_SIZE];
        public_key.copy_from_slice(&keypair.public);

        let peer_id = peer_id_from_public_key(&public_key);
        Ok(Self {
            private_key: keypair.private,
            public_key,
            peer_id,
        })
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    pub fn public_key(&self) -> &[u8; PUBKEY_SIZE] {
        &self.public_key
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }
}

/// Derive the peer ID from a static public key: the lower 16 bytes of
/// BLAKE2b-512 of the key, rendered as 32 lowercase hex chars. Identifies
/// a peer without exposing the key itself in logs and UI.
pub fn peer_id_from_public_key(public_key: &[u8; PUBKEY_SIZE]) -> PeerId {
    let digest = Blake2b512::digest(public_key);
    PeerId(hex::encode(&digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_identity() {
        let id = Identity::generate().unwrap();
        assert_eq!(id.public_key().len(), 32);
        assert!(!id.private_key().is_empty());
    }

    #[test]
    fn test_peer_id_format() {
        let id = Identity::generate().unwrap();
        let peer_id = id.peer_id();
        assert_eq!(peer_id.as_str().len(), 32);
        assert!(peer_id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_peer_id_deterministic() {
        let key = [7u8; 32];
        assert_eq!(peer_id_from_public_key(&key), peer_id_from_public_key(&key));
    }

    #[test]
    fn test_distinct_keys_distinct_ids() {
        let a = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        assert_ne!(a.peer_id(), b.peer_id());
    }
}
