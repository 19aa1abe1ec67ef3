use thiserror::Error;

#[derive(Error, Debug)]
pub enum WhiskerError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal at startup: the node cannot run without a valid port and listener.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

/// Fatal for the session, never for the node.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("keypair generation failed: {0}")]
    Keygen(String),

    #[error("noise handshake failed: {0}")]
    Handshake(String),

    #[error("cipher failure: {0}")]
    Cipher(String),

    #[error("session is in the failed state")]
    SessionFailed,
}

/// Fatal for the socket; the peer record survives unless the sweep concurs.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("peer address not available")]
    NoAddress,

    #[error("dial failed: {0}")]
    Dial(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Transient: logged and retried with back-off.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("discovery socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("DHT error: {0}")]
    Dht(String),
}

/// Malformed wire data: dropped silently, counted.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed beacon")]
    BadBeacon,

    #[error("malformed BLE metadata payload")]
    BadMetadata,

    #[error("bad public key length: {0}")]
    KeyLength(usize),

    #[error("bad port field")]
    BadPort,
}
