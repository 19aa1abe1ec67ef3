use std::time::Duration;

use uuid::{uuid, Uuid};

/// Application name.
pub const APP_NAME: &str = "Whisker";

/// Default listener / multicast port.
pub const DEFAULT_PORT: u16 = 25042;

/// Noise protocol pattern: mutual authentication + forward secrecy.
pub const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_BLAKE2b";

/// Curve25519 public key size in bytes.
pub const PUBKEY_SIZE: usize = 32;

/// Multicast group the LAN beacon is sent to.
pub const MULTICAST_GROUP: &str = "224.0.0.1";

/// Tag prefixing every LAN beacon datagram.
pub const BEACON_TAG: &[u8] = b"me0w";

/// How often the LAN beacon is broadcast.
pub const BEACON_INTERVAL: Duration = Duration::from_secs(1);

/// Back-off after a discovery socket error before retrying.
pub const DISCOVERY_BACKOFF: Duration = Duration::from_secs(2);

/// UDP receive buffer for beacon datagrams.
pub const BEACON_BUFFER_SIZE: usize = 1024;

/// BLE GATT service UUID advertised by every node.
pub const BLE_SERVICE_UUID: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");

/// BLE GATT characteristic holding the peer metadata payload.
pub const BLE_META_CHARACTERISTIC: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");

/// Short name included in BLE advertisements.
pub const BLE_ADVERTISE_NAME: &str = "P2P";

/// Timeout for a GATT connection + characteristic read.
pub const BLE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// URL path carrying the ciphertext stream.
pub const CHAT_PATH: &str = "/chat";

/// URL path used as a liveness indicator: accepts the upgrade, then closes.
pub const LIVENESS_PATH: &str = "/meow";

/// How often the liveness sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Handshake timeout for a liveness probe connection.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(2);

/// How often cached availability flags are refreshed.
pub const AVAILABILITY_INTERVAL: Duration = Duration::from_secs(1);

/// A query older than this forces a fresh availability refresh.
pub const AVAILABILITY_STALENESS: Duration = Duration::from_millis(500);

/// Timeout for the external connectivity probe.
pub const INTERNET_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Rendezvous key every node announces on the DHT.
pub const DHT_RENDEZVOUS: &[u8] = b"/whisker/rendezvous/v1";

/// Prefix of the per-node identity record published on the DHT.
pub const DHT_IDENTITY_PREFIX: &str = "/whisker/id/";

/// How often the DHT source re-queries the rendezvous providers.
pub const DHT_QUERY_INTERVAL: Duration = Duration::from_secs(30);
