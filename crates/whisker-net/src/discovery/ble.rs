//! BLE discovery.
//!
//! The node advertises the Whisker GATT service UUID with a short name
//! marker and exposes one readable characteristic whose value is the
//! `<key>|<port>` metadata payload. Scanning extracts metadata from
//! advertisement data when possible (service data first, with its
//! embedded 16-byte UUID prefix, then manufacturer data) and falls back
//! to a short GATT connection for connectable peers.
//!
//! Hardware integration is delegated: the core talks to a [`BleAdapter`]
//! and a platform binding (btleplug and friends) implements it out of
//! tree. [`NullBleAdapter`] serves headless hosts.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tracing::{debug, info, trace};

use whisker_shared::constants::{
    BLE_ADVERTISE_NAME, BLE_CONNECT_TIMEOUT, BLE_META_CHARACTERISTIC, BLE_SERVICE_UUID,
};
use whisker_shared::identity::Identity;
use whisker_shared::types::{ConnectionType, Observation};
use whisker_shared::wire::{encode_ble_metadata, parse_ble_metadata};

use crate::registry::PeerRegistry;

/// One advertisement seen by the scanner, already filtered to our
/// service UUID by the adapter.
#[derive(Debug, Clone)]
pub struct BleAdvertisement {
    /// Platform-specific device address.
    pub addr: String,
    pub connectable: bool,
    /// Raw service-data payload, possibly prefixed with the 16-byte
    /// service UUID.
    pub service_data: Option<Vec<u8>>,
    pub manufacturer_data: Option<Vec<u8>>,
}

/// Platform BLE adapter contract. Implementations may be stubbed for
/// tests; all parsing and peer handling stays in the core.
pub trait BleAdapter: Send + Sync {
    /// Platform probe of the radio power state. Must stay independent of
    /// scan/advertise health.
    fn is_powered_on(&self) -> bool;

    /// Advertise `service` under the short `name` marker and serve
    /// `payload` behind the readable metadata characteristic.
    fn advertise(&self, service: Uuid, characteristic: Uuid, name: &str, payload: Vec<u8>);

    /// Continuous scan for advertisements carrying `service`.
    fn scan(&self, service: Uuid) -> mpsc::UnboundedReceiver<BleAdvertisement>;

    /// GATT-connect to `addr` and read the metadata characteristic. The
    /// adapter resolves the channel with the raw value or drops it on
    /// failure; the caller applies its own timeout.
    fn read_metadata(&self, addr: &str, characteristic: Uuid) -> oneshot::Receiver<Vec<u8>>;
}

/// Adapter for hosts without a usable radio: never powered, sees nothing.
pub struct NullBleAdapter;

impl BleAdapter for NullBleAdapter {
    fn is_powered_on(&self) -> bool {
        false
    }

    fn advertise(&self, _service: Uuid, _characteristic: Uuid, _name: &str, _payload: Vec<u8>) {}

    fn scan(&self, _service: Uuid) -> mpsc::UnboundedReceiver<BleAdvertisement> {
        // Sender dropped immediately: the receiver yields nothing, which
        // parks the source until shutdown.
        mpsc::unbounded_channel().1
    }

    fn read_metadata(&self, _addr: &str, _characteristic: Uuid) -> oneshot::Receiver<Vec<u8>> {
        oneshot::channel().1
    }
}

pub fn spawn_ble_source(
    adapter: Arc<dyn BleAdapter>,
    identity: Arc<Identity>,
    port: u16,
    registry: Arc<PeerRegistry>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let payload = encode_ble_metadata(identity.public_key(), &port.to_string());
        adapter.advertise(
            BLE_SERVICE_UUID,
            BLE_META_CHARACTERISTIC,
            BLE_ADVERTISE_NAME,
            payload,
        );

        let mut advertisements = adapter.scan(BLE_SERVICE_UUID);
        info!("BLE discovery running");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                advertisement = advertisements.recv() => match advertisement {
                    Some(advertisement) => {
                        handle_advertisement(&*adapter, advertisement, &identity, &registry).await;
                    }
                    None => {
                        // Adapter closed the scan stream; nothing left to do.
                        cancel.cancelled().await;
                        break;
                    }
                },
            }
        }
        debug!("BLE discovery stopped");
    })
}

async fn handle_advertisement(
    adapter: &dyn BleAdapter,
    advertisement: BleAdvertisement,
    identity: &Identity,
    registry: &PeerRegistry,
) {
    let parsed = match metadata_from_advertisement(&advertisement) {
        Some(parsed) => Some(parsed),
        None if advertisement.connectable => {
            read_metadata_via_gatt(adapter, &advertisement.addr).await
        }
        None => None,
    };

    let Some((public_key, port)) = parsed else {
        trace!(addr = %advertisement.addr, "advertisement without usable metadata");
        return;
    };

    // The scanner sees its own broadcasts.
    if &public_key == identity.public_key() {
        return;
    }

    registry.add(Observation {
        public_key: Some(public_key),
        port,
        address_ip: None,
        ble_addr: Some(advertisement.addr),
        transport: ConnectionType::Ble,
    });
}

/// Metadata from advertisement data alone, without connecting. Service
/// data is most reliable; an embedded 16-byte UUID prefix is stripped
/// when present. Manufacturer data is the fallback.
fn metadata_from_advertisement(
    advertisement: &BleAdvertisement,
) -> Option<([u8; 32], String)> {
    if let Some(data) = &advertisement.service_data {
        if data.len() > 16 {
            if let Ok(parsed) = parse_ble_metadata(&data[16..]) {
                return Some(parsed);
            }
        }
        if let Ok(parsed) = parse_ble_metadata(data) {
            return Some(parsed);
        }
    }
    if let Some(data) = &advertisement.manufacturer_data {
        if let Ok(parsed) = parse_ble_metadata(data) {
            return Some(parsed);
        }
    }
    None
}

async fn read_metadata_via_gatt(
    adapter: &dyn BleAdapter,
    addr: &str,
) -> Option<([u8; 32], String)> {
    let read = adapter.read_metadata(addr, BLE_META_CHARACTERISTIC);
    match tokio::time::timeout(BLE_CONNECT_TIMEOUT, read).await {
        Ok(Ok(value)) => parse_ble_metadata(&value).ok(),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Channel-backed adapter: tests inject advertisements and GATT
    /// values directly.
    pub struct MockBleAdapter {
        powered: AtomicBool,
        advertised: Mutex<Option<(String, Vec<u8>)>>,
        sender: Mutex<Option<mpsc::UnboundedSender<BleAdvertisement>>>,
        gatt: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MockBleAdapter {
        pub fn powered(on: bool) -> Arc<Self> {
            Arc::new(Self {
                powered: AtomicBool::new(on),
                advertised: Mutex::new(None),
                sender: Mutex::new(None),
                gatt: Mutex::new(HashMap::new()),
            })
        }

        pub fn set_powered(&self, on: bool) {
            self.powered.store(on, Ordering::SeqCst);
        }

        pub fn advertised_name(&self) -> Option<String> {
            self.advertised.lock().as_ref().map(|(name, _)| name.clone())
        }

        pub fn advertised_payload(&self) -> Option<Vec<u8>> {
            self.advertised.lock().as_ref().map(|(_, payload)| payload.clone())
        }

        pub fn set_gatt_value(&self, addr: &str, value: Vec<u8>) {
            self.gatt.lock().insert(addr.to_string(), value);
        }

        pub fn inject(&self, advertisement: BleAdvertisement) {
            if let Some(sender) = self.sender.lock().as_ref() {
                let _ = sender.send(advertisement);
            }
        }
    }

    impl BleAdapter for MockBleAdapter {
        fn is_powered_on(&self) -> bool {
            self.powered.load(Ordering::SeqCst)
        }

        fn advertise(&self, _service: Uuid, _characteristic: Uuid, name: &str, payload: Vec<u8>) {
            *self.advertised.lock() = Some((name.to_string(), payload));
        }

        fn scan(&self, _service: Uuid) -> mpsc::UnboundedReceiver<BleAdvertisement> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.sender.lock() = Some(tx);
            rx
        }

        fn read_metadata(&self, addr: &str, _characteristic: Uuid) -> oneshot::Receiver<Vec<u8>> {
            let (tx, rx) = oneshot::channel();
            if let Some(value) = self.gatt.lock().get(addr) {
                let _ = tx.send(value.clone());
            }
            rx
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockBleAdapter;
    use super::*;

    // Keys containing the `|` delimiter cannot round-trip the metadata
    // payload; tests use delimiter-free keys.
    fn clean_identity() -> Identity {
        loop {
            let identity = Identity::generate().unwrap();
            if !identity.public_key().contains(&b'|') {
                return identity;
            }
        }
    }

    fn fixtures() -> (Arc<Identity>, Arc<PeerRegistry>) {
        let identity = Arc::new(clean_identity());
        let registry = Arc::new(PeerRegistry::new(identity.peer_id().clone()));
        (identity, registry)
    }

    fn advertisement(addr: &str) -> BleAdvertisement {
        BleAdvertisement {
            addr: addr.to_string(),
            connectable: false,
            service_data: None,
            manufacturer_data: None,
        }
    }

    #[test]
    fn test_service_data_with_uuid_prefix() {
        let other = clean_identity();
        let mut data = vec![0u8; 16];
        data.extend_from_slice(&encode_ble_metadata(other.public_key(), "25042"));

        let mut adv = advertisement("dev-a");
        adv.service_data = Some(data);

        let (key, port) = metadata_from_advertisement(&adv).unwrap();
        assert_eq!(&key, other.public_key());
        assert_eq!(port, "25042");
    }

    #[test]
    fn test_service_data_without_prefix() {
        let other = clean_identity();
        let mut adv = advertisement("dev-b");
        adv.service_data = Some(encode_ble_metadata(other.public_key(), "25042"));
        assert!(metadata_from_advertisement(&adv).is_some());
    }

    #[test]
    fn test_manufacturer_data_fallback() {
        let other = clean_identity();
        let mut adv = advertisement("dev-c");
        adv.service_data = Some(b"garbage".to_vec());
        adv.manufacturer_data = Some(encode_ble_metadata(other.public_key(), "25042"));
        assert!(metadata_from_advertisement(&adv).is_some());
    }

    #[test]
    fn test_no_metadata_anywhere() {
        let adv = advertisement("dev-d");
        assert!(metadata_from_advertisement(&adv).is_none());
    }

    #[tokio::test]
    async fn test_gatt_fallback_for_connectable_peer() {
        let (identity, registry) = fixtures();
        let other = clean_identity();
        let adapter = MockBleAdapter::powered(true);
        adapter.set_gatt_value(
            "dev-e",
            encode_ble_metadata(other.public_key(), "25055"),
        );

        let mut adv = advertisement("dev-e");
        adv.connectable = true;
        handle_advertisement(&*adapter, adv, &identity, &registry).await;

        assert_eq!(registry.len(), 1);
        let info = registry.list()[0].info();
        assert_eq!(info.ble_addr.as_deref(), Some("dev-e"));
        assert_eq!(info.port, "25055");
        assert_eq!(info.connection_types, vec![ConnectionType::Ble]);
        assert_eq!(info.primary, Some(ConnectionType::Ble));
    }

    #[tokio::test]
    async fn test_unconnectable_peer_without_metadata_skipped() {
        let (identity, registry) = fixtures();
        let adapter = MockBleAdapter::powered(true);
        handle_advertisement(&*adapter, advertisement("dev-f"), &identity, &registry).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_own_broadcast_discarded() {
        let (identity, registry) = fixtures();
        let adapter = MockBleAdapter::powered(true);

        let mut adv = advertisement("dev-self");
        adv.manufacturer_data = Some(encode_ble_metadata(identity.public_key(), "25042"));
        handle_advertisement(&*adapter, adv, &identity, &registry).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_source_end_to_end_with_mock_adapter() {
        let (identity, registry) = fixtures();
        let other = clean_identity();
        let adapter = MockBleAdapter::powered(true);
        let cancel = CancellationToken::new();

        let handle = spawn_ble_source(
            adapter.clone(),
            identity.clone(),
            25042,
            registry.clone(),
            cancel.clone(),
        );

        // Give the source a beat to register the scan channel.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(adapter.advertised_payload().is_some());
        assert_eq!(adapter.advertised_name().as_deref(), Some(BLE_ADVERTISE_NAME));

        let mut adv = advertisement("dev-g");
        adv.manufacturer_data = Some(encode_ble_metadata(other.public_key(), "25066"));
        adapter.inject(adv);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(registry.len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
