//! Property-based tests for the shared primitives:
//!
//! - Peer IDs are a deterministic 32-hex-char function of the public key.
//! - Beacon and BLE metadata parsing accept exactly what encoding produces
//!   (modulo delimiter collisions, which must be *rejected*, never
//!   misparsed).
//! - Post-handshake frames decrypt to the sent plaintexts in send order,
//!   and any single-byte tamper kills the session.

use proptest::prelude::*;

use crate::identity::{peer_id_from_public_key, Identity};
use crate::session::SessionCipher;
use crate::wire::{encode_beacon, encode_ble_metadata, parse_beacon, parse_ble_metadata};

proptest! {
    #[test]
    fn peer_id_is_32_lowercase_hex(key in prop::array::uniform32(any::<u8>())) {
        let id = peer_id_from_public_key(&key);
        prop_assert_eq!(id.as_str().len(), 32);
        prop_assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        prop_assert_eq!(id, peer_id_from_public_key(&key));
    }

    #[test]
    fn beacon_roundtrip_or_clean_rejection(
        key in prop::array::uniform32(any::<u8>()),
        port in 1u16..=u16::MAX,
    ) {
        let port = port.to_string();
        let beacon = encode_beacon(&key, &port);
        match parse_beacon(&beacon) {
            Ok((parsed_key, parsed_port)) => {
                prop_assert_eq!(parsed_key, key);
                prop_assert_eq!(parsed_port, port);
            }
            Err(_) => {
                // Only a delimiter collision inside the raw key may make
                // an encoded beacon unparseable.
                prop_assert!(key.contains(&b':'));
            }
        }
    }

    #[test]
    fn ble_metadata_roundtrip_or_clean_rejection(
        key in prop::array::uniform32(any::<u8>()),
        port in 1u16..=u16::MAX,
    ) {
        let port = port.to_string();
        let payload = encode_ble_metadata(&key, &port);
        match parse_ble_metadata(&payload) {
            Ok((parsed_key, parsed_port)) => {
                prop_assert_eq!(parsed_key, key);
                prop_assert_eq!(parsed_port, port);
            }
            Err(_) => prop_assert!(key.contains(&b'|')),
        }
    }

    #[test]
    fn transport_preserves_order(
        texts in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..8)
    ) {
        let a = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        let mut init = SessionCipher::initiator(a.private_key()).unwrap();
        let mut resp = SessionCipher::responder(b.private_key()).unwrap();

        let m1 = init.write(&[]).unwrap();
        resp.read(&m1).unwrap();
        let m2 = resp.write(&[]).unwrap();
        init.read(&m2).unwrap();
        let m3 = init.write(&[]).unwrap();
        resp.read(&m3).unwrap();

        for text in &texts {
            let frame = init.write(text).unwrap();
            let plain = resp.read(&frame).unwrap();
            prop_assert_eq!(&plain, text);
        }
    }

    #[test]
    fn tampered_frame_kills_session(
        text in prop::collection::vec(any::<u8>(), 1..128),
        flip_bit in 0usize..8,
    ) {
        let a = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        let mut init = SessionCipher::initiator(a.private_key()).unwrap();
        let mut resp = SessionCipher::responder(b.private_key()).unwrap();

        let m1 = init.write(&[]).unwrap();
        resp.read(&m1).unwrap();
        let m2 = resp.write(&[]).unwrap();
        init.read(&m2).unwrap();
        let m3 = init.write(&[]).unwrap();
        resp.read(&m3).unwrap();

        let mut frame = init.write(&text).unwrap();
        let idx = frame.len() - 1 - (flip_bit % frame.len());
        frame[idx] ^= 1 << (flip_bit as u8 % 8);

        prop_assert!(resp.read(&frame).is_err());
        prop_assert!(resp.is_failed());
    }
}
