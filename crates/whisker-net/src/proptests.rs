//! Property-based tests for the peer registry invariants:
//!
//! - Every record's ID is the hash of its public key.
//! - Connection types accumulate as a set union with a priority-minimal
//!   primary, and already-set fields are never overwritten.
//! - The node's own identity never enters the map, and listings are
//!   always sorted.

use std::net::Ipv4Addr;

use proptest::prelude::*;

use whisker_shared::identity::peer_id_from_public_key;
use whisker_shared::types::{ConnectionType, Observation};

use crate::registry::PeerRegistry;

const LOCAL_KEY: [u8; 32] = [0xee; 32];

fn transport_strategy() -> impl Strategy<Value = ConnectionType> {
    prop_oneof![
        Just(ConnectionType::Ble),
        Just(ConnectionType::Lan),
        Just(ConnectionType::Internet),
    ]
}

fn observation_strategy() -> impl Strategy<Value = Observation> {
    (
        prop_oneof![
            4 => prop::sample::select(vec![[1u8; 32], [2u8; 32], [3u8; 32], LOCAL_KEY]),
            1 => prop::array::uniform32(any::<u8>()),
        ],
        prop::option::of(any::<u32>().prop_map(Ipv4Addr::from)),
        prop_oneof![Just(String::new()), Just("25042".to_string()), Just("9".to_string())],
        prop::option::of(Just("aa:bb:cc:dd:ee:ff".to_string())),
        transport_strategy(),
    )
        .prop_map(|(key, address_ip, port, ble_addr, transport)| Observation {
            public_key: Some(key),
            port,
            address_ip,
            ble_addr,
            transport,
        })
}

proptest! {
    #[test]
    fn registry_invariants_hold_for_any_observation_sequence(
        observations in prop::collection::vec(observation_strategy(), 0..40)
    ) {
        let local_id = peer_id_from_public_key(&LOCAL_KEY);
        let registry = PeerRegistry::new(local_id.clone());

        for observation in &observations {
            registry.add(observation.clone());
        }

        let records = registry.list();

        // Own peer ID never inserted.
        prop_assert!(records.iter().all(|r| r.peer_id() != &local_id));

        // Sorted ascending by peer ID.
        let ids: Vec<_> = records.iter().map(|r| r.peer_id().clone()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        prop_assert_eq!(&ids, &sorted);

        for record in &records {
            let info = record.info();

            // ID is the hash of the stored key.
            prop_assert_eq!(
                record.peer_id(),
                &peer_id_from_public_key(&info.public_key)
            );

            // Connection types are the union of this peer's observed tags,
            // insertion-order preserved and duplicate-free.
            let expected: Vec<ConnectionType> = {
                let mut seen = Vec::new();
                for obs in &observations {
                    if obs.public_key == Some(info.public_key)
                        && !seen.contains(&obs.transport)
                    {
                        seen.push(obs.transport);
                    }
                }
                seen
            };
            prop_assert_eq!(&info.connection_types, &expected);

            // Primary is the priority-minimal member.
            prop_assert_eq!(info.primary, info.connection_types.iter().min().copied());

            // First non-empty observed value wins and is never replaced.
            let first_ip = observations
                .iter()
                .filter(|o| o.public_key == Some(info.public_key))
                .find_map(|o| o.address_ip);
            prop_assert_eq!(info.address_ip, first_ip);

            let first_port = observations
                .iter()
                .filter(|o| o.public_key == Some(info.public_key))
                .map(|o| o.port.clone())
                .find(|p| !p.is_empty())
                .unwrap_or_default();
            prop_assert_eq!(&info.port, &first_port);
        }
    }
}
