//! Two in-process nodes sharing one multicast port discover each other
//! through real beacons.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use whisker_net::discovery::lan::spawn_lan_discovery;
use whisker_net::registry::PeerRegistry;
use whisker_shared::identity::Identity;
use whisker_shared::types::ConnectionType;

fn node() -> (Arc<Identity>, Arc<PeerRegistry>) {
    // Keys containing the beacon delimiter cannot round-trip the wire
    // format; regenerate until clean so the pair always sees each other.
    let identity = loop {
        let identity = Identity::generate().unwrap();
        if !identity.public_key().contains(&b':') {
            break Arc::new(identity);
        }
    };
    let registry = Arc::new(PeerRegistry::new(identity.peer_id().clone()));
    (identity, registry)
}

#[tokio::test]
#[ignore = "needs a multicast-capable network interface"]
async fn test_lan_pair_discovers_each_other() {
    const PORT: u16 = 25071;
    let cancel = CancellationToken::new();

    let (id_a, reg_a) = node();
    let (id_b, reg_b) = node();

    let a = spawn_lan_discovery(id_a.clone(), PORT, reg_a.clone(), cancel.clone());
    let b = spawn_lan_discovery(id_b.clone(), PORT, reg_b.clone(), cancel.clone());

    // Beacons go out every second; give each side two rounds.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if reg_a.len() == 1 && reg_b.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(reg_a.len(), 1, "node A saw no peer");
    assert_eq!(reg_b.len(), 1, "node B saw no peer");

    // Each side holds the other, tagged LAN — and never itself.
    let seen_by_a = &reg_a.list()[0];
    assert_eq!(seen_by_a.peer_id(), id_b.peer_id());
    assert_eq!(seen_by_a.info().connection_types, vec![ConnectionType::Lan]);

    let seen_by_b = &reg_b.list()[0];
    assert_eq!(seen_by_b.peer_id(), id_a.peer_id());
    assert!(seen_by_b.info().address_ip.is_some());

    cancel.cancel();
    let _ = a.await;
    let _ = b.await;
}
