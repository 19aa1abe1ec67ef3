//! Transport availability monitor.
//!
//! Refreshes three cached booleans every second: BLE (adapter power
//! state), LAN (active IPv4 interface plus a working multicast socket)
//! and Internet (external connectivity probe). Each probe runs in its own
//! task so a panic or hang in one cannot pollute the others; BLE is
//! probed first and published immediately because it must keep working
//! when every IP transport is down. A query older than 500 ms forces a
//! fresh refresh before returning.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use whisker_shared::constants::{
    AVAILABILITY_INTERVAL, AVAILABILITY_STALENESS, INTERNET_PROBE_TIMEOUT, MULTICAST_GROUP,
};

use crate::discovery::ble::BleAdapter;
use crate::netutil;

/// Address the external connectivity probe connects to (DNS over TCP).
const INTERNET_PROBE_ADDR: (&str, u16) = ("8.8.8.8", 53);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvailableModes {
    pub ble: bool,
    pub lan: bool,
    pub internet: bool,
}

struct Cached {
    modes: AvailableModes,
    last_refresh: Option<Instant>,
}

pub struct AvailabilityMonitor {
    adapter: Arc<dyn BleAdapter>,
    port: u16,
    cached: Mutex<Cached>,
}

impl AvailabilityMonitor {
    pub fn new(adapter: Arc<dyn BleAdapter>, port: u16) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            port,
            cached: Mutex::new(Cached {
                modes: AvailableModes::default(),
                last_refresh: None,
            }),
        })
    }

    /// Periodic refresh task.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(AVAILABILITY_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => monitor.refresh().await,
                }
            }
            debug!("availability monitor stopped");
        })
    }

    /// Current `(ble, lan, internet)` flags, refreshing first when the
    /// cache is stale.
    pub async fn current(&self) -> AvailableModes {
        let stale = {
            let cached = self.cached.lock();
            match cached.last_refresh {
                Some(at) => at.elapsed() > AVAILABILITY_STALENESS,
                None => true,
            }
        };
        if stale {
            self.refresh().await;
        }
        self.cached.lock().modes
    }

    async fn refresh(&self) {
        let previous = self.cached.lock().modes;

        // BLE first, in isolation: publish before the slower IP probes run.
        let adapter = self.adapter.clone();
        let ble = tokio::task::spawn_blocking(move || adapter.is_powered_on())
            .await
            .unwrap_or(previous.ble);
        self.cached.lock().modes.ble = ble;

        let port = self.port;
        let lan = tokio::task::spawn_blocking(move || check_lan(port))
            .await
            .unwrap_or(previous.lan);

        let internet = tokio::spawn(check_internet())
            .await
            .unwrap_or(previous.internet);

        let mut cached = self.cached.lock();
        cached.modes.lan = lan;
        cached.modes.internet = internet;
        cached.last_refresh = Some(Instant::now());
        trace!(ble, lan, internet, "availability refreshed");
    }
}

/// LAN is usable iff some non-loopback interface holds an IPv4 address
/// *and* a test multicast socket can be both opened for listening and
/// dialed. Networks that block multicast (guest Wi-Fi, some corporate
/// APs) fail the second half.
fn check_lan(port: u16) -> bool {
    if !netutil::has_active_ipv4_interface() {
        return false;
    }
    let group: Ipv4Addr = match MULTICAST_GROUP.parse() {
        Ok(group) => group,
        Err(_) => return false,
    };
    if netutil::multicast_listen_socket(group, port).is_err() {
        return false;
    }
    match std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)) {
        Ok(socket) => socket.connect((group, port)).is_ok(),
        Err(_) => false,
    }
}

/// Direct TCP connect probe instead of shelling out to `ping`.
async fn check_internet() -> bool {
    matches!(
        tokio::time::timeout(INTERNET_PROBE_TIMEOUT, TcpStream::connect(INTERNET_PROBE_ADDR)).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ble::NullBleAdapter;

    #[tokio::test]
    async fn test_query_forces_refresh_when_never_refreshed() {
        let monitor = AvailabilityMonitor::new(Arc::new(NullBleAdapter), 25092);
        let modes = monitor.current().await;
        // Null adapter is always powered off.
        assert!(!modes.ble);
        assert!(monitor.cached.lock().last_refresh.is_some());
    }

    #[tokio::test]
    async fn test_ble_flag_follows_adapter() {
        use crate::discovery::ble::mock::MockBleAdapter;

        let adapter = MockBleAdapter::powered(true);
        let monitor = AvailabilityMonitor::new(adapter.clone(), 25093);
        assert!(monitor.current().await.ble);

        adapter.set_powered(false);
        // Cache may still be warm; wait out the staleness window.
        tokio::time::sleep(AVAILABILITY_STALENESS + std::time::Duration::from_millis(50)).await;
        assert!(!monitor.current().await.ble);
    }

    #[tokio::test]
    async fn test_fresh_cache_not_reprobed() {
        let monitor = AvailabilityMonitor::new(Arc::new(NullBleAdapter), 25094);
        monitor.refresh().await;
        let first = monitor.cached.lock().last_refresh;
        let _ = monitor.current().await;
        assert_eq!(first, monitor.cached.lock().last_refresh);
    }
}
