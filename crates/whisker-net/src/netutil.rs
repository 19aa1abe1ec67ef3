//! Small network helpers shared by discovery and availability probing.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};

/// First non-loopback IPv4 address of any interface that is up.
pub fn first_non_loopback_ipv4() -> Option<Ipv4Addr> {
    let interfaces = if_addrs::get_if_addrs().ok()?;
    interfaces.into_iter().find_map(|iface| {
        if iface.is_loopback() {
            return None;
        }
        match iface.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        }
    })
}

/// Whether the host has any non-loopback interface with an IPv4 address.
pub fn has_active_ipv4_interface() -> bool {
    first_non_loopback_ipv4().is_some()
}

/// Open a UDP socket bound to `0.0.0.0:<port>` that has joined `group`,
/// with address reuse so several nodes (and the liveness self-test) can
/// share the port on one host.
pub fn multicast_listen_socket(group: Ipv4Addr, port: u16) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_loop_v4(true)?;
    Ok(socket)
}
