//! The pluggable network-stack collaborator (spec §6). This crate is
//! polymorphic over it: every socket open, packet send/receive, MAC/link
//! operation, and address/route mutation goes through a [`Stack`]
//! implementation supplied by the caller. No concrete implementation ships
//! here — the real one (talking to a kernel netlink/ioctl surface, or to an
//! embedded `ioth`-style userspace stack) is out of scope (spec §1); tests
//! use [`crate::mock::MockStack`] instead (feature `testing`).

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use crate::store::StackId;

/// A 6-byte hardware (Ethernet) address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddr(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Which kind of socket a protocol client needs. Each client only ever
/// opens one of these, matching exactly the sockets the original acquires
/// in `iothconf_dhcp.c`/`iothconf_dhcpv6.c`/`iothconf_rd.c`.
#[derive(Debug, Clone, Copy)]
pub enum SocketSpec {
    /// `AF_PACKET`, `SOCK_DGRAM` (cooked), bound to `ifindex` and
    /// `ethertype`. The kernel supplies the Ethernet header from the
    /// destination address passed to `send_to`; the caller hand-builds
    /// everything from the IP header up. Used by the DHCPv4 client, which
    /// has no IP address yet to bind a socket-layer UDP socket to.
    LinkRaw { ifindex: u32, ethertype: u16 },
    /// `AF_INET6`, `SOCK_DGRAM`, `IPPROTO_UDP`, bound to `bind_port` on all
    /// addresses. Used by the DHCPv6 client.
    Udp6 { bind_port: u16 },
    /// `AF_INET6`, `SOCK_RAW`, `IPPROTO_ICMPV6`. Used by the router
    /// discovery client.
    RawIcmp6,
}

/// A destination/source socket address, abstracting over the handful of
/// address families this crate speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockAddr {
    /// Link-layer destination for a [`SocketSpec::LinkRaw`] socket: a MAC
    /// address on a given interface.
    Link { ifindex: u32, mac: MacAddr },
    /// An IPv6 address, with a UDP port (0 for `SocketSpec::RawIcmp6`).
    Ip6 {
        addr: std::net::Ipv6Addr,
        port: u16,
    },
}

/// An open socket, as handed back by [`Stack::socket`].
pub trait Socket: Send {
    /// Sends `buf` to `dest`.
    fn send_to(&mut self, buf: &[u8], dest: &SockAddr) -> std::io::Result<usize>;

    /// Waits up to `timeout` for a datagram. Returns `Ok(None)` on timeout
    /// with no data, matching `poll(2)` returning zero events; this is the
    /// only blocking point protocol clients use, and it runs outside the
    /// record store's lock (spec §5).
    fn recv_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::io::Result<Option<(usize, SockAddr)>>;

    /// Sets the outgoing IPv6 multicast hop limit (used by the router
    /// discovery client to send with hop limit 255, per RFC 4861).
    fn set_multicast_hops(&mut self, hops: u32) -> std::io::Result<()> {
        let _ = hops;
        Ok(())
    }
}

/// The external collaborator capability set (spec §6): a network stack
/// instance this crate configures.
pub trait Stack: Send + Sync {
    /// A value stable for the lifetime of this stack instance, used to
    /// partition the shared record store. Two distinct `Stack` values must
    /// never return the same id.
    fn id(&self) -> StackId;

    fn if_nametoindex(&self, name: &str) -> std::io::Result<u32>;

    fn link_get_addr(&self, ifindex: u32) -> std::io::Result<MacAddr>;
    fn link_set_addr(&self, ifindex: u32, mac: MacAddr) -> std::io::Result<()>;
    fn link_set_updown(&self, ifindex: u32, up: bool) -> std::io::Result<()>;

    fn ipaddr_add(&self, ifindex: u32, addr: IpAddr, prefixlen: u8) -> std::io::Result<()>;
    fn ipaddr_del(&self, ifindex: u32, addr: IpAddr, prefixlen: u8) -> std::io::Result<()>;
    /// Adds a default route via `gateway`.
    fn iproute_add(&self, ifindex: u32, gateway: IpAddr) -> std::io::Result<()>;
    /// Removes the default route via `gateway`.
    fn iproute_del(&self, ifindex: u32, gateway: IpAddr) -> std::io::Result<()>;

    fn socket(&self, spec: SocketSpec) -> std::io::Result<Box<dyn Socket>>;
}
