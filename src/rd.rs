//! The IPv6 Router Discovery client (spec §4.6): a single Router
//! Solicitation, one Router Advertisement, and optional SLAAC address
//! synthesis. Ground truth: `iothconf_rd.c`.
//!
//! Unlike DHCPv4/DHCPv6, there is no retry loop here: a single
//! solicitation is sent and the client waits once for a reply (spec §4.6,
//! §7 — "no retries are performed").

use std::net::Ipv6Addr;
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::hash;
use crate::stack::{MacAddr, SockAddr, SocketSpec, Stack};
use crate::store::{kind, Payload, Store};
use crate::wire::rd;

/// All-routers multicast address. Spec §9's Open Question resolves the
/// original's `ff02::1:2` (DHCPv6's multicast group, likely a copy-paste
/// bug) to the correct all-routers group here.
const ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);
const REPLY_TIMEOUT: Duration = Duration::from_millis(1000);
const MULTICAST_HOPS: u32 = 255;

/// Sends a Router Solicitation on `ifindex` and waits once for a Router
/// Advertisement. `fqdn` and `slaac` control SLAAC address synthesis per
/// spec §4.6: a /64 prefix with the `A` flag set (or any prefix, if `fqdn`
/// is given) yields an RD6_ADDR record, hashed from `fqdn` if known,
/// otherwise built as an EUI-64 from the interface MAC.
pub fn acquire(store: &Store, stack: &dyn Stack, ifindex: u32, fqdn: Option<&str>, slaac: bool) -> Result<()> {
    let mac = stack.link_get_addr(ifindex)?;
    let mut socket = stack.socket(SocketSpec::RawIcmp6)?;
    socket.set_multicast_hops(MULTICAST_HOPS)?;

    net_debug!("rd: soliciting on ifindex {ifindex}");
    let solicit = rd::solicit(mac.as_bytes());
    socket.send_to(&solicit, &SockAddr::Ip6 { addr: ALL_ROUTERS, port: 0 })?;

    let mut buf = [0u8; 1280];
    let (router, advert) = loop {
        let Some((n, from)) = socket.recv_timeout(&mut buf, REPLY_TIMEOUT)? else {
            return Err(EngineError::Timeout);
        };
        let Ok(advert) = rd::parse(&buf[..n]) else {
            net_warn!("rd: dropping malformed or non-advertisement packet");
            continue; // malformed or non-RA: spurious, keep the remaining budget
        };
        let router_addr = match from {
            SockAddr::Ip6 { addr, .. } => addr,
            SockAddr::Link { .. } => continue,
        };
        net_trace!("rd: rx advertisement from {router_addr} with {} prefix(es)", advert.prefixes.len());
        break (router_addr, advert);
    };

    net_debug!("rd: advertised by router {router}, lifetime {}s", advert.router_lifetime);
    record_advertisement(store, stack.id(), ifindex, mac, router, &advert, fqdn, slaac);
    crate::ip::update(store, stack, ifindex, kind::RD6_TIMESTAMP)?;
    Ok(())
}

/// Removes every RD record for `ifindex` and tears down any address or
/// route it had installed.
pub fn clean(store: &Store, stack: &dyn Stack, ifindex: u32) -> std::io::Result<()> {
    crate::ip::clean(store, stack, ifindex, kind::RD6_TIMESTAMP)
}

fn record_advertisement(
    store: &Store,
    stack: crate::store::StackId,
    ifindex: u32,
    mac: MacAddr,
    router: Ipv6Addr,
    advert: &rd::Advertisement,
    fqdn: Option<&str>,
    slaac: bool,
) {
    let ts = store.new_timestamp(stack, ifindex, kind::RD6_TIMESTAMP);

    store.add(
        stack,
        ifindex,
        kind::RD6_ROUTER,
        ts,
        0,
        Payload::Ipv6Meta(crate::store::Ipv6Record {
            addr: router,
            prefixlen: 128,
            flags: advert.flags,
            preferred_lifetime: 0,
            valid_lifetime: advert.router_lifetime as u32,
        }),
    );

    for prefix in &advert.prefixes {
        store.add(
            stack,
            ifindex,
            kind::RD6_PREFIX,
            ts,
            0,
            Payload::Ipv6Meta(crate::store::Ipv6Record {
                addr: prefix.prefix,
                prefixlen: prefix.prefixlen,
                flags: prefix.flags,
                preferred_lifetime: prefix.preferred_lifetime,
                valid_lifetime: prefix.valid_lifetime,
            }),
        );

        let autonomous = prefix.flags & rd::prefix_flags::AUTONOMOUS != 0;
        if slaac && prefix.prefixlen == 64 && (autonomous || fqdn.is_some()) {
            let addr = match fqdn {
                Some(name) => hash::hashaddr6(prefix.prefix, name),
                None => hash::eui64(prefix.prefix, mac),
            };
            store.add(
                stack,
                ifindex,
                kind::RD6_ADDR,
                ts,
                0,
                Payload::Ipv6Addr(crate::store::Ipv6Record {
                    addr,
                    prefixlen: 64,
                    flags: prefix.flags,
                    preferred_lifetime: prefix.preferred_lifetime,
                    valid_lifetime: prefix.valid_lifetime,
                }),
            );
        }
    }

    if let Some(mtu) = advert.mtu {
        store.add(stack, ifindex, kind::RD6_MTU, ts, 0, Payload::Mtu(mtu));
    }

    store.write_timestamp(stack, ifindex, kind::RD6_TIMESTAMP, ts);
}
