//! The DHCPv4 client (spec §4.3): DISCOVER/OFFER/REQUEST/ACK over a raw
//! link-layer socket, since no address exists yet to bind a UDP socket to.
//! Ground truth: `iothconf_dhcp.c`.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{EngineError, Result};
use crate::stack::{MacAddr, SockAddr, Socket, SocketSpec, Stack};
use crate::store::{kind, Payload, Store};
use crate::wire::dhcpv4::{self, Message, MessageType, Reply};

const ETHERTYPE_IPV4: u16 = 0x0800;
const REPLY_TIMEOUT: Duration = Duration::from_millis(2000);
const MAX_ATTEMPTS: u32 = 3;

/// Runs a full DISCOVER/OFFER/REQUEST/ACK exchange on `ifindex` and, on
/// success, records the lease and reconciles it into the stack.
pub fn acquire(store: &Store, stack: &dyn Stack, ifindex: u32, fqdn: Option<&str>) -> Result<()> {
    let mac = stack.link_get_addr(ifindex)?;
    let mut socket = stack.socket(SocketSpec::LinkRaw { ifindex, ethertype: ETHERTYPE_IPV4 })?;
    let xid: [u8; 4] = rand::thread_rng().gen();
    net_debug!("dhcpv4: discovering on ifindex {ifindex} xid {:x?}", xid);

    let discover = Message {
        msg_type: MessageType::Discover,
        xid,
        client_mac: *mac.as_bytes(),
        ciaddr: None,
        siaddr: None,
        requested_ip: None,
        server_id: None,
        fqdn,
    };
    let offer = send_until_reply(&mut *socket, ifindex, &discover, xid, |r| r.msg_type == MessageType::Offer)?
        .ok_or(EngineError::Timeout)?;
    net_debug!("dhcpv4: offered {} by server {:?}", offer.yiaddr, offer.server_id);

    let request = Message {
        msg_type: MessageType::Request,
        xid,
        client_mac: *mac.as_bytes(),
        ciaddr: Some(offer.yiaddr),
        siaddr: offer.server_id,
        requested_ip: Some(offer.yiaddr),
        server_id: offer.server_id,
        fqdn,
    };
    let ack = send_until_reply(&mut *socket, ifindex, &request, xid, |r| {
        matches!(r.msg_type, MessageType::Ack | MessageType::Nak)
    })?
    .ok_or(EngineError::Timeout)?;

    match ack.msg_type {
        MessageType::Nak => {
            net_debug!("dhcpv4: request for {} NAKed", offer.yiaddr);
            return Err(EngineError::Cancelled);
        }
        MessageType::Ack => net_debug!("dhcpv4: acked {}", ack.yiaddr),
        _ => return Err(EngineError::Protocol("expected DHCPACK or DHCPNAK")),
    }

    record_lease(store, stack.id(), ifindex, &ack);
    crate::ip::update(store, stack, ifindex, kind::DHCP4_TIMESTAMP)?;
    Ok(())
}

/// Removes every DHCPv4 record for `ifindex` and tears down any address or
/// route it had installed.
pub fn clean(store: &Store, stack: &dyn Stack, ifindex: u32) -> std::io::Result<()> {
    crate::ip::clean(store, stack, ifindex, kind::DHCP4_TIMESTAMP)
}

fn send_until_reply(
    socket: &mut dyn Socket,
    ifindex: u32,
    message: &Message,
    xid: [u8; 4],
    accept: impl Fn(&Reply) -> bool,
) -> Result<Option<Reply>> {
    let packet = message.emit();
    for attempt in 0..MAX_ATTEMPTS {
        net_trace!("dhcpv4: tx {:?} attempt {}", message.msg_type, attempt + 1);
        socket.send_to(&packet, &SockAddr::Link { ifindex, mac: MacAddr::BROADCAST })?;
        let deadline = Instant::now() + REPLY_TIMEOUT;
        let mut buf = [0u8; dhcpv4::MAX_PACKET];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some((n, _from)) = socket.recv_timeout(&mut buf, remaining)? else {
                break;
            };
            let Ok(reply) = dhcpv4::parse(&buf[..n]) else {
                net_warn!("dhcpv4: dropping malformed packet");
                continue; // malformed: spurious packet, keep polling
            };
            net_trace!("dhcpv4: rx {:?} xid {:x?}", reply.msg_type, reply.xid);
            if reply.xid != xid || !accept(&reply) {
                continue;
            }
            return Ok(Some(reply));
        }
    }
    Ok(None)
}

fn record_lease(store: &Store, stack: crate::store::StackId, ifindex: u32, ack: &Reply) {
    let ts = store.new_timestamp(stack, ifindex, kind::DHCP4_TIMESTAMP);
    let leasetime = ack.leasetime.unwrap_or(crate::store::INFINITE_LIFETIME);
    let prefixlen = ack.prefixlen.unwrap_or(24);

    if let Some(server_id) = ack.server_id {
        store.add(stack, ifindex, kind::DHCP4_SERVER, ts, 0, Payload::Server4(server_id));
    }
    store.add(
        stack,
        ifindex,
        kind::DHCP4_ADDR,
        ts,
        0,
        Payload::Ipv4Addr(crate::store::Ipv4Record { addr: ack.yiaddr, prefixlen, leasetime }),
    );
    for router in &ack.routers {
        store.add(stack, ifindex, kind::DHCP4_ROUTER, ts, 0, Payload::Ipv4Gateway(*router));
    }
    for dns in &ack.dns {
        store.add(stack, ifindex, kind::DHCP4_DNS, ts, 0, Payload::Dns4(*dns));
    }
    if let Some(domain) = &ack.domain {
        store.add(stack, ifindex, kind::DHCP4_DOMAIN, ts, 0, Payload::Domain(domain.clone()));
    }
    store.write_timestamp(stack, ifindex, kind::DHCP4_TIMESTAMP, ts);
}
