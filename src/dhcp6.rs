//! The DHCPv6 client (spec §4.5): SOLICIT/ADVERTISE/REQUEST/REPLY over a
//! UDP/IPv6 socket. Ground truth: `iothconf_dhcpv6.c`.

use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::dns;
use crate::error::{EngineError, Result};
use crate::stack::{MacAddr, SockAddr, Socket, SocketSpec, Stack};
use crate::store::{kind, Payload, Store};
use crate::wire::dhcpv6::{self, Message, MessageType, Reply};

const REPLY_TIMEOUT: Duration = Duration::from_millis(2000);
const MAX_ATTEMPTS: u32 = 3;

/// Seconds between the Unix epoch and 2000-01-01T00:00:00Z, the DUID-LLT
/// time base (RFC 8415 §11.2).
const DUID_EPOCH_OFFSET: u64 = 946_684_800;

static CLIENT_ID: OnceLock<[u8; 14]> = OnceLock::new();

/// Returns this process's DUID-LLT, computing and caching it from `mac` the
/// first time it is needed. A single DUID identifies the host across every
/// interface it configures, so only the first caller's MAC and the current
/// time end up embedded in it.
fn client_id(mac: MacAddr) -> &'static [u8; 14] {
    CLIENT_ID.get_or_init(|| {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let duid_time = now.saturating_sub(DUID_EPOCH_OFFSET) as u32;
        dhcpv6::client_id_llt(duid_time, mac.as_bytes())
    })
}

fn iaid_of(mac: MacAddr) -> [u8; 4] {
    let bytes = mac.as_bytes();
    [bytes[2], bytes[3], bytes[4], bytes[5]]
}

/// Runs a full SOLICIT/ADVERTISE/REQUEST/REPLY exchange on `ifindex` and,
/// on success, records the lease and reconciles it into the stack.
pub fn acquire(store: &Store, stack: &dyn Stack, ifindex: u32, fqdn: Option<&str>) -> Result<()> {
    let mac = stack.link_get_addr(ifindex)?;
    let client_id = *client_id(mac);
    let iaid = iaid_of(mac);
    let fqdn_wire = fqdn.map(dns::name_to_wire);

    let mut socket = stack.socket(SocketSpec::Udp6 { bind_port: dhcpv6::CLIENT_PORT })?;
    let tid: [u8; 3] = rand::thread_rng().gen();
    net_debug!("dhcpv6: soliciting on ifindex {ifindex} tid {:x?}", tid);

    let solicit = Message {
        msg_type: MessageType::Solicit,
        tid,
        client_id: &client_id,
        server_id: None,
        iaid,
        ia_addr: None,
        fqdn: fqdn_wire.as_deref(),
    };
    let advertise = send_until_reply(&mut *socket, &solicit, tid, iaid, |r| {
        r.msg_type == MessageType::Advertise && r.client_id == client_id
    })?
    .ok_or(EngineError::Timeout)?;
    net_debug!("dhcpv6: advertised by server-id {:x?}", advertise.server_id);

    let mut ia_addr = advertise.ia_na_options.clone();
    dhcpv6::zero_iaaddr_lifetimes(&mut ia_addr);
    let request = Message {
        msg_type: MessageType::Request,
        tid,
        client_id: &client_id,
        server_id: Some(&advertise.server_id),
        iaid,
        ia_addr: Some(&ia_addr),
        fqdn: fqdn_wire.as_deref(),
    };
    let reply = send_until_reply(&mut *socket, &request, tid, iaid, |r| r.msg_type == MessageType::Reply)?
        .ok_or(EngineError::Timeout)?;
    net_debug!("dhcpv6: replied with {} address(es)", reply.iaaddrs.len());

    record_lease(store, stack.id(), ifindex, &reply);
    crate::ip::update(store, stack, ifindex, kind::DHCP6_TIMESTAMP)?;
    Ok(())
}

/// Removes every DHCPv6 record for `ifindex` and tears down any address it
/// had installed.
pub fn clean(store: &Store, stack: &dyn Stack, ifindex: u32) -> std::io::Result<()> {
    crate::ip::clean(store, stack, ifindex, kind::DHCP6_TIMESTAMP)
}

fn send_until_reply(
    socket: &mut dyn Socket,
    message: &Message,
    tid: [u8; 3],
    iaid: [u8; 4],
    accept: impl Fn(&Reply) -> bool,
) -> Result<Option<Reply>> {
    let packet = message.emit();
    for attempt in 0..MAX_ATTEMPTS {
        net_trace!("dhcpv6: tx {:?} attempt {}", message.msg_type, attempt + 1);
        socket.send_to(&packet, &SockAddr::Ip6 { addr: dhcpv6::ALL_DHCP_SERVERS, port: dhcpv6::SERVER_PORT })?;
        let deadline = Instant::now() + REPLY_TIMEOUT;
        let mut buf = [0u8; dhcpv6::MAX_PACKET];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some((n, _from)) = socket.recv_timeout(&mut buf, remaining)? else {
                break;
            };
            let Ok(reply) = dhcpv6::parse(&buf[..n]) else {
                net_warn!("dhcpv6: dropping malformed packet");
                continue; // malformed: spurious packet, keep polling
            };
            net_trace!("dhcpv6: rx {:?} tid {:x?}", reply.msg_type, reply.tid);
            if reply.tid != tid || reply.iaid != Some(iaid) || !accept(&reply) {
                continue;
            }
            return Ok(Some(reply));
        }
    }
    Ok(None)
}

fn record_lease(store: &Store, stack: crate::store::StackId, ifindex: u32, reply: &Reply) {
    let ts = store.new_timestamp(stack, ifindex, kind::DHCP6_TIMESTAMP);

    if !reply.server_id.is_empty() {
        store.add(stack, ifindex, kind::DHCP6_SERVERID, ts, 0, Payload::ServerId(reply.server_id.clone()));
    }
    for iaaddr in &reply.iaaddrs {
        store.add(
            stack,
            ifindex,
            kind::DHCP6_ADDR,
            ts,
            0,
            Payload::Ipv6Addr(crate::store::Ipv6Record {
                addr: iaaddr.addr,
                prefixlen: 128,
                flags: 0,
                preferred_lifetime: iaaddr.preferred_lifetime,
                valid_lifetime: iaaddr.valid_lifetime,
            }),
        );
    }
    for dns in &reply.dns_servers {
        store.add(stack, ifindex, kind::DHCP6_DNS, ts, 0, Payload::Dns6(*dns));
    }
    if !reply.domain_list.is_empty() {
        let names = dns::parse_domain_list(&reply.domain_list);
        if !names.is_empty() {
            store.add(stack, ifindex, kind::DHCP6_DOMAIN, ts, 0, Payload::DomainList(names));
        }
    }
    store.write_timestamp(stack, ifindex, kind::DHCP6_TIMESTAMP, ts);
}
