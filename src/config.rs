//! The configuration orchestrator (spec §4.8): parses a directive string,
//! sequences cleans and acquisitions across the four sources plus the
//! Ethernet stage, and applies static directives directly against the
//! record store. Ground truth: `iothconf.c`'s `iothconf_conf`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{EngineError, Result};
use crate::stack::{MacAddr, Stack};
use crate::store::{kind, Action, Payload, Store};
use crate::{dhcp4, dhcp6, eth, rd};

/// Bits of the bitmask [`apply`] returns on success (spec §6).
pub mod bits {
    pub const STATIC: u32 = 1;
    pub const ETH: u32 = 2;
    pub const DHCP4: u32 = 4;
    pub const DHCP6: u32 = 8;
    pub const RD: u32 = 16;
}

const DEFAULT_IFACE: &str = "vde0";
const DEFAULT_PREFIX4: u8 = 24;
const DEFAULT_PREFIX6: u8 = 64;

#[derive(Default, Clone, Copy)]
struct Sources {
    eth: bool,
    dhcp4: bool,
    dhcp6: bool,
    rd: bool,
}

enum StaticOp {
    Add(u8, Payload),
    Remove(u8, Payload),
}

#[derive(Default)]
struct Directive {
    iface: Option<String>,
    ifindex: Option<u32>,
    fqdn: Option<String>,
    mac: Option<MacAddr>,
    acquire: Sources,
    clean: Sources,
    clean_static: bool,
    slaac: bool,
    debug: bool,
    static_ops: Vec<StaticOp>,
}

/// Parses and applies a directive string (spec §4.8) against `ifindex`
/// (resolved from `iface=`/`ifindex=`, default interface `vde0`).
///
/// Returns the success bitmask on a well-formed directive even if every
/// individual source failed (spec §7: a failed protocol exchange omits its
/// bit rather than failing the call); only a malformed directive or an
/// unresolvable interface name surfaces as an error.
pub fn apply(store: &Store, stack: &dyn Stack, directive: &str) -> Result<u32> {
    let parsed = parse(directive)?;

    let ifindex = match parsed.ifindex {
        Some(idx) => idx,
        None => {
            let name = parsed.iface.as_deref().unwrap_or(DEFAULT_IFACE);
            stack.if_nametoindex(name).map_err(|_| EngineError::NoDevice)?
        }
    };

    if parsed.clean_static {
        let _ = crate::ip::clean(store, stack, ifindex, kind::STATIC_TIMESTAMP);
    }
    if parsed.clean.rd {
        let _ = rd::clean(store, stack, ifindex);
    }
    if parsed.clean.dhcp6 {
        let _ = dhcp6::clean(store, stack, ifindex);
    }
    if parsed.clean.dhcp4 {
        let _ = dhcp4::clean(store, stack, ifindex);
    }
    if parsed.clean.eth {
        let _ = eth::clean(stack, ifindex);
    }

    let mut mask = 0u32;
    if parsed.acquire.eth && eth::configure(stack, ifindex, parsed.mac, parsed.fqdn.as_deref()).is_ok() {
        mask |= bits::ETH;
    }
    if parsed.acquire.rd && rd::acquire(store, stack, ifindex, parsed.fqdn.as_deref(), parsed.slaac).is_ok() {
        mask |= bits::RD;
    }
    if parsed.acquire.dhcp6 && dhcp6::acquire(store, stack, ifindex, parsed.fqdn.as_deref()).is_ok() {
        mask |= bits::DHCP6;
    }
    if parsed.acquire.dhcp4 && dhcp4::acquire(store, stack, ifindex, parsed.fqdn.as_deref()).is_ok() {
        mask |= bits::DHCP4;
    }
    if !parsed.static_ops.is_empty() && apply_static(store, stack, ifindex, parsed.static_ops).is_ok() {
        mask |= bits::STATIC;
    }

    if parsed.debug {
        dump(store, stack.id(), ifindex);
    }

    Ok(mask)
}

/// Applies every static add/remove directive against the store under one
/// freshly minted static-section timestamp, then reconciles that section
/// (spec §4.8 step 4). A record not re-asserted in this call keeps its
/// prior, now-stale timestamp and falls to the reconciler, same as any
/// other source's un-refreshed record (spec §3's I3).
fn apply_static(store: &Store, stack: &dyn Stack, ifindex: u32, ops: Vec<StaticOp>) -> std::io::Result<()> {
    let id = stack.id();
    let ts = store.new_timestamp(id, ifindex, kind::STATIC_TIMESTAMP);
    for op in ops {
        match op {
            StaticOp::Add(rtype, payload) => store.add(id, ifindex, rtype, ts, 0, payload),
            StaticOp::Remove(rtype, payload) => remove_matching(store, id, ifindex, rtype, &payload),
        }
    }
    store.write_timestamp(id, ifindex, kind::STATIC_TIMESTAMP, ts);
    crate::ip::update(store, stack, ifindex, kind::STATIC_TIMESTAMP)
}

fn remove_matching(store: &Store, stack: crate::store::StackId, ifindex: u32, rtype: u8, payload: &Payload) {
    store.forall(Some(stack), ifindex, rtype, |r| {
        if r.payload() == payload {
            Action::Delete
        } else {
            Action::Keep
        }
    });
}

fn parse(directive: &str) -> Result<Directive> {
    let mut d = Directive::default();
    for token in directive.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let (tag, arg) = match token.split_once('=') {
            Some((tag, arg)) => (tag.trim(), Some(arg.trim())),
            None => (token, None),
        };
        let tag_lc = tag.to_ascii_lowercase();
        apply_tag(&mut d, &tag_lc, arg)?;
    }
    Ok(d)
}

fn require_arg<'a>(tag: &str, arg: Option<&'a str>) -> Result<&'a str> {
    arg.filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::InvalidDirective(format!("'{tag}' requires an argument")))
}

fn apply_tag(d: &mut Directive, tag: &str, arg: Option<&str>) -> Result<()> {
    match tag {
        "iface" => d.iface = Some(require_arg(tag, arg)?.to_string()),
        "ifindex" => {
            let n: u32 = require_arg(tag, arg)?
                .parse()
                .map_err(|_| EngineError::InvalidDirective("ifindex must be a number".into()))?;
            d.ifindex = Some(n);
        }
        "fqdn" => d.fqdn = Some(require_arg(tag, arg)?.to_string()),
        "mac" | "macaddr" => d.mac = Some(parse_mac(require_arg(tag, arg)?)?),

        "eth" => d.acquire.eth = true,
        "dhcp" | "dhcp4" | "dhcpv4" => d.acquire.dhcp4 = true,
        "dhcp6" | "dhcpv6" => d.acquire.dhcp6 = true,
        "rd" | "rd6" => d.acquire.rd = true,
        "slaac" => d.slaac = true,
        "auto" => {
            d.acquire = Sources { eth: true, dhcp4: true, dhcp6: true, rd: true };
            d.slaac = true;
        }
        "auto4" | "autov4" => {
            d.acquire.eth = true;
            d.acquire.dhcp4 = true;
        }
        "auto6" | "autov6" => {
            d.acquire.eth = true;
            d.acquire.dhcp6 = true;
            d.acquire.rd = true;
            d.slaac = true;
        }

        "-eth" => d.clean.eth = true,
        "-dhcp" | "-dhcp4" | "-dhcpv4" => d.clean.dhcp4 = true,
        "-dhcp6" | "-dhcpv6" => d.clean.dhcp6 = true,
        "-rd" | "-rd6" => d.clean.rd = true,
        "-static" => d.clean_static = true,
        "-auto" => {
            d.clean = Sources { eth: true, dhcp4: true, dhcp6: true, rd: true };
            d.clean_static = true;
        }
        "-auto4" | "-autov4" => {
            d.clean.eth = true;
            d.clean.dhcp4 = true;
        }
        "-auto6" | "-autov6" => {
            d.clean.eth = true;
            d.clean.dhcp6 = true;
            d.clean.rd = true;
        }
        "-all" => {
            d.clean = Sources { eth: true, dhcp4: true, dhcp6: true, rd: true };
            d.clean_static = true;
        }

        "ip" => push_ip(d, require_arg(tag, arg)?, false)?,
        "-ip" => push_ip(d, require_arg(tag, arg)?, true)?,
        "gw" => push_gw(d, require_arg(tag, arg)?, false)?,
        "-gw" => push_gw(d, require_arg(tag, arg)?, true)?,
        "dns" => push_dns(d, require_arg(tag, arg)?, false)?,
        "-dns" => push_dns(d, require_arg(tag, arg)?, true)?,
        "domain" => d.static_ops.push(StaticOp::Add(kind::STATIC_DOMAIN, Payload::Domain(require_arg(tag, arg)?.to_string()))),
        "-domain" => d.static_ops.push(StaticOp::Remove(kind::STATIC_DOMAIN, Payload::Domain(require_arg(tag, arg)?.to_string()))),

        "debug" => d.debug = true,

        // Accepted only by the (out-of-scope) stack-creation entry point,
        // never here (spec §4.8).
        "stack" | "vnl" => {
            return Err(EngineError::InvalidDirective(format!("'{tag}' is only valid at stack creation")))
        }

        other => return Err(EngineError::InvalidDirective(format!("unknown directive '{other}'"))),
    }
    Ok(())
}

fn parse_mac(s: &str) -> Result<MacAddr> {
    let mut bytes = [0u8; 6];
    let mut parts = s.split(':');
    for byte in &mut bytes {
        let part = parts.next().ok_or_else(|| EngineError::InvalidDirective("malformed MAC address".into()))?;
        *byte = u8::from_str_radix(part, 16).map_err(|_| EngineError::InvalidDirective("malformed MAC address".into()))?;
    }
    if parts.next().is_some() {
        return Err(EngineError::InvalidDirective("malformed MAC address".into()));
    }
    Ok(MacAddr::new(bytes))
}

fn parse_addr_prefix(s: &str) -> Result<(IpAddr, Option<u8>)> {
    match s.split_once('/') {
        Some((addr, prefix)) => {
            let addr: IpAddr = addr.parse().map_err(|_| EngineError::InvalidDirective(format!("bad address '{addr}'")))?;
            let prefix: u8 = prefix.parse().map_err(|_| EngineError::InvalidDirective(format!("bad prefix '{prefix}'")))?;
            Ok((addr, Some(prefix)))
        }
        None => {
            let addr: IpAddr = s.parse().map_err(|_| EngineError::InvalidDirective(format!("bad address '{s}'")))?;
            Ok((addr, None))
        }
    }
}

fn push_ip(d: &mut Directive, arg: &str, remove: bool) -> Result<()> {
    let (addr, prefix) = parse_addr_prefix(arg)?;
    let op = match addr {
        IpAddr::V4(addr) => {
            let prefixlen = prefix.unwrap_or(DEFAULT_PREFIX4);
            let payload = Payload::Ipv4Addr(crate::store::Ipv4Record {
                addr,
                prefixlen,
                leasetime: crate::store::INFINITE_LIFETIME,
            });
            (kind::STATIC4_ADDR, payload)
        }
        IpAddr::V6(addr) => {
            let prefixlen = prefix.unwrap_or(DEFAULT_PREFIX6);
            let payload = Payload::Ipv6Addr(crate::store::Ipv6Record {
                addr,
                prefixlen,
                flags: 0,
                preferred_lifetime: crate::store::INFINITE_LIFETIME,
                valid_lifetime: crate::store::INFINITE_LIFETIME,
            });
            (kind::STATIC6_ADDR, payload)
        }
    };
    d.static_ops.push(if remove { StaticOp::Remove(op.0, op.1) } else { StaticOp::Add(op.0, op.1) });
    Ok(())
}

fn push_gw(d: &mut Directive, arg: &str, remove: bool) -> Result<()> {
    let addr: IpAddr = arg.parse().map_err(|_| EngineError::InvalidDirective(format!("bad address '{arg}'")))?;
    let op = match addr {
        IpAddr::V4(a) => (kind::STATIC4_ROUTE, Payload::Ipv4Gateway(a)),
        IpAddr::V6(a) => (kind::STATIC6_ROUTE, Payload::Ipv6Gateway(a)),
    };
    d.static_ops.push(if remove { StaticOp::Remove(op.0, op.1) } else { StaticOp::Add(op.0, op.1) });
    Ok(())
}

fn push_dns(d: &mut Directive, arg: &str, remove: bool) -> Result<()> {
    let addr: IpAddr = arg.parse().map_err(|_| EngineError::InvalidDirective(format!("bad address '{arg}'")))?;
    let op = match addr {
        IpAddr::V4(a) => (kind::STATIC4_DNS, Payload::Dns4(a)),
        IpAddr::V6(a) => (kind::STATIC6_DNS, Payload::Dns6(a)),
    };
    d.static_ops.push(if remove { StaticOp::Remove(op.0, op.1) } else { StaticOp::Add(op.0, op.1) });
    Ok(())
}

/// Dumps every record for `ifindex` to stderr, one line per record: a
/// three-letter type mnemonic, the timestamp rendered as `YYYYMMDD HHMMSS
/// UTC`, the flags byte, a payload length, and a pretty-printed payload
/// (spec §4.8 step 5; exact column layout is unspecified and so, like the
/// `resolv.conf` emitter's formatting, left to this implementation).
fn dump(store: &Store, stack: crate::store::StackId, ifindex: u32) {
    store.forall_mask(Some(stack), ifindex, 0, 0, |r| {
        eprintln!(
            "{} {} flags={:#04x} len={} {:?}",
            mnemonic(r.rtype()),
            format_timestamp_utc(r.timestamp()),
            r.is_active() as u8,
            payload_len(r.payload()),
            r.payload(),
        );
        Action::Keep
    });
}

fn mnemonic(rtype: u8) -> &'static str {
    match rtype {
        kind::STATIC_TIMESTAMP => "sts",
        kind::STATIC4_ADDR => "s4a",
        kind::STATIC4_ROUTE => "s4g",
        kind::STATIC6_ADDR => "s6a",
        kind::STATIC6_ROUTE => "s6g",
        kind::STATIC4_DNS => "s4d",
        kind::STATIC6_DNS => "s6d",
        kind::STATIC_DOMAIN => "sdm",
        kind::DHCP4_TIMESTAMP => "4ts",
        kind::DHCP4_SERVER => "4sv",
        kind::DHCP4_ADDR => "4ad",
        kind::DHCP4_ROUTER => "4gw",
        kind::DHCP4_DNS => "4dn",
        kind::DHCP4_DOMAIN => "4dm",
        kind::DHCP6_TIMESTAMP => "6ts",
        kind::DHCP6_SERVERID => "6sv",
        kind::DHCP6_ADDR => "6ad",
        kind::DHCP6_DNS => "6dn",
        kind::DHCP6_DOMAIN => "6dm",
        kind::RD6_TIMESTAMP => "rts",
        kind::RD6_PREFIX => "rpx",
        kind::RD6_ADDR => "rad",
        kind::RD6_ROUTER => "rgw",
        kind::RD6_MTU => "mtu",
        _ => "???",
    }
}

fn payload_len(payload: &Payload) -> usize {
    match payload {
        Payload::Empty => 0,
        Payload::Ipv4Addr(_) => std::mem::size_of::<crate::store::Ipv4Record>(),
        Payload::Ipv4Gateway(_) => std::mem::size_of::<Ipv4Addr>(),
        Payload::Ipv6Gateway(_) => std::mem::size_of::<Ipv6Addr>(),
        Payload::Ipv6Addr(_) | Payload::Ipv6Meta(_) => std::mem::size_of::<crate::store::Ipv6Record>(),
        Payload::Dns4(_) => std::mem::size_of::<Ipv4Addr>(),
        Payload::Dns6(_) => std::mem::size_of::<Ipv6Addr>(),
        Payload::Domain(s) => s.len() + 1,
        Payload::DomainList(names) => names.iter().map(|n| n.len() + 1).sum(),
        Payload::Server4(_) => std::mem::size_of::<Ipv4Addr>(),
        Payload::ServerId(bytes) => bytes.len(),
        Payload::Mtu(_) => std::mem::size_of::<u32>(),
    }
}

/// Renders a Unix timestamp as `YYYYMMDD HHMMSS UTC` without pulling in a
/// date/time crate, using Howard Hinnant's `civil_from_days` algorithm.
fn format_timestamp_utc(ts: i64) -> String {
    let days = ts.div_euclid(86_400);
    let secs_of_day = ts.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    let hour = secs_of_day / 3600;
    let minute = (secs_of_day % 3600) / 60;
    let second = secs_of_day % 60;
    format!("{year:04}{month:02}{day:02} {hour:02}{minute:02}{second:02} UTC")
}

fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockStack;
    use crate::stack::MacAddr;
    use std::net::Ipv4Addr;

    fn stack_with_iface() -> MockStack {
        let stack = MockStack::new(1);
        stack.add_interface("eth0", 9, MacAddr::new([0, 1, 2, 3, 4, 5]));
        stack
    }

    #[test]
    fn unknown_directive_is_invalid() {
        let store = Store::new();
        let stack = stack_with_iface();
        let err = apply(&store, &stack, "iface=eth0,bogus=1").unwrap_err();
        assert!(matches!(err, EngineError::InvalidDirective(_)));
    }

    #[test]
    fn unknown_interface_is_nodev() {
        let store = Store::new();
        let stack = stack_with_iface();
        let err = apply(&store, &stack, "iface=nope,dhcp").unwrap_err();
        assert!(matches!(err, EngineError::NoDevice));
    }

    #[test]
    fn static_add_then_remove_round_trips_through_the_stack() {
        let store = Store::new();
        let stack = stack_with_iface();

        let mask = apply(&store, &stack, "iface=eth0,ip=10.0.0.5/24,gw=10.0.0.1,dns=10.0.0.1,domain=local").unwrap();
        assert_eq!(mask, bits::STATIC);
        assert_eq!(stack.added_addrs.lock().unwrap().len(), 1);
        assert_eq!(stack.added_routes.lock().unwrap().len(), 1);

        let mut addr_count = 0;
        store.forall(Some(1), 9, kind::STATIC4_ADDR, |_| {
            addr_count += 1;
            Action::Keep
        });
        assert_eq!(addr_count, 1);

        let mask2 = apply(&store, &stack, "iface=eth0,-static").unwrap();
        assert_eq!(mask2, 0, "-static is a clean, not an acquisition, and contributes no bit");
        assert_eq!(stack.removed_addrs.lock().unwrap().len(), 1);
        assert_eq!(stack.removed_routes.lock().unwrap().len(), 1);

        let mut remaining = 0;
        store.forall_mask(Some(1), 9, kind::STATIC_TIMESTAMP, kind::MASK_TYPE, |_| {
            remaining += 1;
            Action::Keep
        });
        assert_eq!(remaining, 0);
    }

    #[test]
    fn repeating_the_same_static_ip_is_a_stack_noop() {
        let store = Store::new();
        let stack = stack_with_iface();

        apply(&store, &stack, "iface=eth0,ip=10.0.0.5/24").unwrap();
        assert_eq!(stack.added_addrs.lock().unwrap().len(), 1);

        apply(&store, &stack, "iface=eth0,ip=10.0.0.5/24").unwrap();
        assert_eq!(stack.added_addrs.lock().unwrap().len(), 1, "already-active, unchanged record is not re-added");
        assert!(stack.removed_addrs.lock().unwrap().is_empty());

        let mut count = 0;
        store.forall(Some(1), 9, kind::STATIC4_ADDR, |_| {
            count += 1;
            Action::Keep
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn ip6_default_prefix_is_64_and_ip4_default_is_24() {
        let store = Store::new();
        let stack = stack_with_iface();
        apply(&store, &stack, "iface=eth0,ip=10.0.0.5,ip=2001:db8::5").unwrap();

        let mut v4 = None;
        store.forall(Some(1), 9, kind::STATIC4_ADDR, |r| {
            if let Payload::Ipv4Addr(rec) = r.payload() {
                v4 = Some(*rec);
            }
            Action::Keep
        });
        assert_eq!(v4.unwrap().prefixlen, DEFAULT_PREFIX4);

        let mut v6 = None;
        store.forall(Some(1), 9, kind::STATIC6_ADDR, |r| {
            if let Payload::Ipv6Addr(rec) = r.payload() {
                v6 = Some(*rec);
            }
            Action::Keep
        });
        assert_eq!(v6.unwrap().prefixlen, DEFAULT_PREFIX6);
    }

    #[test]
    fn dhcp_against_unresponsive_server_returns_zero_bits() {
        let store = Store::new();
        let stack = stack_with_iface(); // default responder never answers
        let mask = apply(&store, &stack, "iface=eth0,dhcp").unwrap();
        assert_eq!(mask, 0);
        let mut count = 0;
        store.forall_mask(Some(1), 9, kind::DHCP4_TIMESTAMP, kind::MASK_TYPE, |_| {
            count += 1;
            Action::Keep
        });
        assert_eq!(count, 0);
        assert!(stack.added_addrs.lock().unwrap().is_empty());
    }

    #[test]
    fn mac_directive_sets_the_link_address() {
        let store = Store::new();
        let stack = stack_with_iface();
        apply(&store, &stack, "iface=eth0,eth,mac=02:00:00:00:00:09").unwrap();
        assert_eq!(stack.link_get_addr(9).unwrap(), MacAddr::new([2, 0, 0, 0, 0, 9]));
        assert!(stack.is_up(9));
    }

    #[test]
    fn explicit_remove_directive_deletes_only_that_record() {
        let store = Store::new();
        let stack = stack_with_iface();
        apply(&store, &stack, "iface=eth0,ip=10.0.0.5/24,ip=10.0.0.6/24").unwrap();
        apply(&store, &stack, "iface=eth0,-ip=10.0.0.5/24,ip=10.0.0.6/24").unwrap();

        let mut remaining = Vec::new();
        store.forall(Some(1), 9, kind::STATIC4_ADDR, |r| {
            if let Payload::Ipv4Addr(rec) = r.payload() {
                remaining.push(rec.addr);
            }
            Action::Keep
        });
        assert_eq!(remaining, vec![Ipv4Addr::new(10, 0, 0, 6)]);
    }

    #[test]
    fn format_timestamp_is_readable() {
        // 2024-01-02T03:04:05Z
        let ts = 1_704_164_645;
        assert_eq!(format_timestamp_utc(ts), "20240102 030405 UTC");
    }
}
