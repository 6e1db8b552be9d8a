//! Search-list encoding (spec §4.9) and the `resolv.conf` emitter (spec §2
//! item 9, §6). Ground truth: `iothconf_dns.c`.

use crate::store::{kind, Action, Payload, StackId, Store};

/// Converts an RFC 1035 length-prefixed sequence of domain names (as
/// received in a DHCPv6 DOMAIN_LIST option) into a list of dotted names.
///
/// Walks the buffer one length-prefixed label at a time; a length byte
/// with its top two bits set (a compression pointer) is treated as a
/// zero-length label and consumes only that one byte, per
/// `iothconf_domain2mstr`.
pub fn parse_domain_list(domain: &[u8]) -> Vec<String> {
    let multistring = domain_to_multistring(domain);
    multistring
        .split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

fn domain_nx(len: u8) -> u8 {
    if len & 0xc0 == 0xc0 {
        0
    } else {
        len
    }
}

fn domain_to_multistring(domain: &[u8]) -> Vec<u8> {
    if domain.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(domain.len() + 1);
    let mut count = domain_nx(domain[0]);
    let mut oldcount = count;
    for &b in &domain[1..] {
        if count == 0 {
            count = domain_nx(b);
            if oldcount > 0 && count > 0 {
                out.push(b'.');
            } else if oldcount == 0 && count > 0 {
                out.push(0);
            }
            oldcount = count;
        } else {
            out.push(b);
            count -= 1;
        }
    }
    out.push(0);
    out
}

/// Encodes a single dotted name as an RFC 1035 length-prefixed label
/// sequence terminated by a zero-length label (used for the DHCPv6
/// Client FQDN option). Mirrors `lname2dns`.
pub fn name_to_wire(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for label in name.split('.') {
        if label.is_empty() {
            continue;
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

/// Walks the DNS-server and search-domain records for `ifindex` across all
/// sources, renders a `resolv.conf`(5)-format blob, and returns it — unless
/// no DNS/domain record has changed since the previous call, in which case
/// it returns `None` (spec §6's "nothing changed" sentinel).
///
/// Reuses each record's `ACTIVE` flag as an "already rendered" marker: DNS
/// and domain record types are never touched by [`crate::ip`] (they carry
/// no installable address/route), so the flag is free for this purpose,
/// exactly as `iothconf_dns.c` does.
pub fn emit_resolvconf(store: &Store, stack: StackId, ifindex: u32) -> Option<String> {
    let mut updated = 0usize;
    let mut domain_count = 0usize;
    store.forall_mask(Some(stack), ifindex, kind::DNS_DOM_BASE, kind::DNS_DOM_MASK, |mut r| {
        match r.rtype() {
            kind::DHCP4_DOMAIN | kind::DHCP6_DOMAIN | kind::STATIC_DOMAIN => {
                if !r.set_active() {
                    updated += 1;
                }
                domain_count += match r.payload() {
                    Payload::Domain(_) => 1,
                    Payload::DomainList(names) => names.len(),
                    _ => 0,
                };
            }
            kind::DHCP4_DNS | kind::DHCP6_DNS | kind::STATIC4_DNS | kind::STATIC6_DNS => {
                if !r.set_active() {
                    updated += 1;
                }
            }
            _ => {}
        }
        Action::Keep
    });

    if updated == 0 {
        return None;
    }

    let mut out = String::new();
    if domain_count > 0 {
        let mut seen: Vec<String> = Vec::with_capacity(domain_count);
        out.push_str("search");
        store.forall_mask(Some(stack), ifindex, kind::DOM_BASE, kind::DOM_MASK, |r| {
            let names: Vec<String> = match r.payload() {
                Payload::Domain(s) => vec![s.clone()],
                Payload::DomainList(names) => names.clone(),
                _ => Vec::new(),
            };
            for name in names {
                if !seen.contains(&name) {
                    out.push(' ');
                    out.push_str(&name);
                    seen.push(name);
                }
            }
            Action::Keep
        });
        out.push('\n');
    }

    for rtype in [kind::STATIC6_DNS, kind::STATIC4_DNS, kind::DHCP6_DNS, kind::DHCP4_DNS] {
        store.forall(Some(stack), ifindex, rtype, |r| {
            let addr = match r.payload() {
                Payload::Dns4(a) => a.to_string(),
                Payload::Dns6(a) => a.to_string(),
                _ => return Action::Keep,
            };
            out.push_str("nameserver ");
            out.push_str(&addr);
            out.push('\n');
            Action::Keep
        });
    }
    Some(out)
}
