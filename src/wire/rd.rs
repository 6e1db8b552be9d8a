//! ICMPv6 Router Discovery (RFC 4861) framing: Router Solicitation and
//! Router Advertisement, the Source Link-Layer Address option, the Prefix
//! Information option, and the MTU option. Ground truth: `iothconf_rd.c`.

use byteorder::{BigEndian, ByteOrder};
use std::net::Ipv6Addr;

use super::{Error, Result};

const ICMP_ROUTER_SOLICIT: u8 = 133;
const ICMP_ROUTER_ADVERT: u8 = 134;

mod option {
    pub const SOURCE_LINK_LAYER_ADDR: u8 = 1;
    pub const PREFIX_INFORMATION: u8 = 3;
    pub const MTU: u8 = 5;
}

/// Prefix Information option flag bits (RFC 4861 §4.6.2).
pub mod prefix_flags {
    pub const ON_LINK: u8 = 0x80;
    pub const AUTONOMOUS: u8 = 0x40;
}

/// Builds a Router Solicitation carrying a Source Link-Layer Address
/// option for `mac`. ICMPv6 checksum is left to the kernel/stack
/// collaborator, which computes it over the IPv6 pseudo-header this module
/// never sees (spec §9).
pub fn solicit(mac: &[u8; 6]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.push(ICMP_ROUTER_SOLICIT);
    out.push(0); // code
    out.extend_from_slice(&[0, 0]); // checksum: filled by the stack
    out.extend_from_slice(&[0, 0, 0, 0]); // reserved
    out.push(option::SOURCE_LINK_LAYER_ADDR);
    out.push(1); // length, in units of 8 octets
    out.extend_from_slice(mac);
    out
}

/// One Prefix Information option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    pub prefix: Ipv6Addr,
    pub prefixlen: u8,
    pub flags: u8,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
}

/// A parsed, validated Router Advertisement.
#[derive(Debug, Default)]
pub struct Advertisement {
    pub flags: u8,
    pub router_lifetime: u16,
    pub prefixes: Vec<Prefix>,
    pub mtu: Option<u32>,
}

/// Parses and structurally validates a Router Advertisement. The caller
/// supplies the router's source address separately (taken from the socket
/// the datagram arrived on) and records it as `RD6_ROUTER`.
pub fn parse(buf: &[u8]) -> Result<Advertisement> {
    if buf.len() < 16 {
        return Err(Error::Truncated);
    }
    if buf[0] != ICMP_ROUTER_ADVERT {
        return Err(Error::Malformed);
    }

    let mut ra = Advertisement {
        flags: buf[5],
        router_lifetime: BigEndian::read_u16(&buf[6..8]),
        ..Advertisement::default()
    };

    let mut opts = &buf[16..];
    while !opts.is_empty() {
        if opts.len() < 2 {
            return Err(Error::Truncated);
        }
        let opt_type = opts[0];
        let opt_len = opts[1] as usize * 8;
        if opt_len == 0 || opts.len() < opt_len {
            return Err(Error::Truncated);
        }
        let value = &opts[2..opt_len];
        match opt_type {
            option::PREFIX_INFORMATION if value.len() >= 30 => {
                ra.prefixes.push(Prefix {
                    prefixlen: value[0],
                    flags: value[1],
                    valid_lifetime: BigEndian::read_u32(&value[2..6]),
                    preferred_lifetime: BigEndian::read_u32(&value[6..10]),
                    prefix: Ipv6Addr::from(<[u8; 16]>::try_from(&value[14..30]).unwrap()),
                });
            }
            option::MTU if value.len() >= 6 => {
                ra.mtu = Some(BigEndian::read_u32(&value[2..6]));
            }
            _ => {}
        }
        opts = &opts[opt_len..];
    }
    Ok(ra)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_prefix_option(out: &mut Vec<u8>, prefix: Ipv6Addr, prefixlen: u8, flags: u8, preferred: u32, valid: u32) {
        out.push(option::PREFIX_INFORMATION);
        out.push(4); // 32 bytes
        out.push(prefixlen);
        out.push(flags);
        out.extend_from_slice(&valid.to_be_bytes());
        out.extend_from_slice(&preferred.to_be_bytes());
        out.extend_from_slice(&[0u8; 4]); // reserved2
        out.extend_from_slice(&prefix.octets());
    }

    #[test]
    fn solicit_carries_source_link_layer_address() {
        let mac = [0, 1, 2, 3, 4, 5];
        let buf = solicit(&mac);
        assert_eq!(buf[0], ICMP_ROUTER_SOLICIT);
        assert_eq!(&buf[buf.len() - 6..], &mac);
    }

    #[test]
    fn parse_extracts_prefix_and_mtu() {
        let mut buf = vec![ICMP_ROUTER_ADVERT, 0, 0, 0, 64, prefix_flags::AUTONOMOUS, 0, 100];
        buf.extend_from_slice(&[0u8; 4]); // reachable time
        buf.extend_from_slice(&[0u8; 4]); // retrans timer
        push_prefix_option(&mut buf, Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0), 64, prefix_flags::AUTONOMOUS | prefix_flags::ON_LINK, 3600, 7200);
        buf.push(option::MTU);
        buf.push(1);
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&1500u32.to_be_bytes());

        let ra = parse(&buf).unwrap();
        assert_eq!(ra.router_lifetime, 100);
        assert_eq!(ra.prefixes.len(), 1);
        assert_eq!(ra.prefixes[0].prefixlen, 64);
        assert_eq!(ra.prefixes[0].valid_lifetime, 7200);
        assert_eq!(ra.mtu, Some(1500));
    }
}
