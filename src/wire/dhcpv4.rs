//! DHCPv4 wire format: BOOTP (RFC 2131) header, RFC 2132 options, and the
//! hand-built IPv4/UDP headers that carry them. Ground truth:
//! `iothconf_dhcp.c`.
//!
//! The client sends over an `AF_PACKET` socket before any address is
//! configured on the interface, so unlike a socket-layer UDP send, this
//! module builds the IPv4 and UDP headers itself (see spec §9, "DHCPv4
//! uses hand-built IP/UDP headers").

use byteorder::{BigEndian, ByteOrder};
use std::net::Ipv4Addr;

use super::{ip_checksum, Error, Result};

pub const CLIENT_PORT: u16 = 68;
pub const SERVER_PORT: u16 = 67;
pub const MAX_PACKET: usize = 576;

const BOOTP_LEN: usize = 236;
const COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
const IP_UDP_BOOTP_LEN: usize = 20 + 8 + BOOTP_LEN + 4;

enum_with_unknown! {
    /// A DHCP message type (RFC 2132 §9.6, option 53).
    pub enum MessageType(u8) {
        Discover = 1,
        Offer = 2,
        Request = 3,
        Decline = 4,
        Ack = 5,
        Nak = 6,
        Release = 7,
        Inform = 8,
    }
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Unknown(0)
    }
}

mod option {
    pub const MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS: u8 = 6;
    pub const DOMAIN_NAME: u8 = 15;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const PARAMETER_LIST: u8 = 55;
    pub const MAX_MESSAGE_SIZE: u8 = 57;
    pub const CLIENT_ID: u8 = 61;
    pub const FQDN: u8 = 81;
    pub const END: u8 = 255;
}

/// An outgoing DISCOVER or REQUEST, ready to be framed as IPv4/UDP and
/// sent to the broadcast address.
pub struct Message<'a> {
    pub msg_type: MessageType,
    pub xid: [u8; 4],
    pub client_mac: [u8; 6],
    pub ciaddr: Option<Ipv4Addr>,
    pub siaddr: Option<Ipv4Addr>,
    pub requested_ip: Option<Ipv4Addr>,
    pub server_id: Option<Ipv4Addr>,
    pub fqdn: Option<&'a str>,
}

impl<'a> Message<'a> {
    /// Emits the full IPv4+UDP+BOOTP+options datagram.
    pub fn emit(&self) -> Vec<u8> {
        let mut options = Vec::new();
        options.push(option::MESSAGE_TYPE);
        options.push(1);
        options.push(u8::from(self.msg_type));

        options.push(option::MAX_MESSAGE_SIZE);
        options.push(2);
        options.extend_from_slice(&(MAX_PACKET as u16).to_be_bytes());

        options.push(option::CLIENT_ID);
        options.push(7);
        options.push(1); // htype: ethernet
        options.extend_from_slice(&self.client_mac);

        if let Some(ip) = self.requested_ip {
            options.push(option::REQUESTED_IP);
            options.push(4);
            options.extend_from_slice(&ip.octets());
        }
        if let Some(ip) = self.server_id {
            options.push(option::SERVER_ID);
            options.push(4);
            options.extend_from_slice(&ip.octets());
        }

        options.push(option::PARAMETER_LIST);
        options.push(4);
        options.extend_from_slice(&[option::MASK, option::ROUTER, option::DNS, option::DOMAIN_NAME]);

        if let Some(fqdn) = self.fqdn {
            if fqdn.len() <= 251 {
                options.push(option::FQDN);
                options.push((4 + fqdn.len()) as u8);
                options.push(0x01); // flags: S bit (server updates A+PTR)
                options.push(0x00); // RCODE1 (reserved, deprecated)
                options.push(0x00); // RCODE2 (reserved, deprecated)
                options.extend_from_slice(fqdn.as_bytes());
                options.push(0); // terminator
            }
        }
        options.push(option::END);

        let bootp_and_cookie_len = BOOTP_LEN + 4;
        let mut bootp = vec![0u8; bootp_and_cookie_len];
        bootp[0] = 1; // op: bootrequest
        bootp[1] = 1; // htype: ethernet
        bootp[2] = 6; // hlen
        bootp[4..8].copy_from_slice(&self.xid);
        if self.msg_type != MessageType::Discover {
            if let Some(ciaddr) = self.ciaddr {
                bootp[12..16].copy_from_slice(&ciaddr.octets());
            }
            if let Some(siaddr) = self.siaddr {
                bootp[20..24].copy_from_slice(&siaddr.octets());
            }
        }
        bootp[28..34].copy_from_slice(&self.client_mac);
        bootp[BOOTP_LEN..BOOTP_LEN + 4].copy_from_slice(&COOKIE);

        let udp_len = 8 + bootp.len() + options.len();
        let total_len = 20 + udp_len;

        let mut out = Vec::with_capacity(total_len);
        // IPv4 header.
        out.push(0x45); // version 4, IHL 5
        out.push(0); // DSCP/ECN
        out.extend_from_slice(&(total_len as u16).to_be_bytes());
        out.extend_from_slice(&[0, 0]); // identification
        out.extend_from_slice(&[0, 0]); // flags/fragment offset
        out.push(64); // TTL
        out.push(17); // protocol: UDP
        out.extend_from_slice(&[0, 0]); // checksum placeholder
        out.extend_from_slice(&[0, 0, 0, 0]); // saddr: unspecified
        out.extend_from_slice(&Ipv4Addr::BROADCAST.octets());
        let checksum = ip_checksum(&out[0..20]);
        out[10..12].copy_from_slice(&(!checksum).to_be_bytes());

        // UDP header.
        out.extend_from_slice(&CLIENT_PORT.to_be_bytes());
        out.extend_from_slice(&SERVER_PORT.to_be_bytes());
        out.extend_from_slice(&(udp_len as u16).to_be_bytes());
        out.extend_from_slice(&[0, 0]); // checksum: unused (0 permitted over IPv4)

        out.extend_from_slice(&bootp);
        out.extend_from_slice(&options);
        out
    }
}

/// A parsed, validated DHCPACK/OFFER/NAK datagram.
#[derive(Debug, Default)]
pub struct Reply {
    pub xid: [u8; 4],
    pub msg_type: MessageType,
    pub yiaddr: Ipv4Addr,
    pub server_id: Option<Ipv4Addr>,
    pub prefixlen: Option<u8>,
    pub leasetime: Option<u32>,
    pub routers: Vec<Ipv4Addr>,
    pub dns: Vec<Ipv4Addr>,
    pub domain: Option<String>,
}

fn mask_to_prefix(mask: u32) -> u8 {
    32 - mask.trailing_zeros().min(32) as u8
}

/// Parses and structurally validates an IPv4/UDP/BOOTP/options datagram:
/// checksum, protocol, ports, BOOTREPLY op, and DHCP magic cookie. Does
/// *not* check `xid` or message type against an expectation — those are
/// "spurious packet" decisions the caller makes (spec §4.4, §7).
pub fn parse(buf: &[u8]) -> Result<Reply> {
    if buf.len() < IP_UDP_BOOTP_LEN {
        return Err(Error::Truncated);
    }
    if ip_checksum(&buf[0..20]) != 0xffff {
        return Err(Error::Malformed);
    }
    if buf[9] != 17 {
        return Err(Error::Malformed);
    }
    let udp = &buf[20..28];
    if BigEndian::read_u16(&udp[0..2]) != SERVER_PORT || BigEndian::read_u16(&udp[2..4]) != CLIENT_PORT {
        return Err(Error::Malformed);
    }
    let bootp = &buf[28..28 + BOOTP_LEN];
    if bootp[0] != 2 {
        return Err(Error::Malformed); // not a BOOTREPLY
    }
    let cookie_off = 28 + BOOTP_LEN;
    if &buf[cookie_off..cookie_off + 4] != COOKIE {
        return Err(Error::Malformed);
    }

    let mut reply = Reply {
        xid: bootp[4..8].try_into().unwrap(),
        yiaddr: Ipv4Addr::new(bootp[16], bootp[17], bootp[18], bootp[19]),
        ..Reply::default()
    };

    let mut opts = &buf[cookie_off + 4..];
    loop {
        let Some((&opt_type, rest)) = opts.split_first() else {
            break;
        };
        if opt_type == option::END {
            break;
        }
        if opt_type == 0 {
            opts = rest;
            continue;
        }
        let Some((&len, rest)) = rest.split_first() else {
            return Err(Error::Truncated);
        };
        let len = len as usize;
        if rest.len() < len {
            return Err(Error::Truncated);
        }
        let value = &rest[..len];
        match opt_type {
            option::MESSAGE_TYPE if len == 1 => reply.msg_type = MessageType::from(value[0]),
            option::SERVER_ID if len == 4 => {
                reply.server_id = Some(Ipv4Addr::new(value[0], value[1], value[2], value[3]))
            }
            option::MASK if len == 4 => {
                reply.prefixlen = Some(mask_to_prefix(BigEndian::read_u32(value)))
            }
            option::LEASE_TIME if len == 4 => reply.leasetime = Some(BigEndian::read_u32(value)),
            option::ROUTER => {
                for chunk in value.chunks_exact(4) {
                    reply.routers.push(Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]));
                }
            }
            option::DNS => {
                for chunk in value.chunks_exact(4) {
                    reply.dns.push(Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]));
                }
            }
            option::DOMAIN_NAME => {
                reply.domain = Some(String::from_utf8_lossy(value).into_owned());
            }
            _ => {}
        }
        opts = &rest[len..];
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_to_prefix_matches_common_masks() {
        assert_eq!(mask_to_prefix(0xffff_ff00), 24);
        assert_eq!(mask_to_prefix(0xffff_ffff), 32);
        assert_eq!(mask_to_prefix(0), 0);
    }

    #[test]
    fn discover_emits_well_formed_ip_udp_header() {
        let msg = Message {
            msg_type: MessageType::Discover,
            xid: [1, 2, 3, 4],
            client_mac: [0, 1, 2, 3, 4, 5],
            ciaddr: None,
            siaddr: None,
            requested_ip: None,
            server_id: None,
            fqdn: Some("host.example.org"),
        };
        let pkt = msg.emit();
        assert_eq!(ip_checksum(&pkt[0..20]), 0xffff);
        assert_eq!(BigEndian::read_u16(&pkt[20..22]), CLIENT_PORT);
        assert_eq!(BigEndian::read_u16(&pkt[22..24]), SERVER_PORT);
        assert_eq!(&pkt[28 + BOOTP_LEN..28 + BOOTP_LEN + 4], COOKIE);
    }
}
