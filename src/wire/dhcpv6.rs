//! DHCPv6 (RFC 8415) message framing and the RFC 4704 Client FQDN option.
//! Ground truth: `iothconf_dhcpv6.c`.
//!
//! Unlike DHCPv4, DHCPv6 rides over an ordinary UDP/IPv6 socket (spec §9):
//! this module only ever builds and parses the DHCPv6 message body, never
//! an IP header.

use byteorder::{BigEndian, ByteOrder};
use std::net::Ipv6Addr;

use super::{Error, Result};

pub const CLIENT_PORT: u16 = 546;
pub const SERVER_PORT: u16 = 547;
pub const MAX_PACKET: usize = 1232;

/// All-DHCP-relay-agents-and-servers multicast address (RFC 8415 §7.1).
pub const ALL_DHCP_SERVERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 2);

enum_with_unknown! {
    /// A DHCPv6 message type (RFC 8415 §7.3).
    pub enum MessageType(u8) {
        Solicit = 1,
        Advertise = 2,
        Request = 3,
        Reply = 7,
    }
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Unknown(0)
    }
}

mod option {
    pub const CLIENT_ID: u16 = 1;
    pub const SERVER_ID: u16 = 2;
    pub const IA_NA: u16 = 3;
    pub const IAADDR: u16 = 5;
    pub const ORO: u16 = 6;
    pub const ELAPSED_TIME: u16 = 8;
    pub const DNS_SERVERS: u16 = 23;
    pub const DOMAIN_LIST: u16 = 24;
    pub const CLIENT_FQDN: u16 = 39;
}

/// The client's DUID-LLT (RFC 8415 §11.2): duid-type 1, hardware-type 1
/// (Ethernet), the time the DUID was generated, and the interface MAC.
/// Assembled by the caller (which owns the process-wide cached value) and
/// passed in as opaque bytes, since this module only frames options.
pub fn client_id_llt(duid_time: u32, mac: &[u8; 6]) -> [u8; 14] {
    let mut out = [0u8; 14];
    BigEndian::write_u16(&mut out[0..2], 1); // DUID-LLT
    BigEndian::write_u16(&mut out[2..4], 1); // hardware type: Ethernet
    BigEndian::write_u32(&mut out[4..8], duid_time);
    out[8..14].copy_from_slice(mac);
    out
}

/// An outgoing SOLICIT or REQUEST.
pub struct Message<'a> {
    pub msg_type: MessageType,
    pub tid: [u8; 3],
    pub client_id: &'a [u8],
    pub server_id: Option<&'a [u8]>,
    pub iaid: [u8; 4],
    /// The raw IA_NA suboptions (usually a single IAADDR) to replay when
    /// moving from ADVERTISE to REQUEST, lifetimes already zeroed per
    /// RFC 8415 §18.2.1.
    pub ia_addr: Option<&'a [u8]>,
    /// The Client FQDN to carry, DNS-wire-encoded by the caller via
    /// [`crate::dns::name_to_wire`].
    pub fqdn: Option<&'a [u8]>,
}

impl<'a> Message<'a> {
    pub fn emit(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.push(u8::from(self.msg_type));
        out.extend_from_slice(&self.tid);

        push_option(&mut out, option::CLIENT_ID, self.client_id);
        if let Some(server_id) = self.server_id {
            push_option(&mut out, option::SERVER_ID, server_id);
        }

        let mut oro = [0u8; 4];
        BigEndian::write_u16(&mut oro[0..2], option::DNS_SERVERS);
        BigEndian::write_u16(&mut oro[2..4], option::DOMAIN_LIST);
        push_option(&mut out, option::ORO, &oro);
        push_option(&mut out, option::ELAPSED_TIME, &[0, 0]);

        if let Some(fqdn) = self.fqdn {
            let mut value = Vec::with_capacity(fqdn.len() + 1);
            value.push(0x01); // flags: S bit
            value.extend_from_slice(fqdn);
            push_option(&mut out, option::CLIENT_FQDN, &value);
        }

        let mut ia_na = Vec::with_capacity(12);
        ia_na.extend_from_slice(&self.iaid);
        ia_na.extend_from_slice(&[0u8; 8]); // T1, T2: let the server decide
        if let Some(ia_addr) = self.ia_addr {
            ia_na.extend_from_slice(ia_addr);
        }
        push_option(&mut out, option::IA_NA, &ia_na);

        out
    }
}

fn push_option(out: &mut Vec<u8>, code: u16, value: &[u8]) {
    let mut header = [0u8; 4];
    BigEndian::write_u16(&mut header[0..2], code);
    BigEndian::write_u16(&mut header[2..4], value.len() as u16);
    out.extend_from_slice(&header);
    out.extend_from_slice(value);
}

/// One IAADDR suboption of an IA_NA, parsed out of an ADVERTISE/REPLY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IaAddr {
    pub addr: Ipv6Addr,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
}

/// A parsed, validated ADVERTISE or REPLY.
#[derive(Debug, Default)]
pub struct Reply {
    pub msg_type: MessageType,
    pub tid: [u8; 3],
    pub client_id: Vec<u8>,
    pub server_id: Vec<u8>,
    pub iaid: Option<[u8; 4]>,
    /// The IA_NA's suboptions, verbatim, for replaying in a REQUEST (with
    /// lifetimes zeroed via [`zero_iaaddr_lifetimes`]).
    pub ia_na_options: Vec<u8>,
    pub iaaddrs: Vec<IaAddr>,
    pub dns_servers: Vec<Ipv6Addr>,
    /// RFC 1035 wire-encoded search list, to be decoded with
    /// [`crate::dns::parse_domain_list`].
    pub domain_list: Vec<u8>,
}

/// Parses and structurally validates a DHCPv6 message. Does *not* check the
/// transaction id, client-id, or IAID against an expectation — those are
/// consistency checks the caller makes, treating a mismatch as a spurious
/// packet rather than a hard error (spec §4.5, §7).
pub fn parse(buf: &[u8]) -> Result<Reply> {
    if buf.len() < 4 {
        return Err(Error::Truncated);
    }
    let msg_type = MessageType::from(buf[0]);
    let mut reply = Reply {
        msg_type,
        tid: [buf[1], buf[2], buf[3]],
        ..Reply::default()
    };

    let mut opts = &buf[4..];
    while !opts.is_empty() {
        if opts.len() < 4 {
            return Err(Error::Truncated);
        }
        let code = BigEndian::read_u16(&opts[0..2]);
        let len = BigEndian::read_u16(&opts[2..4]) as usize;
        if opts.len() < 4 + len {
            return Err(Error::Truncated);
        }
        let value = &opts[4..4 + len];
        match code {
            option::CLIENT_ID => reply.client_id = value.to_vec(),
            option::SERVER_ID => reply.server_id = value.to_vec(),
            option::IA_NA => {
                if len < 12 {
                    return Err(Error::Malformed);
                }
                reply.iaid = Some(value[0..4].try_into().unwrap());
                let inner = &value[12..];
                reply.ia_na_options = inner.to_vec();
                reply.iaaddrs = parse_iaaddrs(inner)?;
            }
            option::DNS_SERVERS => {
                for chunk in value.chunks_exact(16) {
                    reply.dns_servers.push(Ipv6Addr::from(<[u8; 16]>::try_from(chunk).unwrap()));
                }
            }
            option::DOMAIN_LIST => reply.domain_list = value.to_vec(),
            _ => {}
        }
        opts = &opts[4 + len..];
    }
    Ok(reply)
}

fn parse_iaaddrs(mut buf: &[u8]) -> Result<Vec<IaAddr>> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        if buf.len() < 4 {
            return Err(Error::Truncated);
        }
        let code = BigEndian::read_u16(&buf[0..2]);
        let len = BigEndian::read_u16(&buf[2..4]) as usize;
        if buf.len() < 4 + len {
            return Err(Error::Truncated);
        }
        let value = &buf[4..4 + len];
        if code == option::IAADDR {
            if len < 24 {
                return Err(Error::Malformed);
            }
            out.push(IaAddr {
                addr: Ipv6Addr::from(<[u8; 16]>::try_from(&value[0..16]).unwrap()),
                preferred_lifetime: BigEndian::read_u32(&value[16..20]),
                valid_lifetime: BigEndian::read_u32(&value[20..24]),
            });
        }
        buf = &buf[4 + len..];
    }
    Ok(out)
}

/// Zeroes the preferred/valid lifetimes of every IAADDR suboption in a raw
/// IA_NA suboption buffer, in place, per RFC 8415 §18.2.1 (a REQUEST
/// replays the address it wants without claiming a lifetime).
pub fn zero_iaaddr_lifetimes(buf: &mut [u8]) {
    let mut i = 0;
    while i + 4 <= buf.len() {
        let code = BigEndian::read_u16(&buf[i..i + 2]);
        let len = BigEndian::read_u16(&buf[i + 2..i + 4]) as usize;
        if i + 4 + len > buf.len() {
            break;
        }
        if code == option::IAADDR && len >= 24 {
            for b in &mut buf[i + 4 + 16..i + 4 + 24] {
                *b = 0;
            }
        }
        i += 4 + len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solicit_round_trips_through_parse() {
        let client_id = client_id_llt(12345, &[0, 1, 2, 3, 4, 5]);
        let msg = Message {
            msg_type: MessageType::Solicit,
            tid: [0xaa, 0xbb, 0xcc],
            client_id: &client_id,
            server_id: None,
            iaid: [0, 1, 2, 3],
            ia_addr: None,
            fqdn: None,
        };
        let buf = msg.emit();
        let parsed = parse(&buf).unwrap();
        assert_eq!(parsed.msg_type, MessageType::Solicit);
        assert_eq!(parsed.tid, [0xaa, 0xbb, 0xcc]);
        assert_eq!(parsed.client_id, client_id);
        assert_eq!(parsed.iaid, Some([0, 1, 2, 3]));
    }

    #[test]
    fn parse_extracts_iaaddrs_and_dns_servers() {
        let mut ia_na = Vec::new();
        ia_na.extend_from_slice(&[0, 1, 2, 3]); // iaid
        ia_na.extend_from_slice(&[0u8; 8]); // t1/t2
        let mut iaaddr = Vec::new();
        iaaddr.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        iaaddr.extend_from_slice(&300u32.to_be_bytes());
        iaaddr.extend_from_slice(&600u32.to_be_bytes());
        ia_na.extend_from_slice(&option::IAADDR.to_be_bytes());
        ia_na.extend_from_slice(&(iaaddr.len() as u16).to_be_bytes());
        ia_na.extend_from_slice(&iaaddr);

        let mut buf = vec![u8::from(MessageType::Reply), 1, 2, 3];
        buf.extend_from_slice(&option::IA_NA.to_be_bytes());
        buf.extend_from_slice(&(ia_na.len() as u16).to_be_bytes());
        buf.extend_from_slice(&ia_na);
        buf.extend_from_slice(&option::DNS_SERVERS.to_be_bytes());
        buf.extend_from_slice(&16u16.to_be_bytes());
        buf.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());

        let reply = parse(&buf).unwrap();
        assert_eq!(reply.iaaddrs.len(), 1);
        assert_eq!(reply.iaaddrs[0].addr, Ipv6Addr::LOCALHOST);
        assert_eq!(reply.iaaddrs[0].valid_lifetime, 600);
        assert_eq!(reply.dns_servers, vec![Ipv6Addr::LOCALHOST]);
    }

    #[test]
    fn zero_iaaddr_lifetimes_clears_only_lifetime_bytes() {
        let mut ia_na = Vec::new();
        ia_na.extend_from_slice(&option::IAADDR.to_be_bytes());
        ia_na.extend_from_slice(&24u16.to_be_bytes());
        ia_na.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        ia_na.extend_from_slice(&300u32.to_be_bytes());
        ia_na.extend_from_slice(&600u32.to_be_bytes());
        zero_iaaddr_lifetimes(&mut ia_na);
        let addrs = parse_iaaddrs(&ia_na).unwrap();
        assert_eq!(addrs[0].addr, Ipv6Addr::LOCALHOST);
        assert_eq!(addrs[0].preferred_lifetime, 0);
        assert_eq!(addrs[0].valid_lifetime, 0);
    }
}
