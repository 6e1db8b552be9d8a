//! End-to-end exercises of [`iothconf::apply`] against a mock `Stack`,
//! standing in for the command-line test harness spec.md places out of
//! scope (§1). Each test drives a full directive string through parsing,
//! clean/acquire sequencing, and reconciliation, and asserts on what the
//! mock stack collaborator observed.

use std::sync::atomic::{AtomicUsize, Ordering};

use byteorder::{BigEndian, ByteOrder};
use std::net::Ipv4Addr;

use iothconf::config::bits;
use iothconf::mock::MockStack;
use iothconf::stack::{MacAddr, SockAddr, SocketSpec};
use iothconf::store::Store;

fn ip_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut iter = data.chunks_exact(2);
    for chunk in &mut iter {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = iter.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xffff);
    }
    sum as u16
}

/// A DHCPv4 OFFER or ACK, built the same way a real server would shape one
/// (MASK, ROUTER, DNS, LEASETIME, DOMAIN_NAME options) without depending on
/// this crate's own request parser — the test stands in for the server,
/// not the client.
fn build_reply(msg_type: u8, xid: [u8; 4]) -> Vec<u8> {
    let mut options = Vec::new();
    options.push(53); // message type
    options.push(1);
    options.push(msg_type);
    options.push(54); // server id
    options.push(4);
    options.extend_from_slice(&[10, 0, 0, 1]);
    options.push(1); // subnet mask
    options.push(4);
    options.extend_from_slice(&[255, 255, 255, 0]);
    options.push(3); // router
    options.push(4);
    options.extend_from_slice(&[10, 0, 0, 1]);
    options.push(6); // dns
    options.push(4);
    options.extend_from_slice(&[10, 0, 0, 1]);
    options.push(51); // lease time
    options.push(4);
    options.extend_from_slice(&3600u32.to_be_bytes());
    options.push(15); // domain name
    options.push(11);
    options.extend_from_slice(b"example.org");
    options.push(255);

    let mut bootp = vec![0u8; 236];
    bootp[0] = 2; // BOOTREPLY
    bootp[1] = 1;
    bootp[2] = 6;
    bootp[4..8].copy_from_slice(&xid);
    bootp[16..20].copy_from_slice(&Ipv4Addr::new(10, 0, 0, 2).octets()); // yiaddr

    let mut udp = vec![0u8; 8];
    BigEndian::write_u16(&mut udp[0..2], 67);
    BigEndian::write_u16(&mut udp[2..4], 68);
    let udp_len = (udp.len() + bootp.len() + 4 + options.len()) as u16;
    BigEndian::write_u16(&mut udp[4..6], udp_len);

    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    let total_len = 20 + udp_len;
    BigEndian::write_u16(&mut ip[2..4], total_len);
    ip[8] = 64;
    ip[9] = 17;
    ip[12..16].copy_from_slice(&Ipv4Addr::new(10, 0, 0, 1).octets());
    ip[16..20].copy_from_slice(&Ipv4Addr::BROADCAST.octets());
    let checksum = ip_checksum(&ip);
    BigEndian::write_u16(&mut ip[10..12], !checksum);

    let mut out = ip;
    out.extend_from_slice(&udp);
    out.extend_from_slice(&bootp);
    out.extend_from_slice(&[0x63, 0x82, 0x53, 0x63]);
    out.extend_from_slice(&options);
    out
}

fn xid_from_request(buf: &[u8]) -> [u8; 4] {
    let bootp_off = 20 + 8;
    [buf[bootp_off + 4], buf[bootp_off + 5], buf[bootp_off + 6], buf[bootp_off + 7]]
}

fn dhcp4_server() -> MockStack {
    let stack = MockStack::new(1);
    stack.add_interface("eth0", 9, MacAddr::new([0x02, 0, 0, 0, 0, 9]));
    let exchange = AtomicUsize::new(0);
    stack.set_responder(move |spec, buf| {
        let SocketSpec::LinkRaw { .. } = spec else { return Vec::new() };
        let xid = xid_from_request(buf);
        let dest = SockAddr::Link { ifindex: 9, mac: MacAddr::BROADCAST };
        match exchange.fetch_add(1, Ordering::SeqCst) {
            0 => vec![(build_reply(2 /* OFFER */, xid), dest)],
            1 => vec![(build_reply(5 /* ACK */, xid), dest)],
            _ => Vec::new(),
        }
    });
    stack
}

#[test]
fn dhcp4_end_to_end_installs_address_and_route() {
    let store = Store::new();
    let stack = dhcp4_server();

    let mask = iothconf::apply(&store, &stack, "iface=eth0,dhcp,fqdn=host.example.org").unwrap();
    assert_eq!(mask, bits::DHCP4);

    let added = stack.added_addrs.lock().unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].2, 24);
    let routes = stack.added_routes.lock().unwrap();
    assert_eq!(routes.len(), 1);
}

#[test]
fn unreachable_dhcp_server_yields_empty_mask_and_no_stack_mutation() {
    let store = Store::new();
    let stack = MockStack::new(2);
    stack.add_interface("eth0", 9, MacAddr::new([0x02, 0, 0, 0, 0, 9]));

    let mask = iothconf::apply(&store, &stack, "iface=eth0,dhcp").unwrap();
    assert_eq!(mask, 0);
    assert!(stack.added_addrs.lock().unwrap().is_empty());
}

#[test]
fn static_and_eth_sections_compose_in_one_directive() {
    let store = Store::new();
    let stack = MockStack::new(3);
    stack.add_interface("eth0", 9, MacAddr::new([0x02, 0, 0, 0, 0, 9]));

    let mask = iothconf::apply(&store, &stack, "iface=eth0,eth,ip=192.168.1.10/24,gw=192.168.1.1").unwrap();
    assert_eq!(mask, bits::ETH | bits::STATIC);
    assert!(stack.is_up(9));
    assert_eq!(stack.added_addrs.lock().unwrap().len(), 1);
    assert_eq!(stack.added_routes.lock().unwrap().len(), 1);
}

#[test]
fn unknown_interface_fails_before_any_source_runs() {
    let store = Store::new();
    let stack = MockStack::new(4);
    let err = iothconf::apply(&store, &stack, "iface=nope,dhcp").unwrap_err();
    assert!(matches!(err, iothconf::EngineError::NoDevice));
}
