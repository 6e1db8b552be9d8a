//! Deterministic MD5-derived link and IPv6 host identifiers, and EUI-64
//! synthesis from a MAC address. Ground truth: `iothconf_hash.c`.
//!
//! Hashing a name always gives the same MAC/address back, so a node
//! configured by FQDN keeps a stable identity across reconfigurations
//! without needing to persist anything.

use md5::{Digest, Md5};
use std::net::Ipv6Addr;

use crate::stack::MacAddr;

fn digest(name: &str) -> [u8; 16] {
    let name = name.strip_suffix('.').unwrap_or(name);
    let mut hasher = Md5::new();
    hasher.update(name.as_bytes());
    hasher.finalize().into()
}

/// Derives a locally-administered, unicast MAC address from `name`.
///
/// Bytes 0..3 of MD5(name) become the OUI, bytes 5..8 become the NIC part;
/// byte 0 then has bit 0x02 set (locally administered) and bit 0x01
/// cleared (unicast). Mirrors `iothconf_hashmac`.
pub fn hashmac(name: &str) -> MacAddr {
    let d = digest(name);
    let mut mac = [0u8; 6];
    mac[0..3].copy_from_slice(&d[0..3]);
    mac[3..6].copy_from_slice(&d[5..8]);
    mac[0] |= 0x02;
    mac[0] &= !0x01;
    MacAddr(mac)
}

/// Derives a host identifier for `addr` from `name`: XORs address bytes
/// 8..16 with MD5(name)[0..8], then clears the low two bits of byte 8 (the
/// locally-administered/universal and group/individual bits collapsed to
/// "locally administered, unicast"). Mirrors `iothconf_hashaddr6`.
pub fn hashaddr6(addr: Ipv6Addr, name: &str) -> Ipv6Addr {
    let d = digest(name);
    let mut octets = addr.octets();
    for i in 8..16 {
        octets[i] ^= d[i - 8];
    }
    octets[8] &= !0x03;
    Ipv6Addr::from(octets)
}

/// Builds an EUI-64 interface identifier for `addr` from `mac`: copies MAC
/// bytes 0..3 into address bytes 8..11, inserts the `ff:fe` marker, copies
/// MAC bytes 3..6 into address bytes 13..16, and flips the
/// locally-administered bit of byte 8. Mirrors `iothconf_eui64`.
pub fn eui64(addr: Ipv6Addr, mac: MacAddr) -> Ipv6Addr {
    let mac = mac.0;
    let mut octets = addr.octets();
    octets[8] = mac[0];
    octets[9] = mac[1];
    octets[10] = mac[2];
    octets[11] = 0xff;
    octets[12] = 0xfe;
    octets[13] = mac[3];
    octets[14] = mac[4];
    octets[15] = mac[5];
    octets[8] ^= 0x02;
    Ipv6Addr::from(octets)
}
