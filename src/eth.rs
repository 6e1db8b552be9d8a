//! The Ethernet stage (spec §4.1): assigns the interface's MAC address and
//! brings the link up. Ground truth: `iothconf_eth`/`iothconf_cleaneth` in
//! `iothconf.c`.
//!
//! Unlike every other source, Ethernet writes nothing to the record store:
//! there is no lease to track and nothing for [`crate::ip`] to reconcile
//! later, only an immediate side effect on the stack.

use std::time::Duration;

use crate::hash;
use crate::stack::{MacAddr, Stack};

/// Sets `ifindex`'s MAC address — `mac` verbatim if given, otherwise one
/// derived deterministically from `fqdn` via [`hash::hashmac`] — and brings
/// the link up. Mirrors `iothconf_eth`'s brief settle delay after the
/// link-layer change, giving the driver time to renegotiate before any
/// protocol client opens a socket on top of it.
pub fn configure(stack: &dyn Stack, ifindex: u32, mac: Option<MacAddr>, fqdn: Option<&str>) -> std::io::Result<()> {
    if let Some(mac) = mac {
        net_debug!("eth: setting ifindex {ifindex} address to {mac} (explicit)");
        stack.link_set_addr(ifindex, mac)?;
    } else if let Some(fqdn) = fqdn {
        let mac = hash::hashmac(fqdn);
        net_debug!("eth: setting ifindex {ifindex} address to {mac} (hashed from '{fqdn}')");
        stack.link_set_addr(ifindex, mac)?;
    }
    stack.link_set_updown(ifindex, true)?;
    std::thread::sleep(Duration::from_secs(1));
    Ok(())
}

/// Brings the link down. There is no per-source record to clean up, so
/// this is the entire "clean" side of the Ethernet source.
pub fn clean(stack: &dyn Stack, ifindex: u32) -> std::io::Result<()> {
    net_debug!("eth: bringing ifindex {ifindex} down");
    stack.link_set_updown(ifindex, false)
}
