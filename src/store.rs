//! The record store: a process-wide, mutex-serialized collection of
//! timestamped [`ConfigRecord`]s, keyed by `(stack, ifindex, type, payload)`.
//!
//! This is a direct re-architecture of `iothconf_data.c`'s singly linked
//! list plus callback-driven iteration. The original stores a fixed header
//! immediately before an opaque payload and hands callbacks a pointer to the
//! payload, recovering the header by pointer arithmetic; here the store
//! hands out a [`RecordRef`] accessor instead, and the payload is a typed
//! [`Payload`] rather than an opaque byte blob.
//!
//! Every operation below acquires a single internal [`Mutex`] for its
//! entire duration, matching the single process-wide mutex of the original
//! (`ioth_confdata_mutex`). Callbacks passed to [`Store::forall_mask`] run
//! with the lock held; they must not call back into the store.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// `struct ioth_confdata_ipaddr`: an IPv4 address plus prefix length and
/// DHCP lease time (`TIME_INFINITY` = 0xffff_ffff for static/unbounded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Record {
    pub addr: Ipv4Addr,
    pub prefixlen: u8,
    pub leasetime: u32,
}

/// `struct ioth_confdata_ip6addr`: an IPv6 address plus prefix length, RA
/// flags, and preferred/valid lifetimes (0xffff_ffff = infinite). Also used
/// for RD6_PREFIX and RD6_ROUTER, whose `addr` field holds the prefix or
/// the router's address respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Record {
    pub addr: Ipv6Addr,
    pub prefixlen: u8,
    pub flags: u8,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
}

/// Lifetime value meaning "never expires" (`TIME_INFINITY` in the original).
pub const INFINITE_LIFETIME: u32 = 0xffff_ffff;

/// Identifies a particular stack instance that owns a record. The original
/// keys records by the stack's pointer; callers here supply any value
/// stable for the lifetime of their `Stack` (see [`crate::stack::Stack::id`]).
pub type StackId = u64;

/// Record type tags. The high nibble names the source (static/DHCPv4/RD/
/// DHCPv6), the low nibble the kind. Mirrors `iothconf_data.h` bit for bit.
pub mod kind {
    pub const STATIC_TIMESTAMP: u8 = 0x70;
    pub const STATIC4_ADDR: u8 = 0x72;
    pub const STATIC4_ROUTE: u8 = 0x73;
    pub const STATIC6_ADDR: u8 = 0x74;
    pub const STATIC6_ROUTE: u8 = 0x75;
    pub const STATIC4_DNS: u8 = 0x78;
    pub const STATIC6_DNS: u8 = 0x79;
    pub const STATIC_DOMAIN: u8 = 0x7a;

    pub const DHCP4_TIMESTAMP: u8 = 0x40;
    pub const DHCP4_SERVER: u8 = 0x41;
    pub const DHCP4_ADDR: u8 = 0x42;
    pub const DHCP4_ROUTER: u8 = 0x43;
    pub const DHCP4_DNS: u8 = 0x48;
    pub const DHCP4_DOMAIN: u8 = 0x4a;

    pub const DHCP6_TIMESTAMP: u8 = 0x60;
    pub const DHCP6_SERVERID: u8 = 0x61;
    pub const DHCP6_ADDR: u8 = 0x62;
    pub const DHCP6_DNS: u8 = 0x68;
    pub const DHCP6_DOMAIN: u8 = 0x6a;

    pub const RD6_TIMESTAMP: u8 = 0x50;
    pub const RD6_PREFIX: u8 = 0x51;
    pub const RD6_ADDR: u8 = 0x52;
    pub const RD6_ROUTER: u8 = 0x53;
    pub const RD6_MTU: u8 = 0x5f;

    /// The section (high nibble) a type tag belongs to.
    pub const fn section(t: u8) -> u8 {
        t & 0xf0
    }

    pub const MASK_ALL: u8 = 0xff;
    pub const MASK_TYPE: u8 = 0xf0;
    pub const DNS_BASE: u8 = 0x48;
    pub const DNS_MASK: u8 = 0xce;
    pub const DOM_BASE: u8 = 0x4a;
    pub const DOM_MASK: u8 = 0xce;
    pub const DNS_DOM_BASE: u8 = 0x48;
    pub const DNS_DOM_MASK: u8 = 0xcc;
}

/// The `ACTIVE` flag bit (bit 0): set once a record's address/route has
/// actually been installed in the stack, cleared once removed.
pub const ACTIVE: u8 = 0x01;

/// A record's typed payload. Fixed-shape per `type`, per `iothconf_data.h`'s
/// payload comments; `Empty` is used for the payload-less section-timestamp
/// record (type's low nibble 0).
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Ipv4Addr(Ipv4Record),
    Ipv4Gateway(std::net::Ipv4Addr),
    Ipv6Gateway(std::net::Ipv6Addr),
    Ipv6Addr(Ipv6Record),
    /// An RD6_ROUTER / RD6_PREFIX-shaped record that is not itself an
    /// installable address (router advertisement metadata).
    Ipv6Meta(Ipv6Record),
    Dns4(std::net::Ipv4Addr),
    Dns6(std::net::Ipv6Addr),
    /// A single domain name (static `domain=` directive, or the one name
    /// DHCPv4's OPTION_DOMNAME carries).
    Domain(String),
    /// Several domain names from one acquisition (DHCPv6's RFC 1035
    /// DOMAIN_LIST option, decoded to a multistring and then to owned
    /// strings).
    DomainList(Vec<String>),
    Server4(std::net::Ipv4Addr),
    /// The DHCPv6 server identifier, copied verbatim from the reply.
    ServerId(Vec<u8>),
    Mtu(u32),
}

struct Entry {
    stack: StackId,
    ifindex: u32,
    rtype: u8,
    timestamp: i64,
    flags: u8,
    payload: Payload,
}

/// An accessor handed to [`Store::forall_mask`] callbacks in place of a raw
/// pointer into the list node. Mutating methods operate on the record still
/// held under the store's lock.
pub struct RecordRef<'a> {
    entry: &'a mut Entry,
}

impl<'a> RecordRef<'a> {
    pub fn stack(&self) -> StackId {
        self.entry.stack
    }

    pub fn ifindex(&self) -> u32 {
        self.entry.ifindex
    }

    pub fn rtype(&self) -> u8 {
        self.entry.rtype
    }

    pub fn timestamp(&self) -> i64 {
        self.entry.timestamp
    }

    pub fn payload(&self) -> &Payload {
        &self.entry.payload
    }

    /// Sets the `ACTIVE` bit, returning whether it was already set.
    pub fn set_active(&mut self) -> bool {
        let was = self.entry.flags & ACTIVE != 0;
        self.entry.flags |= ACTIVE;
        was
    }

    /// Clears the `ACTIVE` bit, returning whether it was set.
    pub fn clear_active(&mut self) -> bool {
        let was = self.entry.flags & ACTIVE != 0;
        self.entry.flags &= !ACTIVE;
        was
    }

    pub fn is_active(&self) -> bool {
        self.entry.flags & ACTIVE != 0
    }
}

/// What a [`Store::forall_mask`] callback wants done with the record it was
/// just handed. Replaces the original's bitmask return value
/// (`IOTH_CONFDATA_FORALL_DELETE` / `_BREAK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Keep,
    Delete,
    Stop,
    DeleteAndStop,
}

impl Action {
    fn wants_delete(self) -> bool {
        matches!(self, Action::Delete | Action::DeleteAndStop)
    }

    fn wants_stop(self) -> bool {
        matches!(self, Action::Stop | Action::DeleteAndStop)
    }
}

/// A sentinel for `forall_mask`'s `stack` parameter meaning "any stack",
/// i.e. `IOTH_CONFDATA_ANYSTACK`.
pub const ANY_STACK: Option<StackId> = None;

#[derive(Default)]
pub struct Store {
    records: Mutex<Vec<Entry>>,
}

impl Store {
    pub fn new() -> Self {
        Store {
            records: Mutex::new(Vec::new()),
        }
    }

    /// Adds a record, or, if one already exists for this
    /// `(stack, ifindex, type, payload)`, bumps its timestamp to the
    /// maximum of the two (I1).
    pub fn add(
        &self,
        stack: StackId,
        ifindex: u32,
        rtype: u8,
        timestamp: i64,
        flags: u8,
        payload: Payload,
    ) {
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records
            .iter_mut()
            .find(|e| e.stack == stack && e.ifindex == ifindex && e.rtype == rtype && e.payload == payload)
        {
            if timestamp > existing.timestamp {
                existing.timestamp = timestamp;
            }
            return;
        }
        records.push(Entry {
            stack,
            ifindex,
            rtype,
            timestamp,
            flags,
            payload,
        });
    }

    /// Iterates every record matching `(stack, ifindex, type & mask)`,
    /// invoking `callback` for each. Deletion and early stop take effect
    /// immediately, under the lock, exactly as the callback requests.
    pub fn forall_mask<F>(&self, stack: Option<StackId>, ifindex: u32, rtype: u8, mask: u8, mut callback: F)
    where
        F: FnMut(RecordRef) -> Action,
    {
        let wanted = rtype & mask;
        let mut records = self.records.lock().unwrap();
        let mut i = 0;
        while i < records.len() {
            let matches = (stack.is_none() || stack == Some(records[i].stack))
                && (ifindex == 0 || ifindex == records[i].ifindex)
                && (mask == 0 || wanted == (records[i].rtype & mask));
            if !matches {
                i += 1;
                continue;
            }
            let action = callback(RecordRef {
                entry: &mut records[i],
            });
            if action.wants_delete() {
                records.remove(i);
            } else {
                i += 1;
            }
            if action.wants_stop() {
                break;
            }
        }
    }

    /// `forall_mask` with an exact match on `type` (mask = 0xff).
    pub fn forall<F>(&self, stack: Option<StackId>, ifindex: u32, rtype: u8, callback: F)
    where
        F: FnMut(RecordRef) -> Action,
    {
        self.forall_mask(stack, ifindex, rtype, kind::MASK_ALL, callback)
    }

    /// Deletes every record of `type` whose timestamp is strictly less than
    /// `max_timestamp`, or every matching record if `max_timestamp == 0`.
    pub fn free(&self, stack: StackId, ifindex: u32, rtype: u8, max_timestamp: i64) {
        self.forall(Some(stack), ifindex, rtype, |r| {
            if max_timestamp == 0 || r.timestamp() < max_timestamp {
                Action::Delete
            } else {
                Action::Keep
            }
        });
    }

    /// Reads the section timestamp for `type`'s high nibble, or 0 if absent.
    pub fn read_timestamp(&self, stack: StackId, ifindex: u32, rtype: u8) -> i64 {
        let section = kind::section(rtype);
        let mut timestamp = 0;
        self.forall(Some(stack), ifindex, section, |r| {
            timestamp = r.timestamp();
            Action::Stop
        });
        timestamp
    }

    /// Returns a wall-clock timestamp strictly greater than the current
    /// section timestamp, sleeping out the remainder of the current second
    /// if the two would otherwise collide (I2).
    pub fn new_timestamp(&self, stack: StackId, ifindex: u32, rtype: u8) -> i64 {
        let old = self.read_timestamp(stack, ifindex, rtype);
        loop {
            let now = now_secs();
            if now > old {
                return now;
            }
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .subsec_nanos();
            std::thread::sleep(Duration::from_nanos(1_000_000_000 - nanos as u64));
        }
    }

    /// Installs or bumps the section-timestamp record for `type`'s section.
    pub fn write_timestamp(&self, stack: StackId, ifindex: u32, rtype: u8, timestamp: i64) {
        self.add(stack, ifindex, kind::section(rtype), timestamp, 0, Payload::Empty);
    }

    /// Removes the section-timestamp record for `type`'s section.
    pub fn del_timestamp(&self, stack: StackId, ifindex: u32, rtype: u8) {
        let section = kind::section(rtype);
        self.forall(Some(stack), ifindex, section, |_| Action::Delete);
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn dedup_on_add_keeps_max_timestamp() {
        let store = Store::new();
        for ts in [5, 2, 9, 1] {
            store.add(1, 7, kind::STATIC4_DNS, ts, 0, Payload::Dns4(Ipv4Addr::new(1, 2, 3, 4)));
        }
        let mut seen = 0;
        let mut ts = 0;
        store.forall(Some(1), 7, kind::STATIC4_DNS, |r| {
            seen += 1;
            ts = r.timestamp();
            Action::Keep
        });
        assert_eq!(seen, 1);
        assert_eq!(ts, 9);
    }

    #[test]
    fn distinct_payloads_are_distinct_records() {
        let store = Store::new();
        store.add(1, 7, kind::STATIC4_DNS, 1, 0, Payload::Dns4(Ipv4Addr::new(1, 1, 1, 1)));
        store.add(1, 7, kind::STATIC4_DNS, 1, 0, Payload::Dns4(Ipv4Addr::new(8, 8, 8, 8)));
        let mut count = 0;
        store.forall(Some(1), 7, kind::STATIC4_DNS, |_| {
            count += 1;
            Action::Keep
        });
        assert_eq!(count, 2);
    }

    #[test]
    fn forall_mask_can_delete_and_stop() {
        let store = Store::new();
        for i in 0..5u8 {
            store.add(1, 7, kind::STATIC_DOMAIN, i as i64, 0, Payload::Domain(format!("d{i}")));
        }
        let mut visited = 0;
        store.forall(Some(1), 7, kind::STATIC_DOMAIN, |r| {
            visited += 1;
            if r.timestamp() == 2 {
                Action::DeleteAndStop
            } else {
                Action::Keep
            }
        });
        assert_eq!(visited, 3);
        let mut remaining = 0;
        store.forall(Some(1), 7, kind::STATIC_DOMAIN, |_| {
            remaining += 1;
            Action::Keep
        });
        assert_eq!(remaining, 4);
    }

    #[test]
    fn section_timestamp_roundtrip() {
        let store = Store::new();
        assert_eq!(store.read_timestamp(1, 7, kind::STATIC4_ADDR), 0);
        store.write_timestamp(1, 7, kind::STATIC_TIMESTAMP, 42);
        assert_eq!(store.read_timestamp(1, 7, kind::STATIC4_ADDR), 42);
        store.del_timestamp(1, 7, kind::STATIC_TIMESTAMP);
        assert_eq!(store.read_timestamp(1, 7, kind::STATIC4_ADDR), 0);
    }

    #[test]
    fn new_timestamp_is_monotone() {
        let store = Store::new();
        let t1 = store.new_timestamp(1, 7, kind::STATIC_TIMESTAMP);
        store.write_timestamp(1, 7, kind::STATIC_TIMESTAMP, t1);
        let t2 = store.new_timestamp(1, 7, kind::STATIC_TIMESTAMP);
        assert!(t2 > t1);
    }

    #[test]
    fn free_deletes_stale_records() {
        let store = Store::new();
        store.add(1, 7, kind::STATIC4_DNS, 1, 0, Payload::Dns4(Ipv4Addr::new(1, 1, 1, 1)));
        store.add(1, 7, kind::STATIC4_DNS, 5, 0, Payload::Dns4(Ipv4Addr::new(2, 2, 2, 2)));
        store.free(1, 7, kind::STATIC4_DNS, 3);
        let mut count = 0;
        store.forall(Some(1), 7, kind::STATIC4_DNS, |_| {
            count += 1;
            Action::Keep
        });
        assert_eq!(count, 1);
    }
}
