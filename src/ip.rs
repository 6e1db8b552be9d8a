//! The IP reconciler (spec §5): walks one configuration section's records
//! and brings the stack's installed addresses and routes into agreement
//! with them. Ground truth: `iothconf_ip.c`'s `ip_update`/`ip_clean`.
//!
//! A record is live (I3) exactly when its timestamp is not older than its
//! section's timestamp; [`update`] installs newly-live records and removes
//! ones that fell behind, [`clean`] tears an entire section down
//! regardless of freshness.

use std::net::IpAddr;

use crate::stack::Stack;
use crate::store::{kind, Action, Payload, Store};

/// Installs every record of `section` whose timestamp is not older than
/// the section timestamp and is not yet installed, removes every one that
/// fell behind and was installed, and purges stale non-installable records
/// (DNS servers, search domains, server identifiers, advertised MTU).
/// `section` is one of the `*_TIMESTAMP` constants in [`kind`].
pub fn update(store: &Store, stack: &dyn Stack, ifindex: u32, section: u8) -> std::io::Result<()> {
    let id = stack.id();
    let ts = store.read_timestamp(id, ifindex, section);
    let mut first_err = None;

    store.forall_mask(Some(id), ifindex, section, kind::MASK_TYPE, |mut r| {
        let fresh = r.timestamp() >= ts;
        let action = match r.payload().clone() {
            Payload::Ipv4Addr(rec) => {
                install(&mut first_err, fresh, r.is_active(), || {
                    stack.ipaddr_add(ifindex, IpAddr::V4(rec.addr), rec.prefixlen)
                }, || stack.ipaddr_del(ifindex, IpAddr::V4(rec.addr), rec.prefixlen), &mut r)
            }
            Payload::Ipv6Addr(rec) => {
                install(&mut first_err, fresh, r.is_active(), || {
                    stack.ipaddr_add(ifindex, IpAddr::V6(rec.addr), rec.prefixlen)
                }, || stack.ipaddr_del(ifindex, IpAddr::V6(rec.addr), rec.prefixlen), &mut r)
            }
            Payload::Ipv4Gateway(gw) => install(
                &mut first_err,
                fresh,
                r.is_active(),
                || stack.iproute_add(ifindex, IpAddr::V4(gw)),
                || stack.iproute_del(ifindex, IpAddr::V4(gw)),
                &mut r,
            ),
            Payload::Ipv6Gateway(gw) => install(
                &mut first_err,
                fresh,
                r.is_active(),
                || stack.iproute_add(ifindex, IpAddr::V6(gw)),
                || stack.iproute_del(ifindex, IpAddr::V6(gw)),
                &mut r,
            ),
            Payload::Ipv6Meta(rec) if r.rtype() == kind::RD6_ROUTER => install(
                &mut first_err,
                fresh,
                r.is_active(),
                || stack.iproute_add(ifindex, IpAddr::V6(rec.addr)),
                || stack.iproute_del(ifindex, IpAddr::V6(rec.addr)),
                &mut r,
            ),
            // Router-advertised prefixes, MTU, DNS servers, search domains,
            // and server identifiers carry no installable state: they are
            // only ever kept or purged once stale.
            _ => {
                if fresh {
                    Action::Keep
                } else {
                    Action::Delete
                }
            }
        };
        action
    });

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn install(
    first_err: &mut Option<std::io::Error>,
    fresh: bool,
    active: bool,
    add: impl FnOnce() -> std::io::Result<()>,
    del: impl FnOnce() -> std::io::Result<()>,
    r: &mut crate::store::RecordRef,
) -> Action {
    if fresh {
        if !active {
            if let Err(e) = add() {
                record_err(first_err, e);
            } else {
                r.set_active();
            }
        }
        Action::Keep
    } else {
        if active {
            if let Err(e) = del() {
                record_err(first_err, e);
            }
        }
        Action::Delete
    }
}

fn record_err(first_err: &mut Option<std::io::Error>, err: std::io::Error) {
    if first_err.is_none() {
        *first_err = Some(err);
    }
}

/// Tears an entire section down: removes every installed address/route and
/// deletes every record of `section`, including its timestamp record.
pub fn clean(store: &Store, stack: &dyn Stack, ifindex: u32, section: u8) -> std::io::Result<()> {
    let id = stack.id();
    let mut first_err = None;

    store.forall_mask(Some(id), ifindex, section, kind::MASK_TYPE, |mut r| {
        if r.is_active() {
            let result = match r.payload().clone() {
                Payload::Ipv4Addr(rec) => stack.ipaddr_del(ifindex, IpAddr::V4(rec.addr), rec.prefixlen),
                Payload::Ipv6Addr(rec) => stack.ipaddr_del(ifindex, IpAddr::V6(rec.addr), rec.prefixlen),
                Payload::Ipv4Gateway(gw) => stack.iproute_del(ifindex, IpAddr::V4(gw)),
                Payload::Ipv6Gateway(gw) => stack.iproute_del(ifindex, IpAddr::V6(gw)),
                Payload::Ipv6Meta(rec) if r.rtype() == kind::RD6_ROUTER => {
                    stack.iproute_del(ifindex, IpAddr::V6(rec.addr))
                }
                _ => Ok(()),
            };
            if let Err(e) = result {
                record_err(&mut first_err, e);
            }
        }
        Action::Delete
    });

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{MacAddr, SocketSpec};
    use crate::store::{Ipv4Record, StackId};
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStack {
        added: Mutex<Vec<(IpAddr, u8)>>,
        removed: Mutex<Vec<(IpAddr, u8)>>,
    }

    impl Stack for RecordingStack {
        fn id(&self) -> StackId {
            1
        }
        fn if_nametoindex(&self, _name: &str) -> std::io::Result<u32> {
            Ok(1)
        }
        fn link_get_addr(&self, _ifindex: u32) -> std::io::Result<MacAddr> {
            Ok(MacAddr::new([0; 6]))
        }
        fn link_set_addr(&self, _ifindex: u32, _mac: MacAddr) -> std::io::Result<()> {
            Ok(())
        }
        fn link_set_updown(&self, _ifindex: u32, _up: bool) -> std::io::Result<()> {
            Ok(())
        }
        fn ipaddr_add(&self, _ifindex: u32, addr: IpAddr, prefixlen: u8) -> std::io::Result<()> {
            self.added.lock().unwrap().push((addr, prefixlen));
            Ok(())
        }
        fn ipaddr_del(&self, _ifindex: u32, addr: IpAddr, prefixlen: u8) -> std::io::Result<()> {
            self.removed.lock().unwrap().push((addr, prefixlen));
            Ok(())
        }
        fn iproute_add(&self, _ifindex: u32, _gateway: IpAddr) -> std::io::Result<()> {
            Ok(())
        }
        fn iproute_del(&self, _ifindex: u32, _gateway: IpAddr) -> std::io::Result<()> {
            Ok(())
        }
        fn socket(&self, _spec: SocketSpec) -> std::io::Result<Box<dyn crate::stack::Socket>> {
            Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "no sockets in tests"))
        }
    }

    #[test]
    fn update_installs_fresh_records_once() {
        let store = Store::new();
        let stack = RecordingStack::default();
        store.write_timestamp(1, 9, kind::STATIC_TIMESTAMP, 10);
        store.add(
            1,
            9,
            kind::STATIC4_ADDR,
            10,
            0,
            Payload::Ipv4Addr(Ipv4Record { addr: Ipv4Addr::new(192, 168, 1, 5), prefixlen: 24, leasetime: 0 }),
        );

        update(&store, &stack, 9, kind::STATIC_TIMESTAMP).unwrap();
        assert_eq!(stack.added.lock().unwrap().len(), 1);

        update(&store, &stack, 9, kind::STATIC_TIMESTAMP).unwrap();
        assert_eq!(stack.added.lock().unwrap().len(), 1, "already-active record is not re-installed");
    }

    #[test]
    fn update_removes_records_that_fell_behind() {
        let store = Store::new();
        let stack = RecordingStack::default();
        store.write_timestamp(1, 9, kind::STATIC_TIMESTAMP, 5);
        store.add(
            1,
            9,
            kind::STATIC4_ADDR,
            5,
            0,
            Payload::Ipv4Addr(Ipv4Record { addr: Ipv4Addr::new(10, 0, 0, 1), prefixlen: 8, leasetime: 0 }),
        );
        update(&store, &stack, 9, kind::STATIC_TIMESTAMP).unwrap();
        assert_eq!(stack.added.lock().unwrap().len(), 1);

        store.write_timestamp(1, 9, kind::STATIC_TIMESTAMP, 20);
        update(&store, &stack, 9, kind::STATIC_TIMESTAMP).unwrap();
        assert_eq!(stack.removed.lock().unwrap().len(), 1);
        let mut remaining = 0;
        store.forall(Some(1), 9, kind::STATIC4_ADDR, |_| {
            remaining += 1;
            Action::Keep
        });
        assert_eq!(remaining, 0, "the stale record itself is deleted from the store");
    }

    #[test]
    fn clean_removes_every_record_in_the_section() {
        let store = Store::new();
        let stack = RecordingStack::default();
        store.write_timestamp(1, 9, kind::STATIC_TIMESTAMP, 1);
        store.add(
            1,
            9,
            kind::STATIC4_ADDR,
            1,
            0,
            Payload::Ipv4Addr(Ipv4Record { addr: Ipv4Addr::new(10, 0, 0, 1), prefixlen: 8, leasetime: 0 }),
        );
        store.add(1, 9, kind::STATIC_DOMAIN, 1, 0, Payload::Domain("example.org".into()));
        update(&store, &stack, 9, kind::STATIC_TIMESTAMP).unwrap();

        clean(&store, &stack, 9, kind::STATIC_TIMESTAMP).unwrap();
        assert_eq!(stack.removed.lock().unwrap().len(), 1);
        assert_eq!(store.read_timestamp(1, 9, kind::STATIC4_ADDR), 0);
    }
}
