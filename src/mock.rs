//! An in-memory [`Stack`] implementation for this crate's own tests and for
//! downstream integration tests (feature `testing`; spec §9's "wrap behind
//! an interface so tests can instantiate an isolated store", extended to
//! the stack collaborator as described in `SPEC_FULL.md` §10.4).
//!
//! [`MockStack`] never touches a real interface. Address/route mutations
//! are recorded into plain `Vec`s a test can assert against; socket I/O is
//! driven by a caller-supplied responder closure that turns an outgoing
//! datagram into zero or more "replies" queued for the next `recv_timeout`,
//! letting a test stand in for a DHCPv4/DHCPv6/RD peer without any real
//! network access.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::stack::{MacAddr, SockAddr, Socket, SocketSpec, Stack};
use crate::store::StackId;

/// A single send/receive exchange recorded by [`MockStack`]'s default
/// bookkeeping: what was sent, and on what kind of socket.
type Responder = Arc<dyn Fn(SocketSpec, &[u8]) -> Vec<(Vec<u8>, SockAddr)> + Send + Sync>;

fn no_replies(_spec: SocketSpec, _buf: &[u8]) -> Vec<(Vec<u8>, SockAddr)> {
    Vec::new()
}

pub struct MockStack {
    id: StackId,
    ifindex_by_name: Mutex<HashMap<String, u32>>,
    mac: Mutex<HashMap<u32, MacAddr>>,
    up: Mutex<HashMap<u32, bool>>,
    pub added_addrs: Mutex<Vec<(u32, IpAddr, u8)>>,
    pub removed_addrs: Mutex<Vec<(u32, IpAddr, u8)>>,
    pub added_routes: Mutex<Vec<(u32, IpAddr)>>,
    pub removed_routes: Mutex<Vec<(u32, IpAddr)>>,
    responder: Mutex<Responder>,
}

impl MockStack {
    pub fn new(id: StackId) -> Self {
        MockStack {
            id,
            ifindex_by_name: Mutex::new(HashMap::new()),
            mac: Mutex::new(HashMap::new()),
            up: Mutex::new(HashMap::new()),
            added_addrs: Mutex::new(Vec::new()),
            removed_addrs: Mutex::new(Vec::new()),
            added_routes: Mutex::new(Vec::new()),
            removed_routes: Mutex::new(Vec::new()),
            responder: Mutex::new(Arc::new(no_replies)),
        }
    }

    /// Registers an interface name/index pair so `if_nametoindex` can
    /// resolve it, seeding its initial MAC.
    pub fn add_interface(&self, name: &str, ifindex: u32, mac: MacAddr) {
        self.ifindex_by_name.lock().unwrap().insert(name.to_string(), ifindex);
        self.mac.lock().unwrap().insert(ifindex, mac);
    }

    /// Installs a closure that turns an outgoing datagram into the replies
    /// (if any) a real peer would have sent back, standing in for a
    /// DHCPv4/DHCPv6/RD server or router across the lifetime of this stack.
    pub fn set_responder<F>(&self, f: F)
    where
        F: Fn(SocketSpec, &[u8]) -> Vec<(Vec<u8>, SockAddr)> + Send + Sync + 'static,
    {
        *self.responder.lock().unwrap() = Arc::new(f);
    }

    pub fn is_up(&self, ifindex: u32) -> bool {
        self.up.lock().unwrap().get(&ifindex).copied().unwrap_or(false)
    }
}

impl Stack for MockStack {
    fn id(&self) -> StackId {
        self.id
    }

    fn if_nametoindex(&self, name: &str) -> std::io::Result<u32> {
        self.ifindex_by_name
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such interface"))
    }

    fn link_get_addr(&self, ifindex: u32) -> std::io::Result<MacAddr> {
        self.mac
            .lock()
            .unwrap()
            .get(&ifindex)
            .copied()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such interface"))
    }

    fn link_set_addr(&self, ifindex: u32, mac: MacAddr) -> std::io::Result<()> {
        self.mac.lock().unwrap().insert(ifindex, mac);
        Ok(())
    }

    fn link_set_updown(&self, ifindex: u32, up: bool) -> std::io::Result<()> {
        self.up.lock().unwrap().insert(ifindex, up);
        Ok(())
    }

    fn ipaddr_add(&self, ifindex: u32, addr: IpAddr, prefixlen: u8) -> std::io::Result<()> {
        self.added_addrs.lock().unwrap().push((ifindex, addr, prefixlen));
        Ok(())
    }

    fn ipaddr_del(&self, ifindex: u32, addr: IpAddr, prefixlen: u8) -> std::io::Result<()> {
        self.removed_addrs.lock().unwrap().push((ifindex, addr, prefixlen));
        Ok(())
    }

    fn iproute_add(&self, ifindex: u32, gateway: IpAddr) -> std::io::Result<()> {
        self.added_routes.lock().unwrap().push((ifindex, gateway));
        Ok(())
    }

    fn iproute_del(&self, ifindex: u32, gateway: IpAddr) -> std::io::Result<()> {
        self.removed_routes.lock().unwrap().push((ifindex, gateway));
        Ok(())
    }

    fn socket(&self, spec: SocketSpec) -> std::io::Result<Box<dyn Socket>> {
        Ok(Box::new(MockSocket {
            spec,
            responder: self.responder.lock().unwrap().clone(),
            queue: Mutex::new(VecDeque::new()),
        }))
    }
}

struct MockSocket {
    spec: SocketSpec,
    responder: Responder,
    queue: Mutex<VecDeque<(Vec<u8>, SockAddr)>>,
}

impl Socket for MockSocket {
    fn send_to(&mut self, buf: &[u8], _dest: &SockAddr) -> std::io::Result<usize> {
        let replies = (self.responder)(self.spec, buf);
        self.queue.lock().unwrap().extend(replies);
        Ok(buf.len())
    }

    fn recv_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<Option<(usize, SockAddr)>> {
        let Some((datagram, from)) = self.queue.lock().unwrap().pop_front() else {
            return Ok(None);
        };
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(Some((n, from)))
    }
}
