use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::transport::DatagramSocket;

/// First port handed out for a bind to port 0.
const EPHEMERAL_PORT_START: u16 = 49152;

#[derive(Debug, Default)]
struct Switch {
    inboxes: HashMap<SocketAddr, VecDeque<(SocketAddr, Vec<u8>)>>,
}

/// In-process datagram network. Sockets created from the same network can
/// reach each other by address; nothing touches the operating system.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    switch: Arc<Mutex<Switch>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn socket(&self) -> LoopbackSocket {
        LoopbackSocket {
            switch: Arc::clone(&self.switch),
            local_addr: None,
        }
    }

    pub fn is_bound(&self, addr: SocketAddr) -> bool {
        lock(&self.switch).inboxes.contains_key(&addr)
    }

    /// Datagrams sent but not yet received.
    pub fn in_flight(&self) -> usize {
        lock(&self.switch).inboxes.values().map(VecDeque::len).sum()
    }
}

fn lock(switch: &Mutex<Switch>) -> MutexGuard<'_, Switch> {
    switch.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct LoopbackSocket {
    switch: Arc<Mutex<Switch>>,
    local_addr: Option<SocketAddr>,
}

impl DatagramSocket for LoopbackSocket {
    fn bind(&mut self, ip: IpAddr, ports: RangeInclusive<u16>) -> io::Result<SocketAddr> {
        if self.local_addr.is_some() {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "socket already bound"));
        }
        let mut switch = lock(&self.switch);
        let candidates: Box<dyn Iterator<Item = u16>> = if ports == (0..=0) {
            Box::new(EPHEMERAL_PORT_START..=u16::MAX)
        } else {
            Box::new(ports)
        };
        for port in candidates {
            let addr = SocketAddr::new(ip, port);
            if !switch.inboxes.contains_key(&addr) {
                switch.inboxes.insert(addr, VecDeque::new());
                self.local_addr = Some(addr);
                return Ok(addr);
            }
        }
        Err(io::Error::new(io::ErrorKind::AddrInUse, "no free loopback port"))
    }

    fn send_to(&mut self, addr: SocketAddr, bytes: &[u8]) -> io::Result<usize> {
        let from = self
            .local_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is not bound"))?;
        // Like UDP, a datagram to nobody vanishes.
        if let Some(inbox) = lock(&self.switch).inboxes.get_mut(&addr) {
            inbox.push_back((from, bytes.to_vec()));
        }
        Ok(bytes.len())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let local_addr = self
            .local_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is not bound"))?;
        let mut switch = lock(&self.switch);
        let Some((from, bytes)) = switch
            .inboxes
            .get_mut(&local_addr)
            .and_then(VecDeque::pop_front)
        else {
            return Ok(None);
        };
        let size = bytes.len().min(buf.len());
        buf[..size].copy_from_slice(&bytes[..size]);
        Ok(Some((size, from)))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn close(&mut self) {
        if let Some(addr) = self.local_addr.take() {
            lock(&self.switch).inboxes.remove(&addr);
        }
    }
}

impl Drop for LoopbackSocket {
    fn drop(&mut self) {
        self.close();
    }
}
