use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::ops::RangeInclusive;

/// Non-blocking datagram socket the session sends and receives through.
pub trait DatagramSocket: Send {
    /// Binds to the first free port in `ports` and returns the local address.
    fn bind(&mut self, ip: IpAddr, ports: RangeInclusive<u16>) -> io::Result<SocketAddr>;

    fn send_to(&mut self, addr: SocketAddr, bytes: &[u8]) -> io::Result<usize>;

    /// Returns `Ok(None)` when nothing is waiting.
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn close(&mut self);
}

/// [`DatagramSocket`] over the operating system's UDP stack.
#[derive(Debug, Default)]
pub struct UdpTransport {
    socket: Option<UdpSocket>,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn socket(&self) -> io::Result<&UdpSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is not bound"))
    }
}

impl DatagramSocket for UdpTransport {
    fn bind(&mut self, ip: IpAddr, ports: RangeInclusive<u16>) -> io::Result<SocketAddr> {
        let mut last_error = None;
        for port in ports {
            match UdpSocket::bind((ip, port)) {
                Ok(socket) => {
                    socket.set_nonblocking(true)?;
                    let local_addr = socket.local_addr()?;
                    self.socket = Some(socket);
                    return Ok(local_addr);
                }
                Err(e) => {
                    log::debug!("Port {} unavailable: {}", port, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty port range")))
    }

    fn send_to(&mut self, addr: SocketAddr, bytes: &[u8]) -> io::Result<usize> {
        self.socket()?.send_to(bytes, addr)
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let socket = self.socket()?;
        loop {
            match socket.recv_from(buf) {
                Ok((size, addr)) => return Ok(Some((size, addr))),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                // ICMP port unreachable from an earlier send surfaces here on some platforms.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|socket| socket.local_addr().ok())
    }

    fn close(&mut self) {
        self.socket = None;
    }
}
