//! Listening socket: create, bind, listen, accept, close.

use socket2::{Domain, Protocol, SockAddr, Type};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream},
};
use thiserror::Error;

/// A failed socket operation, carrying the OS error.
///
/// # Examples
/// ```
/// use trellis_web::Socket;
///
/// let err = Socket::create("not an address", 8000, false).unwrap_err();
/// assert_eq!(err.op, "create");
/// ```
#[derive(Debug, Error)]
#[error("socket {op} failed: {source}")]
pub struct SocketError {
    /// Name of the failed operation (`create`, `bind`, `listen`, ...).
    pub op: &'static str,
    #[source]
    pub source: io::Error,
}

impl SocketError {
    #[inline]
    fn new(op: &'static str, source: io::Error) -> Self {
        Self { op, source }
    }

    /// The OS error code, when the failure came from a system call.
    #[inline]
    pub fn code(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}

/// A TCP listening socket, IPv4 or IPv6 (chosen at creation, never both).
///
/// A thin layer over [`socket2::Socket`]: each step of the usual
/// create/bind/listen sequence is a separate call, so the server can report
/// exactly which one failed.
///
/// # Examples
/// ```
/// use trellis_web::Socket;
///
/// let mut socket = Socket::create("127.0.0.1", 0, false).unwrap();
/// socket.set_reuse_addr().unwrap();
/// socket.bind().unwrap();
/// socket.listen(16).unwrap();
///
/// assert_ne!(socket.local_addr().unwrap().port(), 0);
/// socket.close();
/// assert!(socket.is_closed());
/// ```
#[derive(Debug)]
pub struct Socket {
    inner: Option<socket2::Socket>,
    addr: SocketAddr,
    use_ipv6: bool,
}

impl Socket {
    /// Opens a TCP socket for `host:port`.
    ///
    /// `host` must be an IP literal of the selected family; `localhost` is
    /// accepted as the loopback address.
    pub fn create(host: &str, port: u16, use_ipv6: bool) -> Result<Self, SocketError> {
        let ip = parse_host(host, use_ipv6).map_err(|e| SocketError::new("create", e))?;
        let domain = match use_ipv6 {
            true => Domain::IPV6,
            false => Domain::IPV4,
        };

        let inner = socket2::Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| SocketError::new("create", e))?;
        if use_ipv6 {
            inner
                .set_only_v6(true)
                .map_err(|e| SocketError::new("create", e))?;
        }

        Ok(Self {
            inner: Some(inner),
            addr: SocketAddr::new(ip, port),
            use_ipv6,
        })
    }

    #[inline]
    fn raw(&self, op: &'static str) -> Result<&socket2::Socket, SocketError> {
        self.inner.as_ref().ok_or_else(|| {
            SocketError::new(op, io::Error::new(io::ErrorKind::NotConnected, "socket is closed"))
        })
    }

    /// Enables `SO_REUSEADDR`, so a restarted server can bind right away.
    pub fn set_reuse_addr(&self) -> Result<(), SocketError> {
        self.raw("set_reuse_addr")?
            .set_reuse_address(true)
            .map_err(|e| SocketError::new("set_reuse_addr", e))
    }

    pub fn bind(&self) -> Result<(), SocketError> {
        self.raw("bind")?
            .bind(&SockAddr::from(self.addr))
            .map_err(|e| SocketError::new("bind", e))
    }

    pub fn listen(&self, backlog: i32) -> Result<(), SocketError> {
        self.raw("listen")?
            .listen(backlog)
            .map_err(|e| SocketError::new("listen", e))
    }

    /// Waits for the next connection.
    ///
    /// The accepted stream is always in blocking mode.
    pub fn accept(&self) -> Result<(TcpStream, SocketAddr), SocketError> {
        let (conn, addr) = self
            .raw("accept")?
            .accept()
            .map_err(|e| SocketError::new("accept", e))?;

        conn.set_nonblocking(false)
            .map_err(|e| SocketError::new("accept", e))?;
        let addr = addr.as_socket().ok_or_else(|| {
            SocketError::new(
                "accept",
                io::Error::new(io::ErrorKind::InvalidData, "peer is not an IP address"),
            )
        })?;

        Ok((TcpStream::from(conn), addr))
    }

    pub fn set_blocking(&self, blocking: bool) -> Result<(), SocketError> {
        self.raw("set_blocking")?
            .set_nonblocking(!blocking)
            .map_err(|e| SocketError::new("set_blocking", e))
    }

    /// The bound address, with the real port when `0` was requested.
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        let addr = self
            .raw("local_addr")?
            .local_addr()
            .map_err(|e| SocketError::new("local_addr", e))?;

        Ok(addr.as_socket().unwrap_or(self.addr))
    }

    #[inline]
    pub fn use_ipv6(&self) -> bool {
        self.use_ipv6
    }

    /// Closes the socket. Closing twice is a no-op.
    #[inline]
    pub fn close(&mut self) {
        self.inner = None;
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

fn parse_host(host: &str, use_ipv6: bool) -> io::Result<IpAddr> {
    let invalid = || {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{host:?} is not an IPv{} address", if use_ipv6 { 6 } else { 4 }),
        )
    };

    match (host, use_ipv6) {
        ("localhost", false) => Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        ("localhost", true) => Ok(IpAddr::V6(Ipv6Addr::LOCALHOST)),
        (_, false) => host.parse::<Ipv4Addr>().map(IpAddr::V4).map_err(|_| invalid()),
        (_, true) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<Ipv6Addr>()
            .map(IpAddr::V6)
            .map_err(|_| invalid()),
    }
}
