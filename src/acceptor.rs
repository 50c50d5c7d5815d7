use crate::config::ServerConfig;
use log::warn;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A freshly accepted, non-blocking client socket
pub struct Accepted {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub token: usize,
}

/// The ConnectionAcceptor owns the listening socket and the count of live
/// connections, and hands out a unique token for every accepted client.
pub struct ConnectionAcceptor {
    listener: TcpListener,
    next_token: AtomicUsize,
    active: AtomicUsize,
    max_connections: usize,
}

impl ConnectionAcceptor {
    /// Create a new connection acceptor bound to the specified address
    pub fn new<A: ToSocketAddrs>(addr: A, backlog: i32, max_connections: usize) -> io::Result<Self> {
        let socket_addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "No socket addresses found")
        })?;

        let socket = Self::create_socket(&socket_addr, backlog)?;
        let listener = socket.into();

        Ok(Self {
            listener,
            next_token: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_connections,
        })
    }

    /// Create an acceptor from the network section of a configuration
    pub fn from_config(config: &ServerConfig) -> io::Result<Self> {
        Self::new(config.socket_address(), config.backlog_size, config.max_connections)
    }

    /// Accept a new connection
    ///
    /// Returns `Ok(None)` when a client was accepted but turned away because
    /// the connection limit is reached.
    pub fn accept(&self) -> io::Result<Option<Accepted>> {
        let (stream, peer_addr) = self.listener.accept()?;

        if self.active.load(Ordering::Acquire) >= self.max_connections {
            warn!("refusing {}: {} connections open", peer_addr, self.max_connections);
            return Ok(None);
        }

        // Configure the stream for non-blocking operation
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;

        self.active.fetch_add(1, Ordering::AcqRel);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        Ok(Some(Accepted {
            stream,
            peer_addr,
            token,
        }))
    }

    /// Record that an accepted connection has been closed
    pub fn release(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    /// Number of connections accepted and not yet released
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Get the local address this acceptor is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Create a properly configured socket
    fn create_socket(addr: &SocketAddr, backlog: i32) -> io::Result<Socket> {
        let domain = if addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;

        socket.bind(&socket2::SockAddr::from(*addr))?;
        socket.listen(backlog)?;

        Ok(socket)
    }
}

impl AsRawFd for ConnectionAcceptor {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}
