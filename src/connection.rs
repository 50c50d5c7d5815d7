use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::http::{HttpParser, Outcome, Parsed, Request};
use crate::registry::{Registry, Source};
use crate::resource::{ResolvedFile, Resolver};
use crate::response::{build_response, Segments};
use log::{debug, error, info, warn};
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

/// Represents the current state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for (more of) a request
    Reading,
    /// A response is queued and partly sent
    Writing,
    /// Finished; the owner should call [`Connection::close`]
    Closing,
    Closed,
}

/// What a send attempt ended with
enum Sent {
    /// Nothing was queued
    Idle,
    /// The socket buffer is full
    Blocked,
    Complete,
}

/// One accepted client socket and everything needed to serve it
///
/// The connection is driven entirely by readiness events: the owner calls
/// [`on_readable`](Connection::on_readable) or
/// [`on_writable`](Connection::on_writable), and the connection re-arms itself
/// through its [`Registry`] before returning. Once
/// [`is_finished`](Connection::is_finished) reports true the owner closes it.
pub struct Connection<S> {
    stream: S,
    peer_addr: SocketAddr,
    source: Source,
    registry: Arc<dyn Registry>,
    resolver: Arc<Resolver>,
    state: ConnectionState,
    read_buf: ReadBuffer,
    write_buf: WriteBuffer,
    parser: HttpParser,
    file: ResolvedFile,
    segments: Segments,
}

impl<S: Read + Write + AsRawFd> Connection<S> {
    /// Create a new connection for an already non-blocking stream
    pub fn new(
        stream: S,
        peer_addr: SocketAddr,
        token: usize,
        registry: Arc<dyn Registry>,
        resolver: Arc<Resolver>,
        config: &ServerConfig,
    ) -> Self {
        let source = Source {
            fd: stream.as_raw_fd(),
            token,
        };
        let path_capacity = resolver.path_capacity();

        let mut connection = Self {
            stream,
            peer_addr,
            source,
            registry,
            resolver,
            state: ConnectionState::Reading,
            read_buf: ReadBuffer::new(config.read_buffer_size),
            write_buf: WriteBuffer::new(config.write_buffer_size),
            parser: HttpParser::new(),
            file: ResolvedFile::new(path_capacity),
            segments: Segments::default(),
        };
        connection.init();
        connection
    }

    /// Handle a readability event
    pub fn on_readable(&mut self) {
        if self.is_finished() {
            return;
        }
        if self.state == ConnectionState::Writing {
            self.transmit();
            return;
        }

        if let Err(e) = self.receive() {
            match e {
                ServerError::PeerClosed => debug!("peer {} closed the connection", self.peer_addr),
                e => warn!("receive from {} failed: {}", self.peer_addr, e),
            }
            self.abort();
            return;
        }

        let outcome = match self.process_read() {
            Some(outcome) => outcome,
            None => {
                self.rearm(false);
                return;
            }
        };

        info!(
            "{} GET {} -> {}",
            self.peer_addr,
            String::from_utf8_lossy(self.parser.request().url(&self.read_buf)),
            outcome.status().code()
        );

        match build_response(outcome, self.parser.request().keep_alive, &self.file, &mut self.write_buf) {
            Ok(segments) => self.segments = segments,
            Err(e) => {
                warn!("building response for {} failed: {}", self.peer_addr, e);
                self.abort();
                return;
            }
        }

        self.state = ConnectionState::Writing;
        self.transmit();
    }

    /// Handle a writability event: continue a blocked send
    pub fn on_writable(&mut self) {
        if self.is_finished() {
            return;
        }
        self.transmit();
    }

    /// Drain the socket into the read buffer until it would block
    fn receive(&mut self) -> ServerResult<usize> {
        if self.read_buf.is_full() {
            return Err(ServerError::RequestTooLarge(self.read_buf.capacity()));
        }

        let mut total = 0;
        loop {
            // Let the parser look at a request that exactly fills the buffer
            if self.read_buf.is_full() {
                return Ok(total);
            }

            match self.read_buf.read_from(&mut self.stream) {
                Ok(0) => return Err(ServerError::PeerClosed),
                Ok(n) => total += n,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(total),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ServerError::Io(e)),
            }
        }
    }

    /// Run the parser and, once a request is complete, resolve its file
    ///
    /// Returns `None` while more bytes are needed.
    fn process_read(&mut self) -> Option<Outcome> {
        match self.parser.parse(&mut self.read_buf) {
            Parsed::NeedMoreData => None,
            Parsed::RequestComplete => {
                let url = self.parser.request().url(&self.read_buf);
                Some(self.resolver.resolve(url, &mut self.file))
            }
            Parsed::Failed(outcome) => Some(outcome),
        }
    }

    /// Send what is queued and decide what happens to the connection next
    fn transmit(&mut self) {
        match self.send_pending() {
            Ok(Sent::Idle) => self.rearm(false),
            Ok(Sent::Blocked) => self.rearm(true),
            Ok(Sent::Complete) => {
                self.file.release();
                if self.parser.request().keep_alive {
                    self.init();
                    self.rearm(false);
                } else {
                    self.state = ConnectionState::Closing;
                }
            }
            Err(e) => {
                error!("send to {} failed: {}", self.peer_addr, e);
                self.abort();
            }
        }
    }

    fn send_pending(&mut self) -> ServerResult<Sent> {
        if self.segments.count() == 0 {
            return Ok(Sent::Idle);
        }

        loop {
            if self.segments.is_complete() {
                return Ok(Sent::Complete);
            }

            let (slices, n) = self.segments.pending(self.write_buf.as_slice(), self.file.contents());
            match self.stream.write_vectored(&slices[..n]) {
                Ok(0) => return Err(ServerError::Io(io::Error::from(ErrorKind::WriteZero))),
                Ok(written) => self.segments.advance(written),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(Sent::Blocked),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ServerError::Io(e)),
            }
        }
    }

    fn rearm(&mut self, writable: bool) {
        let result = if writable {
            self.registry.arm_for_write(&self.source)
        } else {
            self.registry.arm_for_read(&self.source)
        };
        if let Err(e) = result {
            error!("re-arming connection {} failed: {}", self.source.token, e);
            self.abort();
        }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Get a mutable reference to the underlying stream
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

impl<S> Connection<S> {
    /// Reset every per-request field for the next request on this socket
    pub fn init(&mut self) {
        self.state = ConnectionState::Reading;
        self.read_buf.reset();
        self.write_buf.reset();
        self.parser.reset();
        self.file.clear();
        self.segments = Segments::default();
    }

    /// Whether the connection is done and should be closed by its owner
    pub fn is_finished(&self) -> bool {
        matches!(self.state, ConnectionState::Closing | ConnectionState::Closed)
    }

    /// Release the mapping and deregister the socket; runs only once
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.file.release();
        if let Err(e) = self.registry.deregister(&self.source) {
            debug!("deregistering connection {} failed: {}", self.source.token, e);
        }
        self.state = ConnectionState::Closed;
        debug!("connection {} from {} closed", self.source.token, self.peer_addr);
    }

    /// Give up on the connection without a response
    fn abort(&mut self) {
        self.file.release();
        self.state = ConnectionState::Closing;
    }

    /// Get the connection's peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get the token the connection is registered under
    pub fn token(&self) -> usize {
        self.source.token
    }

    /// Get the current state of the connection
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn request(&self) -> &Request {
        self.parser.request()
    }

    pub fn parser(&self) -> &HttpParser {
        &self.parser
    }

    pub fn read_buffer(&self) -> &ReadBuffer {
        &self.read_buf
    }

    pub fn write_buffer(&self) -> &WriteBuffer {
        &self.write_buf
    }

    pub fn segments(&self) -> &Segments {
        &self.segments
    }

    pub fn resolved_file(&self) -> &ResolvedFile {
        &self.file
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        self.close();
    }
}
