use crate::acceptor::ConnectionAcceptor;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};
use crate::registry::{Registry, Source};
use crate::resource::Resolver;
use crossbeam::channel::{self, Receiver};
use libc::{EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP};
use log::{debug, error, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Token the listening socket is registered under
const LISTENER_TOKEN: usize = usize::MAX;

/// How long a single poll may block before the stop flag is checked again
const POLL_TIMEOUT_MS: i32 = 100;

/// Flags common to every client registration: edge-triggered, one-shot
const CLIENT_FLAGS: u32 = (EPOLLET | EPOLLONESHOT | EPOLLRDHUP) as u32;

/// An epoll instance
///
/// Client sockets are registered one-shot, so each readiness change is
/// delivered to exactly one worker and stays silent until re-armed through
/// the [`Registry`] implementation.
pub struct EventPoller {
    epoll_fd: RawFd,
}

impl EventPoller {
    /// Create a new event poller
    pub fn new() -> ServerResult<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(ServerError::Io(io::Error::last_os_error()));
        }
        Ok(Self { epoll_fd })
    }

    /// Start watching a client socket for its first readability event
    pub fn add(&self, source: &Source) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, source.fd, source.token, EPOLLIN as u32 | CLIENT_FLAGS)
    }

    /// Watch a listening socket; level-triggered so no pending accept is lost
    pub fn add_listener(&self, fd: RawFd, token: usize) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, EPOLLIN as u32)
    }

    /// Wait for events, filling `events` from the front
    pub fn poll(&self, events: &mut [libc::epoll_event], timeout_ms: i32) -> ServerResult<usize> {
        let num_events = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                events.as_mut_ptr(),
                events.len() as i32,
                timeout_ms,
            )
        };

        if num_events < 0 {
            let err = io::Error::last_os_error();
            // Ignore EINTR as it's just a signal interruption
            if err.kind() != ErrorKind::Interrupted {
                return Err(ServerError::Io(err));
            }
            return Ok(0);
        }

        Ok(num_events as usize)
    }

    fn ctl(&self, op: i32, fd: RawFd, token: usize, events: u32) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events,
            u64: token as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut event as *mut _) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Registry for EventPoller {
    fn arm_for_read(&self, source: &Source) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, source.fd, source.token, EPOLLIN as u32 | CLIENT_FLAGS)
    }

    fn arm_for_write(&self, source: &Source) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, source.fd, source.token, EPOLLOUT as u32 | CLIENT_FLAGS)
    }

    fn deregister(&self, source: &Source) -> io::Result<()> {
        let ret = unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, source.fd, std::ptr::null_mut())
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for EventPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

type SharedConnection = Arc<Mutex<Connection<TcpStream>>>;

/// Open connections by token
///
/// The per-connection mutex is never contended in practice: one-shot
/// registration hands a connection to one worker at a time.
#[derive(Default)]
struct ConnectionTable {
    connections: Mutex<HashMap<usize, SharedConnection>>,
}

impl ConnectionTable {
    fn insert(&self, token: usize, connection: SharedConnection) {
        self.connections.lock().insert(token, connection);
    }

    fn get(&self, token: usize) -> Option<SharedConnection> {
        self.connections.lock().get(&token).cloned()
    }

    fn remove(&self, token: usize) -> Option<SharedConnection> {
        self.connections.lock().remove(&token)
    }

    fn drain(&self) -> Vec<SharedConnection> {
        self.connections.lock().drain().map(|(_, connection)| connection).collect()
    }
}

/// Stops a running [`EventLoop`] from another thread
#[derive(Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// The main event loop: one polling thread feeding a pool of workers
pub struct EventLoop {
    config: ServerConfig,
    poller: Arc<EventPoller>,
    acceptor: Arc<ConnectionAcceptor>,
    resolver: Arc<Resolver>,
    connections: Arc<ConnectionTable>,
    running: Arc<AtomicBool>,
}

impl EventLoop {
    /// Create a new event loop
    pub fn new(config: ServerConfig, acceptor: ConnectionAcceptor) -> ServerResult<Self> {
        config.validate()?;
        let resolver = Arc::new(Resolver::from_config(&config));

        Ok(Self {
            config,
            poller: Arc::new(EventPoller::new()?),
            acceptor: Arc::new(acceptor),
            resolver,
            connections: Arc::new(ConnectionTable::default()),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Handle that can stop the loop while `run` is executing
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: self.running.clone(),
        }
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.acceptor.local_addr()
    }

    /// Stop the event loop
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Run the event loop until stopped
    pub fn run(&mut self) -> ServerResult<()> {
        self.poller.add_listener(self.acceptor.as_raw_fd(), LISTENER_TOKEN)?;

        let (sender, receiver) = channel::unbounded();
        let workers = self.spawn_workers(receiver)?;
        info!("event loop running with {} workers", workers.len());

        let empty = libc::epoll_event { events: 0, u64: 0 };
        let mut events = vec![empty; self.config.max_events];

        let mut result = Ok(());
        while self.running.load(Ordering::Acquire) {
            let num_events = match self.poller.poll(&mut events, POLL_TIMEOUT_MS) {
                Ok(n) => n,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };

            for event in &events[..num_events] {
                let token = event.u64 as usize;
                let bits = event.events;
                if token == LISTENER_TOKEN {
                    self.accept_connections();
                } else if sender.send((token, bits)).is_err() {
                    result = Err(ServerError::EventLoop("all workers exited".to_string()));
                    self.stop();
                    break;
                }
            }
        }

        drop(sender);
        for worker in workers {
            let _ = worker.join();
        }
        for connection in self.connections.drain() {
            connection.lock().close();
            self.acceptor.release();
        }
        info!("event loop stopped");
        result
    }

    fn spawn_workers(&self, receiver: Receiver<(usize, u32)>) -> ServerResult<Vec<JoinHandle<()>>> {
        let mut workers = Vec::with_capacity(self.config.worker_threads);
        for id in 0..self.config.worker_threads {
            let receiver = receiver.clone();
            let connections = self.connections.clone();
            let acceptor = self.acceptor.clone();
            let worker = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || {
                    for (token, bits) in receiver.iter() {
                        dispatch(&connections, &acceptor, token, bits);
                    }
                })?;
            workers.push(worker);
        }
        Ok(workers)
    }

    /// Accept until the listener would block
    fn accept_connections(&self) {
        loop {
            let accepted = match self.acceptor.accept() {
                Ok(Some(accepted)) => accepted,
                Ok(None) => continue,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("accept failed: {}", e);
                    break;
                }
            };

            let token = accepted.token;
            let registry: Arc<dyn Registry> = self.poller.clone();
            let connection = Connection::new(
                accepted.stream,
                accepted.peer_addr,
                token,
                registry,
                self.resolver.clone(),
                &self.config,
            );
            let source = Source {
                fd: connection.stream().as_raw_fd(),
                token,
            };
            debug!("accepted connection {} from {}", token, accepted.peer_addr);

            self.connections.insert(token, Arc::new(Mutex::new(connection)));
            if let Err(e) = self.poller.add(&source) {
                error!("registering connection {} failed: {}", token, e);
                if let Some(connection) = self.connections.remove(token) {
                    connection.lock().close();
                    self.acceptor.release();
                }
            }
        }
    }
}

/// Feed one readiness event into its connection, closing it when finished
fn dispatch(connections: &ConnectionTable, acceptor: &ConnectionAcceptor, token: usize, bits: u32) {
    let shared = match connections.get(token) {
        Some(shared) => shared,
        None => return,
    };
    let mut connection = shared.lock();

    if bits & (EPOLLRDHUP | EPOLLHUP | EPOLLERR) as u32 != 0 {
        connection.close();
    } else if bits & EPOLLIN as u32 != 0 {
        connection.on_readable();
    } else if bits & EPOLLOUT as u32 != 0 {
        connection.on_writable();
    }

    if connection.is_finished() {
        connection.close();
        drop(connection);
        if connections.remove(token).is_some() {
            acceptor.release();
        }
    }
}
