mod common;

use common::{document_root, INDEX_BODY};
use epoll_file_server::connection::{Connection, ConnectionState};
use epoll_file_server::registry::{Registry, Source};
use epoll_file_server::resource::Resolver;
use epoll_file_server::response::{EMPTY_FILE_BODY, ERROR_400_FORM, ERROR_403_FORM, ERROR_404_FORM};
use epoll_file_server::{Request, ServerConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, ErrorKind, IoSlice, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Read,
    Write,
    Deregister,
}

/// Registry that only records what it was asked to do
#[derive(Default)]
struct RecordingRegistry {
    calls: Mutex<Vec<Call>>,
}

impl RecordingRegistry {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

impl Registry for RecordingRegistry {
    fn arm_for_read(&self, _source: &Source) -> io::Result<()> {
        self.calls.lock().push(Call::Read);
        Ok(())
    }

    fn arm_for_write(&self, _source: &Source) -> io::Result<()> {
        self.calls.lock().push(Call::Write);
        Ok(())
    }

    fn deregister(&self, _source: &Source) -> io::Result<()> {
        self.calls.lock().push(Call::Deregister);
        Ok(())
    }
}

/// Scripted non-blocking socket
#[derive(Default)]
struct MockStream {
    inbound: VecDeque<Vec<u8>>,
    peer_closed: bool,
    written: Vec<u8>,
    /// Slices handed to each vectored write
    write_calls: Vec<usize>,
    /// Most bytes accepted by a single write
    write_limit: Option<usize>,
    /// Total bytes accepted before writes start to block
    block_after: Option<usize>,
    fail_writes: bool,
}

impl MockStream {
    fn with_chunks<C: AsRef<[u8]>>(chunks: &[C]) -> Self {
        Self {
            inbound: chunks.iter().map(|c| c.as_ref().to_vec()).collect(),
            ..Self::default()
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.inbound.push_back(chunk.to_vec());
    }

    fn written_str(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inbound.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.inbound.push_front(chunk.split_off(n));
                }
                Ok(n)
            }
            None if self.peer_closed => Ok(0),
            None => Err(ErrorKind::WouldBlock.into()),
        }
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_vectored(&[IoSlice::new(buf)])
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(ErrorKind::BrokenPipe.into());
        }
        let mut budget = self.write_limit.unwrap_or(usize::MAX);
        if let Some(limit) = self.block_after {
            budget = budget.min(limit.saturating_sub(self.written.len()));
        }
        if budget == 0 {
            return Err(ErrorKind::WouldBlock.into());
        }

        self.write_calls.push(bufs.len());
        let mut total = 0;
        for buf in bufs {
            let n = buf.len().min(budget - total);
            self.written.extend_from_slice(&buf[..n]);
            total += n;
            if total == budget {
                break;
            }
        }
        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsRawFd for MockStream {
    fn as_raw_fd(&self) -> RawFd {
        -1
    }
}

fn connection_with(
    root: &Path,
    stream: MockStream,
    config: &ServerConfig,
) -> (Connection<MockStream>, Arc<RecordingRegistry>) {
    let registry = Arc::new(RecordingRegistry::default());
    let shared: Arc<dyn Registry> = registry.clone();
    let resolver = Arc::new(Resolver::new(root, config.path_buffer_size));
    let connection = Connection::new(stream, "127.0.0.1:4000".parse().unwrap(), 7, shared, resolver, config);
    (connection, registry)
}

fn connection(root: &Path, stream: MockStream) -> (Connection<MockStream>, Arc<RecordingRegistry>) {
    connection_with(root, stream, &ServerConfig::new())
}

fn expected_response(status: &str, body: &str, keep_alive: bool) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: {}\r\n\r\n{}",
        status,
        body.len(),
        if keep_alive { "keep-alive" } else { "close" },
        body
    )
}

#[test]
fn test_keep_alive_file_response() {
    let root = document_root();
    let request: &[u8] = b"GET /index.html HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n";
    let (mut conn, registry) = connection(root.path(), MockStream::with_chunks(&[request]));

    conn.on_readable();

    assert_eq!(conn.stream().written_str(), expected_response("200 OK", INDEX_BODY, true));
    assert_eq!(conn.stream().write_calls, vec![2]);
    assert_eq!(registry.calls(), vec![Call::Read]);
    assert!(!conn.is_finished());
    assert_eq!(conn.state(), ConnectionState::Reading);

    // Reinitialized for the next request
    assert_eq!(conn.request(), &Request::default());
    assert_eq!(conn.read_buffer().read_cursor(), 0);
    assert_eq!(conn.read_buffer().parse_cursor(), 0);
    assert_eq!(conn.read_buffer().line_start(), 0);
    assert!(conn.write_buffer().is_empty());
    assert!(!conn.resolved_file().is_mapped());
}

#[test]
fn test_keep_alive_serves_second_request() {
    let root = document_root();
    let first: &[u8] = b"GET /missing HTTP/1.1\r\nConnection: keep-alive\r\n\r\n";
    let (mut conn, registry) = connection(root.path(), MockStream::with_chunks(&[first]));

    conn.on_readable();
    conn.stream_mut().written.clear();
    conn.stream_mut().push(b"GET /index.html HTTP/1.1\r\n\r\n");
    conn.on_readable();

    assert_eq!(conn.stream().written_str(), expected_response("200 OK", INDEX_BODY, false));
    assert_eq!(registry.calls(), vec![Call::Read]);
    assert!(conn.is_finished());
}

#[test]
fn test_missing_file_is_404() {
    let root = document_root();
    let (mut conn, registry) = connection(root.path(), MockStream::with_chunks(&["GET /index.htm HTTP/1.1\r\nHost: x\r\n\r\n"]));

    conn.on_readable();

    assert_eq!(conn.stream().written_str(), expected_response("404 Not Found", ERROR_404_FORM, false));
    assert_eq!(conn.stream().write_calls, vec![1]);
    assert!(conn.is_finished());
    assert_eq!(conn.state(), ConnectionState::Closing);
    assert!(registry.calls().is_empty());

    // Closed, not reinitialized
    assert!(conn.read_buffer().read_cursor() > 0);
}

#[test]
fn test_directory_is_400() {
    let root = document_root();
    let (mut conn, _) = connection(root.path(), MockStream::with_chunks(&["GET /docs HTTP/1.1\r\n\r\n"]));

    conn.on_readable();

    assert_eq!(conn.stream().written_str(), expected_response("400 Bad Request", ERROR_400_FORM, false));
}

#[test]
fn test_private_file_is_403() {
    let root = document_root();
    let (mut conn, _) = connection(root.path(), MockStream::with_chunks(&["GET /secret HTTP/1.1\r\n\r\n"]));

    conn.on_readable();

    assert_eq!(conn.stream().written_str(), expected_response("403 Forbidden", ERROR_403_FORM, false));
}

#[test]
fn test_post_is_400() {
    let root = document_root();
    let (mut conn, _) = connection(root.path(), MockStream::with_chunks(&["POST / HTTP/1.1\r\n\r\n"]));

    conn.on_readable();

    assert_eq!(conn.stream().written_str(), expected_response("400 Bad Request", ERROR_400_FORM, false));
    assert!(conn.is_finished());
}

#[test]
fn test_empty_file_gets_fixed_body() {
    let root = document_root();
    let (mut conn, _) = connection(root.path(), MockStream::with_chunks(&["GET /empty.html HTTP/1.1\r\n\r\n"]));

    conn.on_readable();

    assert_eq!(conn.stream().written_str(), expected_response("200 OK", EMPTY_FILE_BODY, false));
    assert_eq!(conn.stream().write_calls, vec![1]);
}

#[test]
fn test_split_request_matches_whole_request() {
    let root = document_root();

    let (mut whole, _) = connection(root.path(), MockStream::with_chunks(&["GET /index.html HTTP/1.1\r\n\r\n"]));
    whole.on_readable();

    let (mut split, registry) = connection(root.path(), MockStream::with_chunks(&["GET /index.html HTTP/1."]));
    split.on_readable();
    assert!(split.stream().written.is_empty());
    assert_eq!(registry.calls(), vec![Call::Read]);
    assert_eq!(split.state(), ConnectionState::Reading);

    split.stream_mut().push(b"1\r\n\r\n");
    split.on_readable();

    assert_eq!(split.stream().written, whole.stream().written);
    assert!(split.is_finished());
}

#[test]
fn test_body_is_awaited() {
    let root = document_root();
    let (mut conn, registry) = connection(
        root.path(),
        MockStream::with_chunks(&["GET /index.html HTTP/1.1\r\nContent-Length: 5\r\n\r\nab"]),
    );

    conn.on_readable();
    assert!(conn.stream().written.is_empty());
    assert_eq!(registry.calls(), vec![Call::Read]);

    conn.stream_mut().push(b"cde");
    conn.on_readable();
    assert_eq!(conn.stream().written_str(), expected_response("200 OK", INDEX_BODY, false));
}

#[test]
fn test_partial_writes_complete_in_one_event() {
    let root = document_root();
    let mut stream = MockStream::with_chunks(&["GET /index.html HTTP/1.1\r\n\r\n"]);
    stream.write_limit = Some(5);
    let (mut conn, registry) = connection(root.path(), stream);

    conn.on_readable();

    assert_eq!(conn.stream().written_str(), expected_response("200 OK", INDEX_BODY, false));
    assert!(conn.stream().write_calls.len() > 2);
    assert!(registry.calls().is_empty());
    assert!(conn.is_finished());
}

#[test]
fn test_blocked_write_resumes_on_writable() {
    let root = document_root();
    let mut stream = MockStream::with_chunks(&["GET /index.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\n"]);
    stream.block_after = Some(10);
    let (mut conn, registry) = connection(root.path(), stream);

    conn.on_readable();
    assert_eq!(conn.stream().written.len(), 10);
    assert_eq!(conn.state(), ConnectionState::Writing);
    assert_eq!(registry.calls(), vec![Call::Write]);
    assert!(conn.resolved_file().is_mapped());
    assert_eq!(conn.segments().sent(), 10);

    conn.stream_mut().block_after = None;
    conn.on_writable();

    assert_eq!(conn.stream().written_str(), expected_response("200 OK", INDEX_BODY, true));
    assert_eq!(registry.calls(), vec![Call::Write, Call::Read]);
    assert_eq!(conn.state(), ConnectionState::Reading);
    assert!(!conn.resolved_file().is_mapped());
}

#[test]
fn test_spurious_writable_rearms_for_read() {
    let root = document_root();
    let (mut conn, registry) = connection(root.path(), MockStream::default());

    conn.on_writable();

    assert_eq!(registry.calls(), vec![Call::Read]);
    assert!(conn.stream().written.is_empty());
    assert!(!conn.is_finished());
}

#[test]
fn test_send_failure_releases_mapping_and_closes() {
    let root = document_root();
    let mut stream = MockStream::with_chunks(&["GET /index.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\n"]);
    stream.fail_writes = true;
    let (mut conn, registry) = connection(root.path(), stream);

    conn.on_readable();

    assert!(conn.is_finished());
    assert!(!conn.resolved_file().is_mapped());
    assert!(registry.calls().is_empty());
}

#[test]
fn test_peer_close_finishes_connection() {
    let root = document_root();
    let mut stream = MockStream::with_chunks(&["GET /index.html HTTP/1.1\r\n"]);
    stream.peer_closed = true;
    let (mut conn, _) = connection(root.path(), stream);

    conn.on_readable();

    assert!(conn.is_finished());
    assert!(conn.stream().written.is_empty());
}

#[test]
fn test_oversized_request_is_dropped() {
    let root = document_root();
    let config = ServerConfig::new().with_buffer_sizes(32, 1024);
    let stream = MockStream::with_chunks(&[&[b'a'; 40][..]]);
    let (mut conn, registry) = connection_with(root.path(), stream, &config);

    // The first 32 bytes fill the buffer without completing a line
    conn.on_readable();
    assert!(conn.read_buffer().is_full());
    assert_eq!(registry.calls(), vec![Call::Read]);
    assert!(!conn.is_finished());

    conn.on_readable();
    assert!(conn.is_finished());
    assert!(conn.stream().written.is_empty());
}

#[test]
fn test_request_exactly_filling_buffer_is_served() {
    let root = document_root();
    let request: &[u8] = b"GET /missing HTTP/1.1\r\n\r\n";
    let config = ServerConfig::new().with_buffer_sizes(request.len(), 1024);
    let (mut conn, _) = connection_with(root.path(), MockStream::with_chunks(&[request]), &config);

    conn.on_readable();

    assert_eq!(conn.stream().written_str(), expected_response("404 Not Found", ERROR_404_FORM, false));
}

#[test]
fn test_response_too_large_closes_without_output() {
    let root = document_root();
    let config = ServerConfig::new().with_buffer_sizes(2048, 32);
    let (mut conn, registry) = connection_with(
        root.path(),
        MockStream::with_chunks(&["GET /missing HTTP/1.1\r\n\r\n"]),
        &config,
    );

    conn.on_readable();

    assert!(conn.is_finished());
    assert!(conn.stream().written.is_empty());
    assert!(registry.calls().is_empty());
}

#[test]
fn test_close_deregisters_exactly_once() {
    let root = document_root();
    let mut stream = MockStream::with_chunks(&["GET /index.html HTTP/1.1\r\n\r\n"]);
    stream.block_after = Some(4);
    let (mut conn, registry) = connection(root.path(), stream);

    conn.on_readable();
    assert!(conn.resolved_file().is_mapped());

    conn.close();
    conn.close();
    drop(conn);

    assert_eq!(registry.calls(), vec![Call::Write, Call::Deregister]);
}

#[test]
fn test_events_after_close_are_ignored() {
    let root = document_root();
    let (mut conn, registry) = connection(root.path(), MockStream::with_chunks(&["GET /index.html HTTP/1.1\r\n\r\n"]));

    conn.close();
    conn.on_readable();
    conn.on_writable();

    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(conn.stream().written.is_empty());
    assert_eq!(registry.calls(), vec![Call::Deregister]);
}
