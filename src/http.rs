use crate::buffer::{ReadBuffer, Span};
use crate::line::{next_line, LineStatus};
use log::{debug, warn};

/// HTTP Status Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 200,
    BadRequest = 400,
    Forbidden = 403,
    NotFound = 404,
    InternalServerError = 500,
}

impl Status {
    /// Numeric status code
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Get the reason phrase for this status code
    pub fn as_str(&self) -> &'static str {
        match *self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::InternalServerError => "Internal Error",
        }
    }
}

/// HTTP Methods
///
/// Retrieval is the only supported method; every other token is rejected
/// while parsing the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
}

impl Method {
    /// Parse a method token, ignoring ASCII case
    pub fn from_bytes(token: &[u8]) -> Option<Self> {
        if token.eq_ignore_ascii_case(b"GET") {
            Some(Method::Get)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            Method::Get => "GET",
        }
    }
}

/// How processing of a request ended, and therefore what backs the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    BadRequest,
    ResourceNotFound,
    Forbidden,
    InternalError,
    FileReady,
}

impl Outcome {
    pub fn status(&self) -> Status {
        match *self {
            Outcome::BadRequest => Status::BadRequest,
            Outcome::ResourceNotFound => Status::NotFound,
            Outcome::Forbidden => Status::Forbidden,
            Outcome::InternalError => Status::InternalServerError,
            Outcome::FileReady => Status::Ok,
        }
    }
}

/// Where the main state machine currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    RequestLine,
    Headers,
    Body,
    Done,
}

/// Result of feeding the received bytes through the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parsed {
    NeedMoreData,
    RequestComplete,
    Failed(Outcome),
}

/// Parsed request fields
///
/// The text fields are spans into the connection's read buffer and are only
/// meaningful until that buffer is reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Span,
    pub version: Span,
    pub host: Option<Span>,
    pub content_length: usize,
    pub keep_alive: bool,
}

impl Request {
    pub fn clear(&mut self) {
        *self = Request::default();
    }

    pub fn url<'a>(&self, buf: &'a ReadBuffer) -> &'a [u8] {
        buf.slice(self.url)
    }

    pub fn version<'a>(&self, buf: &'a ReadBuffer) -> &'a [u8] {
        buf.slice(self.version)
    }

    pub fn host<'a>(&self, buf: &'a ReadBuffer) -> Option<&'a [u8]> {
        self.host.map(|span| buf.slice(span))
    }
}

/// Resumable HTTP request parser
///
/// All position state lives in the [`ReadBuffer`] cursors, so `parse` can be
/// called again after every receive and continues where it stopped.
pub struct HttpParser {
    state: ParseState,
    request: Request,
    body_start: usize,
}

impl Default for HttpParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpParser {
    /// Create a new HTTP parser
    pub fn new() -> Self {
        Self {
            state: ParseState::RequestLine,
            request: Request::default(),
            body_start: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Check if the parser has completed parsing a request
    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Done
    }

    /// Reset the parser for a new request
    pub fn reset(&mut self) {
        self.state = ParseState::RequestLine;
        self.request.clear();
        self.body_start = 0;
    }

    /// Advance over whatever has been received so far
    pub fn parse(&mut self, buf: &mut ReadBuffer) -> Parsed {
        loop {
            let progress = match self.state {
                ParseState::RequestLine | ParseState::Headers => {
                    let line = match next_line(buf) {
                        LineStatus::Complete(line) => line,
                        LineStatus::Open => return Parsed::NeedMoreData,
                        LineStatus::Malformed => return Parsed::Failed(Outcome::BadRequest),
                    };
                    buf.start_next_line();
                    debug!("got http line: {}", String::from_utf8_lossy(buf.slice(line)));

                    if self.state == ParseState::RequestLine {
                        self.parse_request_line(buf, line)
                    } else {
                        self.parse_header(buf, line)
                    }
                }
                ParseState::Body => match self.check_body(buf) {
                    Parsed::NeedMoreData => return Parsed::NeedMoreData,
                    progress => progress,
                },
                // Re-entered without a reset in between
                ParseState::Done => return Parsed::Failed(Outcome::InternalError),
            };

            match progress {
                Parsed::NeedMoreData => continue,
                Parsed::RequestComplete => {
                    self.state = ParseState::Done;
                    return Parsed::RequestComplete;
                }
                failed => return failed,
            }
        }
    }

    /// Parse a request line: method, URL and version
    fn parse_request_line(&mut self, buf: &ReadBuffer, line: Span) -> Parsed {
        let text = buf.slice(line);

        let method_end = match text.iter().position(|&b| is_blank(b)) {
            Some(pos) => pos,
            None => return Parsed::Failed(Outcome::BadRequest),
        };
        self.request.method = match Method::from_bytes(&text[..method_end]) {
            Some(method) => method,
            None => return Parsed::Failed(Outcome::BadRequest),
        };

        let mut url_start = skip_blanks(text, method_end);
        let url_end = match text[url_start..].iter().position(|&b| is_blank(b)) {
            Some(pos) => url_start + pos,
            None => return Parsed::Failed(Outcome::BadRequest),
        };

        let version_start = skip_blanks(text, url_end);
        if !text[version_start..].eq_ignore_ascii_case(b"HTTP/1.1") {
            return Parsed::Failed(Outcome::BadRequest);
        }

        let url = &text[url_start..url_end];
        if url.len() >= 7 && url[..7].eq_ignore_ascii_case(b"http://") {
            match url[7..].iter().position(|&b| b == b'/') {
                Some(pos) => url_start += 7 + pos,
                None => return Parsed::Failed(Outcome::BadRequest),
            }
        }
        if url_start == url_end || text[url_start] != b'/' {
            return Parsed::Failed(Outcome::BadRequest);
        }

        self.request.url = Span::new(line.start + url_start, line.start + url_end);
        self.request.version = Span::new(line.start + version_start, line.end());
        self.state = ParseState::Headers;
        Parsed::NeedMoreData
    }

    /// Parse one header line, or the blank line ending the headers
    fn parse_header(&mut self, buf: &ReadBuffer, line: Span) -> Parsed {
        if line.is_empty() {
            if self.request.content_length > 0 {
                self.state = ParseState::Body;
                self.body_start = buf.parse_cursor();
                return Parsed::NeedMoreData;
            }
            return Parsed::RequestComplete;
        }

        let text = buf.slice(line);
        if let Some(value) = header_value(text, b"Connection:") {
            if text[value.start..value.end()].eq_ignore_ascii_case(b"keep-alive") {
                self.request.keep_alive = true;
            }
        } else if let Some(value) = header_value(text, b"Content-Length:") {
            let raw = &text[value.start..value.end()];
            self.request.content_length = match std::str::from_utf8(raw).ok().and_then(|s| s.parse::<usize>().ok()) {
                Some(length) => length,
                None => {
                    warn!("malformed Content-Length {:?}, treating as 0", String::from_utf8_lossy(raw));
                    0
                }
            };
        } else if let Some(value) = header_value(text, b"Host:") {
            self.request.host = Some(Span::new(line.start + value.start, line.start + value.end()));
        } else {
            debug!("ignoring unknown header {}", String::from_utf8_lossy(text));
        }

        Parsed::NeedMoreData
    }

    /// Confirm the announced body has fully arrived
    fn check_body(&self, buf: &ReadBuffer) -> Parsed {
        if buf.read_cursor() >= self.body_start.saturating_add(self.request.content_length) {
            Parsed::RequestComplete
        } else {
            Parsed::NeedMoreData
        }
    }
}

fn is_blank(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn skip_blanks(text: &[u8], from: usize) -> usize {
    from + text[from..].iter().take_while(|&&b| is_blank(b)).count()
}

/// Trimmed value of a header if `text` starts with `name`, ignoring case.
/// The returned span is relative to `text`.
fn header_value(text: &[u8], name: &[u8]) -> Option<Span> {
    if text.len() < name.len() || !text[..name.len()].eq_ignore_ascii_case(name) {
        return None;
    }
    let start = skip_blanks(text, name.len());
    let trailing = text[start..].iter().rev().take_while(|&&b| is_blank(b)).count();
    Some(Span::new(start, text.len() - trailing))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_value_is_trimmed() {
        let value = header_value(b"host: \t example.com  ", b"Host:").unwrap();
        assert_eq!(&b"host: \t example.com  "[value.start..value.end()], b"example.com");
    }

    #[test]
    fn header_value_requires_full_name() {
        assert!(header_value(b"Hos", b"Host:").is_none());
        assert!(header_value(b"Hostname: x", b"Host:").is_none());
    }

    #[test]
    fn empty_header_value() {
        let value = header_value(b"Host:   ", b"Host:").unwrap();
        assert!(value.is_empty());
    }

    #[test]
    fn status_reason_phrases() {
        assert_eq!(Outcome::Forbidden.status().code(), 403);
        assert_eq!(Outcome::ResourceNotFound.status().as_str(), "Not Found");
        assert_eq!(Outcome::InternalError.status().code(), 500);
    }
}
