use crate::buffer::WriteBuffer;
use crate::error::ServerResult;
use crate::http::{Outcome, Status};
use crate::resource::ResolvedFile;
use std::io::IoSlice;

pub const ERROR_400_FORM: &str = "Your request has bad syntax or is inherently impossible to satisfy.\n";
pub const ERROR_403_FORM: &str = "You do not have permission to get file from this server.\n";
pub const ERROR_404_FORM: &str = "The requested file was not found on this server.\n";
pub const ERROR_500_FORM: &str = "There was an unusual problem serving the requested file.\n";
pub const EMPTY_FILE_BODY: &str = "<html><body></body></html>";

/// Vectored send descriptor: header bytes, optionally followed by file bytes
///
/// Tracks how much of the whole response has gone out so a partial send can
/// resume in the middle of either segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Segments {
    count: usize,
    header_len: usize,
    body_len: usize,
    sent: usize,
}

impl Segments {
    /// Header-only response (the body, if any, lives in the header buffer)
    pub fn header_only(header_len: usize) -> Self {
        Self {
            count: 1,
            header_len,
            body_len: 0,
            sent: 0,
        }
    }

    /// Header bytes followed by mapped file bytes
    pub fn with_file(header_len: usize, body_len: usize) -> Self {
        Self {
            count: 2,
            header_len,
            body_len,
            sent: 0,
        }
    }

    /// Number of segments, 0 when nothing is queued
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn total(&self) -> usize {
        self.header_len + self.body_len
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn remaining(&self) -> usize {
        self.total() - self.sent
    }

    pub fn is_complete(&self) -> bool {
        self.sent >= self.total()
    }

    /// Record `n` more bytes as sent
    pub fn advance(&mut self, n: usize) {
        self.sent = (self.sent + n).min(self.total());
    }

    /// Slices still to be sent, given the header and body bytes
    ///
    /// Returns the slice array and how many entries of it are in use.
    pub fn pending<'a>(&self, header: &'a [u8], body: &'a [u8]) -> ([IoSlice<'a>; 2], usize) {
        let header = &header[self.sent.min(self.header_len)..self.header_len];
        let body = if self.count == 2 {
            &body[self.sent.saturating_sub(self.header_len).min(self.body_len)..self.body_len]
        } else {
            &[][..]
        };

        match (header.is_empty(), body.is_empty()) {
            (false, false) => ([IoSlice::new(header), IoSlice::new(body)], 2),
            (false, true) => ([IoSlice::new(header), IoSlice::new(&[])], 1),
            (true, false) => ([IoSlice::new(body), IoSlice::new(&[])], 1),
            (true, true) => ([IoSlice::new(&[]), IoSlice::new(&[])], 0),
        }
    }
}

/// Writes a response head field by field into a bounded buffer
pub struct ResponseBuilder<'a> {
    out: &'a mut WriteBuffer,
}

impl<'a> ResponseBuilder<'a> {
    pub fn new(out: &'a mut WriteBuffer) -> Self {
        Self { out }
    }

    pub fn status_line(&mut self, status: Status) -> ServerResult<&mut Self> {
        self.out.append(b"HTTP/1.1 ")?;
        self.out.append_decimal(status.code() as usize)?;
        self.out.append(b" ")?;
        self.out.append(status.as_str().as_bytes())?;
        self.out.append(b"\r\n")?;
        Ok(self)
    }

    pub fn content_length(&mut self, length: usize) -> ServerResult<&mut Self> {
        self.out.append(b"Content-Length: ")?;
        self.out.append_decimal(length)?;
        self.out.append(b"\r\n")?;
        Ok(self)
    }

    pub fn connection(&mut self, keep_alive: bool) -> ServerResult<&mut Self> {
        let value: &[u8] = if keep_alive { b"keep-alive" } else { b"close" };
        self.out.append(b"Connection: ")?;
        self.out.append(value)?;
        self.out.append(b"\r\n")?;
        Ok(self)
    }

    pub fn blank_line(&mut self) -> ServerResult<&mut Self> {
        self.out.append(b"\r\n")?;
        Ok(self)
    }

    pub fn content(&mut self, body: &[u8]) -> ServerResult<&mut Self> {
        self.out.append(body)?;
        Ok(self)
    }

    /// Content-Length, Connection and the blank line
    pub fn headers(&mut self, length: usize, keep_alive: bool) -> ServerResult<&mut Self> {
        self.content_length(length)?.connection(keep_alive)?.blank_line()
    }
}

fn error_form(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::BadRequest => ERROR_400_FORM,
        Outcome::Forbidden => ERROR_403_FORM,
        Outcome::ResourceNotFound => ERROR_404_FORM,
        Outcome::InternalError => ERROR_500_FORM,
        Outcome::FileReady => EMPTY_FILE_BODY,
    }
}

/// Render the response for `outcome` into `out`
///
/// A non-empty file is sent from its mapping as a second segment; every other
/// body is small and fixed, so it is appended after the headers.
pub fn build_response(
    outcome: Outcome,
    keep_alive: bool,
    file: &ResolvedFile,
    out: &mut WriteBuffer,
) -> ServerResult<Segments> {
    out.reset();
    let mut builder = ResponseBuilder::new(out);
    builder.status_line(outcome.status())?;

    if outcome == Outcome::FileReady && !file.contents().is_empty() {
        builder.headers(file.contents().len(), keep_alive)?;
        return Ok(Segments::with_file(out.len(), file.contents().len()));
    }

    let body = error_form(outcome).as_bytes();
    builder.headers(body.len(), keep_alive)?.content(body)?;
    Ok(Segments::header_only(out.len()))
}
