use crate::error::{ServerError, ServerResult};
use std::io::{self, Read};

/// A byte range inside a [`ReadBuffer`]
///
/// Request fields are stored as spans rather than references so they never
/// outlive the bytes they point at: the buffer and the spans are cleared by
/// the same reinitialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, len: end - start }
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Fixed-capacity receive buffer with the three parse cursors
///
/// `0 <= line_start <= parse_cursor <= read_cursor <= capacity` holds at all
/// times. The buffer never grows; a request that does not fit is rejected.
pub struct ReadBuffer {
    data: Box<[u8]>,
    read_cursor: usize,
    parse_cursor: usize,
    line_start: usize,
}

impl ReadBuffer {
    /// Create a new buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            read_cursor: 0,
            parse_cursor: 0,
            line_start: 0,
        }
    }

    /// Read once from a reader into the free tail of the buffer
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let bytes_read = reader.read(&mut self.data[self.read_cursor..])?;
        self.read_cursor += bytes_read;
        Ok(bytes_read)
    }

    /// Copy as much of `bytes` as fits, returning the number copied
    pub fn extend(&mut self, bytes: &[u8]) -> usize {
        let to_copy = bytes.len().min(self.remaining_capacity());
        self.data[self.read_cursor..self.read_cursor + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.read_cursor += to_copy;
        to_copy
    }

    /// Clear all data and zero every cursor
    pub fn reset(&mut self) {
        self.data[..self.read_cursor].fill(0);
        self.read_cursor = 0;
        self.parse_cursor = 0;
        self.line_start = 0;
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.data.len() - self.read_cursor
    }

    pub fn is_full(&self) -> bool {
        self.read_cursor == self.data.len()
    }

    /// Next byte position to be filled by a receive
    pub fn read_cursor(&self) -> usize {
        self.read_cursor
    }

    /// Next byte position the tokenizer will look at
    pub fn parse_cursor(&self) -> usize {
        self.parse_cursor
    }

    /// Start of the line currently being assembled
    pub fn line_start(&self) -> usize {
        self.line_start
    }

    /// Everything received so far
    pub fn received(&self) -> &[u8] {
        &self.data[..self.read_cursor]
    }

    /// Bytes covered by a span, clamped to what has been received
    pub fn slice(&self, span: Span) -> &[u8] {
        let end = span.end().min(self.read_cursor);
        let start = span.start.min(end);
        &self.data[start..end]
    }

    pub(crate) fn byte(&self, pos: usize) -> u8 {
        self.data[pos]
    }

    /// Overwrite a consumed line terminator so it can never match again
    pub(crate) fn clear_byte(&mut self, pos: usize) {
        self.data[pos] = 0;
    }

    pub(crate) fn set_parse_cursor(&mut self, pos: usize) {
        debug_assert!(pos >= self.parse_cursor && pos <= self.read_cursor);
        self.parse_cursor = pos;
    }

    /// Mark the parse cursor as the start of the next line
    pub(crate) fn start_next_line(&mut self) {
        self.line_start = self.parse_cursor;
    }
}

/// Fixed-capacity send buffer for status line and headers
///
/// Every append is checked against the capacity on its own; an append that
/// does not fit leaves the buffer untouched and fails.
pub struct WriteBuffer {
    data: Box<[u8]>,
    write_cursor: usize,
}

impl WriteBuffer {
    /// Create a new buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            write_cursor: 0,
        }
    }

    /// Append raw bytes
    pub fn append(&mut self, bytes: &[u8]) -> ServerResult<()> {
        if bytes.len() > self.remaining_capacity() {
            return Err(ServerError::ResponseTooLarge(self.capacity()));
        }
        self.data[self.write_cursor..self.write_cursor + bytes.len()].copy_from_slice(bytes);
        self.write_cursor += bytes.len();
        Ok(())
    }

    /// Append the decimal representation of `value`
    pub fn append_decimal(&mut self, mut value: usize) -> ServerResult<()> {
        let mut digits = [0u8; 20];
        let mut pos = digits.len();
        loop {
            pos -= 1;
            digits[pos] = b'0' + (value % 10) as u8;
            value /= 10;
            if value == 0 {
                break;
            }
        }
        self.append(&digits[pos..])
    }

    /// Clear all pending bytes
    pub fn reset(&mut self) {
        self.data[..self.write_cursor].fill(0);
        self.write_cursor = 0;
    }

    /// Pending bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.write_cursor]
    }

    /// Number of pending bytes
    pub fn len(&self) -> usize {
        self.write_cursor
    }

    pub fn is_empty(&self) -> bool {
        self.write_cursor == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.data.len() - self.write_cursor
    }
}
