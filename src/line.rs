//! Line tokenizer over the receive buffer.
//!
//! The scan is restartable: each call resumes at the buffer's parse cursor and
//! never looks at bytes an earlier call already consumed.

use crate::buffer::{ReadBuffer, Span};

/// Result of scanning for the next line terminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// A full line, terminator excluded
    Complete(Span),
    /// More bytes are needed before the line ends
    Open,
    /// Stray CR or LF
    Malformed,
}

/// Scan `[parse_cursor, read_cursor)` for the end of the current line
pub fn next_line(buf: &mut ReadBuffer) -> LineStatus {
    let read_cursor = buf.read_cursor();
    let mut pos = buf.parse_cursor();

    while pos < read_cursor {
        match buf.byte(pos) {
            b'\r' => {
                // CR is the last byte received, wait for the LF
                if pos + 1 == read_cursor {
                    buf.set_parse_cursor(pos);
                    return LineStatus::Open;
                }
                if buf.byte(pos + 1) == b'\n' {
                    return finish_line(buf, pos, pos + 2);
                }
                buf.set_parse_cursor(pos);
                return LineStatus::Malformed;
            }
            b'\n' => {
                if pos > buf.line_start() && buf.byte(pos - 1) == b'\r' {
                    return finish_line(buf, pos - 1, pos + 1);
                }
                buf.set_parse_cursor(pos);
                return LineStatus::Malformed;
            }
            _ => pos += 1,
        }
    }

    buf.set_parse_cursor(pos);
    LineStatus::Open
}

fn finish_line(buf: &mut ReadBuffer, terminator: usize, next: usize) -> LineStatus {
    let line = Span::new(buf.line_start(), terminator);
    for pos in terminator..next {
        buf.clear_byte(pos);
    }
    buf.set_parse_cursor(next);
    LineStatus::Complete(line)
}
