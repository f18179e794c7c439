//! # RESP2 Framing
//!
//! Parse RESP2 arrays of bulk strings (and inline commands) from a streaming
//! TCP buffer, and encode replies back into RESP2 frames.
//!
//! ## Design Principles
//!
//! 1. **State Machine Pattern**: Explicit parser states avoid backtracking and
//!    keep control flow predictable.
//! 2. **Streaming Friendly**: The parser consumes from a mutable buffer and
//!    returns `None` when more data is needed.
//! 3. **Low Allocation**: Only bulk string arguments are copied into `Vec<u8>`.
//! 4. **Fail Fast**: Malformed frames return a protocol error immediately.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

use ckv_common::Reply;

/// Upper bound on a single bulk argument, matching Redis' default.
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Upper bound on the number of arguments in one multibulk request.
pub const MAX_MULTIBULK_LEN: usize = 1024 * 1024;

/// Upper bound on an inline request line, newline excluded.
pub const MAX_INLINE_LEN: usize = 64 * 1024;

/// RESP parser errors surfaced to the server for client responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespError {
    /// Array header is not a valid length.
    InvalidMultibulkLength,
    /// Bulk header is missing the `$` marker or has an invalid length.
    InvalidBulkLength,
    /// Bulk payload is not terminated by CRLF.
    MissingTerminator,
    /// Inline request has an unbalanced quote.
    UnbalancedQuotes,
    /// Inline request line exceeds `MAX_INLINE_LEN`.
    InlineTooLong,
}

impl fmt::Display for RespError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::InvalidMultibulkLength => "invalid multibulk length",
            Self::InvalidBulkLength => "invalid bulk length",
            Self::MissingTerminator => "expected CRLF after bulk data",
            Self::UnbalancedQuotes => "unbalanced quotes in request",
            Self::InlineTooLong => "too big inline request",
        };
        write!(f, "{}", label)
    }
}

impl std::error::Error for RespError {}

/// RESP2 parser for arrays of bulk strings and inline commands.
#[derive(Debug, Default)]
pub struct RespParser {
    state: ParseState,
    args: Vec<Vec<u8>>,
    remaining: usize,
    bulk_len: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    #[default]
    Start,
    BulkLen,
    BulkData,
}

impl RespParser {
    /// Creates a new parser in the initial state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to parse a single command from the buffer.
    ///
    /// Returns `Ok(None)` if more data is required. Empty requests (`*0` or a
    /// blank inline line) are returned as an empty vector; callers skip them.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        loop {
            match self.state {
                ParseState::Start => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    if buf[0] != b'*' {
                        return parse_inline(buf);
                    }
                    let line = match read_line(buf) {
                        Some(line) => line,
                        None => return Ok(None),
                    };
                    let count = parse_len(&line[1..]).ok_or(RespError::InvalidMultibulkLength)?;
                    if count > MAX_MULTIBULK_LEN {
                        return Err(RespError::InvalidMultibulkLength);
                    }
                    self.args.clear();
                    self.remaining = count;
                    if self.remaining == 0 {
                        return Ok(Some(Vec::new()));
                    }
                    self.state = ParseState::BulkLen;
                }
                ParseState::BulkLen => {
                    let line = match read_line(buf) {
                        Some(line) => line,
                        None => return Ok(None),
                    };
                    if line.first() != Some(&b'$') {
                        return Err(RespError::InvalidBulkLength);
                    }
                    let len = parse_len(&line[1..]).ok_or(RespError::InvalidBulkLength)?;
                    if len > MAX_BULK_LEN {
                        return Err(RespError::InvalidBulkLength);
                    }
                    self.bulk_len = len;
                    self.state = ParseState::BulkData;
                }
                ParseState::BulkData => {
                    if buf.len() < self.bulk_len + 2 {
                        return Ok(None);
                    }
                    let data = buf.split_to(self.bulk_len).to_vec();
                    if buf.get_u8() != b'\r' || buf.get_u8() != b'\n' {
                        return Err(RespError::MissingTerminator);
                    }
                    self.args.push(data);
                    self.remaining -= 1;
                    if self.remaining == 0 {
                        self.state = ParseState::Start;
                        return Ok(Some(std::mem::take(&mut self.args)));
                    }
                    self.state = ParseState::BulkLen;
                }
            }
        }
    }
}

/// Parses a telnet-style request: whitespace-separated words on one line,
/// with optional double quotes around words that contain spaces.
fn parse_inline(buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
    let end = match buf.iter().position(|b| *b == b'\n') {
        Some(end) => end,
        // One extra byte for a CR still waiting on its LF.
        None if buf.len() > MAX_INLINE_LEN + 1 => return Err(RespError::InlineTooLong),
        None => return Ok(None),
    };
    let line_len = if end > 0 && buf[end - 1] == b'\r' { end - 1 } else { end };
    if line_len > MAX_INLINE_LEN {
        return Err(RespError::InlineTooLong);
    }
    let mut line = buf.split_to(end + 1);
    line.truncate(end);
    if line.last() == Some(&b'\r') {
        line.truncate(end - 1);
    }

    let mut args = Vec::new();
    let mut current = Vec::new();
    let mut in_word = false;
    let mut quoted = false;
    for &b in line.iter() {
        match b {
            b'"' => {
                quoted = !quoted;
                in_word = true;
            }
            b' ' | b'\t' if !quoted => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            _ => {
                current.push(b);
                in_word = true;
            }
        }
    }
    if quoted {
        return Err(RespError::UnbalancedQuotes);
    }
    if in_word {
        args.push(current);
    }
    Ok(Some(args))
}

fn read_line(buf: &mut BytesMut) -> Option<BytesMut> {
    let mut idx = 1;
    while idx < buf.len() {
        if buf[idx] == b'\n' && buf[idx - 1] == b'\r' {
            let line = buf.split_to(idx - 1);
            buf.advance(2);
            return Some(line);
        }
        idx += 1;
    }
    None
}

fn parse_len(data: &[u8]) -> Option<usize> {
    if data.is_empty() {
        return None;
    }
    let mut value: usize = 0;
    for &b in data {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add((b - b'0') as usize)?;
    }
    Some(value)
}

/// Appends the RESP2 encoding of `reply` to `out`.
pub fn encode_reply(reply: &Reply, out: &mut BytesMut) {
    match reply {
        Reply::Status(text) => {
            out.put_u8(b'+');
            put_line(out, text.as_bytes());
        }
        Reply::Error(text) => {
            out.put_u8(b'-');
            put_line(out, text.as_bytes());
        }
        Reply::Integer(n) => {
            out.put_u8(b':');
            put_line(out, n.to_string().as_bytes());
        }
        Reply::Bulk(data) => {
            out.put_u8(b'$');
            put_line(out, data.len().to_string().as_bytes());
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }
        Reply::Null => out.extend_from_slice(b"$-1\r\n"),
    }
}

/// Status and error lines cannot carry raw line breaks.
fn put_line(out: &mut BytesMut, text: &[u8]) {
    out.extend(text.iter().map(|b| match b {
        b'\r' | b'\n' => b' ',
        other => *other,
    }));
    out.extend_from_slice(b"\r\n");
}
