//! Incremental framing for newline-delimited (or bare concatenated) JSON.
//!
//! Inbound, a node normally writes one JSON value per line, but some write
//! values back to back without any separator. [`FrameParser::feed`] handles
//! both and produces the same messages no matter how the stream is chunked.

use serde::Serialize;
use serde_json::Value;

const NEWLINE: u8 = b'\n';

/// Framing errors. Malformed individual messages are not errors here; they
/// are counted and skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("framing buffer overflow: {attempted} bytes would exceed the {limit} byte bound, buffer discarded")]
    BufferOverflow { attempted: usize, limit: usize },
}

/// Serialize one outbound value as a newline-terminated frame.
pub fn encode_frame<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(NEWLINE);
    Ok(bytes)
}

/// Resumable state of the depth-counting scan, so feeding one byte at a
/// time does not rescan the whole buffer.
#[derive(Debug, Default)]
struct Scan {
    pos: usize,
    start: Option<usize>,
    depth: usize,
    in_string: bool,
    escaped: bool,
    junk: bool,
}

/// Turns an inbound byte stream into whole JSON values.
#[derive(Debug)]
pub struct FrameParser {
    buf: Vec<u8>,
    max_buffer_bytes: usize,
    scan: Scan,
    parse_errors: u64,
    overflows: u64,
}

impl FrameParser {
    pub fn new(max_buffer_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_buffer_bytes,
            scan: Scan::default(),
            parse_errors: 0,
            overflows: 0,
        }
    }

    /// Append `bytes` and return every value completed by them, in stream
    /// order.
    ///
    /// If the append would push the buffer past `max_buffer_bytes`, the
    /// buffered bytes and `bytes` are both dropped and
    /// [`FrameError::BufferOverflow`] is returned. The parser stays usable.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Value>, FrameError> {
        let attempted = self.buf.len() + bytes.len();
        if attempted > self.max_buffer_bytes {
            self.reset();
            self.overflows += 1;
            tracing::warn!(
                attempted,
                limit = self.max_buffer_bytes,
                "framing buffer overflow, discarding buffered bytes"
            );
            return Err(FrameError::BufferOverflow {
                attempted,
                limit: self.max_buffer_bytes,
            });
        }
        self.buf.extend_from_slice(bytes);

        let mut out = Vec::new();
        if bytes.contains(&NEWLINE) {
            self.drain_lines(&mut out);
        }
        self.drain_concatenated(&mut out);
        Ok(out)
    }

    /// Drop everything buffered (e.g. after the connection was lost).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.scan = Scan::default();
    }

    /// Number of malformed lines / messages skipped so far.
    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    /// Number of times the buffer bound was hit.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Bytes currently held waiting for the rest of a message.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    // ── Newline-delimited fast path ─────────────────────────────────

    fn drain_lines(&mut self, out: &mut Vec<Value>) {
        let Some(last) = self.buf.iter().rposition(|b| *b == NEWLINE) else {
            return;
        };
        let complete: Vec<u8> = self.buf.drain(..=last).collect();
        self.scan = Scan::default();

        for line in complete.split(|b| *b == NEWLINE) {
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            self.decode_line(line, out);
        }
    }

    /// A line normally holds one value, but bare concatenation inside a
    /// line (`{..}{..}`) is decoded too. Decoding stops at the first error.
    fn decode_line(&mut self, line: &[u8], out: &mut Vec<Value>) {
        let stream = serde_json::Deserializer::from_slice(line).into_iter::<Value>();
        for item in stream {
            match item {
                Ok(value) => out.push(value),
                Err(e) => {
                    self.parse_errors += 1;
                    tracing::debug!(
                        error = %e,
                        len = line.len(),
                        "skipping malformed line"
                    );
                    break;
                }
            }
        }
    }

    // ── Depth-counting fallback ─────────────────────────────────────

    fn drain_concatenated(&mut self, out: &mut Vec<Value>) {
        loop {
            let Some((start, end)) = self.scan_next() else {
                if self.scan.start.is_none() && self.scan.pos > 0 {
                    // Only whitespace / junk scanned so far.
                    self.note_junk();
                    self.buf.drain(..self.scan.pos);
                    self.scan = Scan::default();
                }
                return;
            };

            self.note_junk();
            match serde_json::from_slice::<Value>(&self.buf[start..end]) {
                Ok(value) => out.push(value),
                Err(e) => {
                    self.parse_errors += 1;
                    tracing::debug!(error = %e, len = end - start, "skipping malformed message");
                }
            }
            self.buf.drain(..end);
            self.scan = Scan::default();
        }
    }

    fn note_junk(&mut self) {
        if self.scan.junk {
            self.scan.junk = false;
            self.parse_errors += 1;
            tracing::debug!("skipping non-JSON bytes between messages");
        }
    }

    /// Advance the scan. Returns the byte range of the next complete value
    /// once its outermost bracket closes.
    fn scan_next(&mut self) -> Option<(usize, usize)> {
        let s = &mut self.scan;
        while s.pos < self.buf.len() {
            let b = self.buf[s.pos];
            s.pos += 1;

            let Some(start) = s.start else {
                match b {
                    b'{' | b'[' => {
                        s.start = Some(s.pos - 1);
                        s.depth = 1;
                    }
                    b if b.is_ascii_whitespace() => {}
                    _ => s.junk = true,
                }
                continue;
            };

            if s.in_string {
                if s.escaped {
                    s.escaped = false;
                } else if b == b'\\' {
                    s.escaped = true;
                } else if b == b'"' {
                    s.in_string = false;
                }
                continue;
            }

            match b {
                b'"' => s.in_string = true,
                b'{' | b'[' => s.depth += 1,
                b'}' | b']' => {
                    s.depth -= 1;
                    if s.depth == 0 {
                        return Some((start, s.pos));
                    }
                }
                _ => {}
            }
        }
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
