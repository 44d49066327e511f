//! Line reassembly for chunked process output.
//!
//! Pipes hand us arbitrary chunks. A chunk may end halfway through a line,
//! contain several lines, or contain carriage-return redraws from a progress
//! bar. Everything up to the last separator is complete; the remainder waits
//! in a pending buffer until more data arrives or the stream closes.

/// Split `buffer + chunk` into complete lines and the new pending buffer
///
/// `\r` ends a line for in-place redraws and `\n` ends a normal line; a
/// `\r\n` pair is a single separator. Blank lines between two separators are
/// kept. The trailing text (possibly empty) is never returned as complete.
pub fn feed(buffer: &str, chunk: &str) -> (Vec<String>, String) {
    let mut lines = Vec::new();
    let mut current = String::with_capacity(buffer.len());
    let mut chars = buffer.chars().chain(chunk.chars()).peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                chars.next_if_eq(&'\n');
                lines.push(std::mem::take(&mut current));
            }
            '\n' => lines.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    (lines, current)
}

/// Per-stream wrapper around [`feed`]
///
/// Also remembers a `\r` that ended the previous chunk, so a `\r\n` split
/// across two chunks still counts once. Feeding the same text in any
/// chunking produces the same lines and the same final pending buffer.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
    after_cr: bool,
    flushed: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a chunk and return the lines it completed
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        if chunk.is_empty() {
            return Vec::new();
        }
        let chunk = if self.after_cr {
            chunk.strip_prefix('\n').unwrap_or(chunk)
        } else {
            chunk
        };
        self.after_cr = chunk.ends_with('\r');

        let (lines, pending) = feed(&self.pending, chunk);
        self.pending = pending;
        lines
    }

    /// Text received since the last separator
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Take the trailing partial line when the stream closes
    ///
    /// Returns `None` on every call after the first, and for an empty buffer.
    pub fn flush(&mut self) -> Option<String> {
        if self.flushed {
            return None;
        }
        self.flushed = true;
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            None
        } else {
            Some(pending)
        }
    }
}

/// Incremental UTF-8 decoding for byte chunks
///
/// Holds back an incomplete multi-byte sequence at the end of a chunk until
/// the next chunk completes it. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.carry.len());
        let mut rest: &[u8] = &self.carry;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // valid_up_to() guarantees this prefix is UTF-8
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Incomplete sequence at the end: wait for more bytes
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let remaining = rest.to_vec();
        self.carry = remaining;
        out
    }

    /// Whatever is left at end of stream, lossily decoded
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&rest).into_owned()
    }
}
