//! Line framing for engine output.
//!
//! Engines write newline-terminated text, but pipe reads hand back arbitrary
//! chunks. `LineFramer` buffers raw bytes and yields complete, trimmed,
//! non-empty lines; a trailing partial line waits for the next chunk.

use bytes::BytesMut;

/// Splits a byte stream into response lines
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: BytesMut,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, in arrival order.
    ///
    /// Splitting happens on raw bytes, so a multi-byte character cut in half
    /// by a read boundary is decoded only once the whole line is present.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw = self.buffer.split_to(pos + 1);
            if let Some(line) = decode_line(&raw[..pos]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush the unterminated tail, if any. Used once the stream hits EOF.
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.buffer.split();
        decode_line(&rest)
    }

    /// Bytes buffered but not yet terminated by a newline
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
