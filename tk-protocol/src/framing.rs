use std::fmt;
use std::str::FromStr;

use log::{trace, warn};

use crate::decoder::{HANDSHAKE_MARKER, IMEI_PREFIX, LOCATION_FIELDS};

/// Bytes that terminate a frame in delimited mode.
pub const DELIMITERS: &[u8] = b";\r\n";

/// Default cap on an unterminated frame before it is discarded.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024;

/// How a byte stream is cut into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// The bytes of one read are one frame.
    PerRead,
    /// Frames end at `;`, `\r` or `\n`. Unterminated bytes are held until
    /// more data arrives or the caller flushes them. A read that starts a
    /// new frame also ends the held one.
    #[default]
    Delimited,
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-read" => Ok(Self::PerRead),
            "delimited" => Ok(Self::Delimited),
            other => Err(format!("unknown framing {other:?} (expected per-read or delimited)")),
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerRead => write!(f, "per-read"),
            Self::Delimited => write!(f, "delimited"),
        }
    }
}

/// Accumulates reads from one connection and yields complete frames.
#[derive(Debug)]
pub struct FrameBuffer {
    framing: Framing,
    buf: Vec<u8>,
    max_frame_len: usize,
}

impl FrameBuffer {
    pub fn new(framing: Framing, max_frame_len: usize) -> Self {
        Self {
            framing,
            buf: Vec::with_capacity(256),
            max_frame_len,
        }
    }

    /// Feed the bytes of one read and return every frame they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        match self.framing {
            Framing::PerRead => {
                if bytes.iter().all(u8::is_ascii_whitespace) {
                    Vec::new()
                } else {
                    vec![bytes.to_vec()]
                }
            }
            Framing::Delimited => self.push_delimited(bytes),
        }
    }

    fn push_delimited(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        if self.ends_held_frame(bytes) {
            trace!("read boundary closes {} held bytes", self.buf.len());
            frames.extend(self.flush());
        }
        self.buf.extend_from_slice(bytes);

        while let Some(pos) = self.buf.iter().position(|b| DELIMITERS.contains(b)) {
            let frame: Vec<u8> = self.buf.drain(..=pos).take(pos).collect();
            if !frame.iter().all(u8::is_ascii_whitespace) {
                frames.push(frame);
            }
        }

        if self.buf.len() > self.max_frame_len {
            warn!(
                "discarding {} unterminated bytes (limit {})",
                self.buf.len(),
                self.max_frame_len
            );
            self.buf.clear();
        } else if !self.buf.is_empty() {
            trace!("holding {} unterminated bytes", self.buf.len());
        }
        frames
    }

    /// Whether the held bytes are a finished frame, given the next read.
    ///
    /// Units that omit delimiters send one frame per write. A read opening
    /// with `imei:` or `##` starts a new frame, and a held location report
    /// with all of its fields is complete on its own.
    fn ends_held_frame(&self, next: &[u8]) -> bool {
        if self.buf.is_empty() {
            return false;
        }
        if next.starts_with(IMEI_PREFIX.as_bytes())
            || next.starts_with(HANDSHAKE_MARKER.as_bytes())
        {
            return true;
        }
        self.buf.starts_with(IMEI_PREFIX.as_bytes())
            && self.buf.iter().filter(|&&b| b == b',').count() + 1 == LOCATION_FIELDS
    }

    /// Whether unterminated bytes are waiting for a delimiter.
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Take the unterminated remainder as a frame.
    ///
    /// Called when the connection goes quiet, so delimiter-less frames from
    /// legacy units still get decoded.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        let frame = std::mem::take(&mut self.buf);
        if frame.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(frame)
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(Framing::default(), DEFAULT_MAX_FRAME_LEN)
    }
}
