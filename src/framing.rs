//! CRLF line framing for the server connection.
//!
//! The server speaks a line protocol: every message is terminated by
//! `\r\n`. Reads from the transport arrive in arbitrary chunks, so the
//! framer keeps the unterminated tail of the previous read and splices it
//! onto the next one.
//!
//! ```text
//! read #1: "PING :a\r\nNOTICE * :hel"   → ["PING :a"], keeps "NOTICE * :hel"
//! read #2: "lo\r\n"                      → ["NOTICE * :hello"], keeps ""
//! ```
//!
//! The receive buffer is bounded. One byte of the capacity is reserved (it
//! used to hold the scan sentinel), so a partial line may grow to at most
//! `capacity - 1` bytes; reaching `capacity` without a terminator is an
//! overflow and the connection is considered broken.

use crate::constants::{LINE_TERMINATOR, RECV_BUFFER_CAPACITY};

/// Framing failures. All of them are fatal to the current connection only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// A line grew to the buffer capacity without a terminator.
    Overflow {
        /// Bytes buffered when the overflow was detected.
        buffered: usize,
        /// Capacity of the receive buffer.
        capacity: usize,
    },
}

impl std::fmt::Display for FramingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overflow { buffered, capacity } => write!(
                f,
                "receive buffer overflow: {buffered} bytes without a line terminator (capacity {capacity})"
            ),
        }
    }
}

impl std::error::Error for FramingError {}

/// Incremental CRLF splitter with a bounded receive buffer.
///
/// Feed bytes via [`LineFramer::feed`] and get back every complete line.
/// The partial tail survives between calls until [`LineFramer::clear`] is
/// called, which the engine does whenever the connection is dropped or
/// replaced.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    capacity: usize,
    /// Offset from which the next delimiter scan resumes.
    scan_from: usize,
}

impl LineFramer {
    /// Create a framer with the default 4096-byte receive buffer.
    pub fn new() -> Self {
        Self::with_capacity(RECV_BUFFER_CAPACITY)
    }

    /// Create a framer with a custom capacity (must leave room for CRLF).
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity > LINE_TERMINATOR.len(),
            "receive buffer must fit at least a terminator"
        );
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            scan_from: 0,
        }
    }

    /// Capacity of the receive buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes that can be read from the transport without the
    /// buffer exceeding its capacity.
    ///
    /// Always at least 1 while the framer is healthy, since the retained
    /// tail is kept strictly below capacity.
    pub fn read_budget(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    /// Append bytes and extract all complete lines, terminators removed.
    ///
    /// Lines are returned in arrival order. An empty line (`"\r\n"` alone)
    /// yields an empty message. Incomplete data is retained for the next
    /// call.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Overflow`] when the retained tail reaches the
    /// capacity. The buffer is cleared in that case; lines completed earlier
    /// in the same call are discarded along with the connection.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        let mut cut = 0;

        // A CR at the very end of the previous chunk may pair with an LF at
        // the start of this one, so resume one byte early.
        let mut pos = self.scan_from.saturating_sub(1).max(cut);
        while let Some(offset) = find_terminator(&self.buf[pos..]) {
            let end = pos + offset;
            lines.push(self.buf[cut..end].to_vec());
            cut = end + LINE_TERMINATOR.len();
            pos = cut;
        }

        // Compact the unterminated remainder to the front
        self.buf.drain(..cut);
        self.scan_from = self.buf.len();

        if self.buf.len() >= self.capacity {
            let buffered = self.buf.len();
            self.clear();
            return Err(FramingError::Overflow {
                buffered,
                capacity: self.capacity,
            });
        }

        Ok(lines)
    }

    /// Returns true if a partial line is buffered.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// The buffered partial line.
    pub fn partial(&self) -> &[u8] {
        &self.buf
    }

    /// Drop any buffered partial line.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.scan_from = 0;
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(LINE_TERMINATOR.len())
        .position(|window| window == LINE_TERMINATOR)
}
