//! Growable byte buffer with read/write cursors
//!
//! Network input is accumulated here before the RESP parser runs over it.
//! The buffer keeps three regions inside one contiguous allocation:
//!
//! ```text
//! +-------------+------------------+------------------+
//! | prependable |     readable     |     writable     |
//! +-------------+------------------+------------------+
//! 0          reader             writer            capacity
//! ```
//!
//! Invariant: `CHEAP_PREPEND <= reader <= writer <= capacity`.
//!
//! Appends reclaim already-consumed space by shifting the readable region
//! left whenever that makes enough room; the allocation only grows when a
//! shift cannot satisfy the append. Draining the buffer snaps both cursors
//! back to the prepend mark so the whole writable region is reusable.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Reserved space in front of the readable region.
pub const CHEAP_PREPEND: usize = 8;

/// Initial writable capacity.
pub const INITIAL_SIZE: usize = 1024;

/// Stack staging area used by [`Buffer::read_from`]. One read call can
/// ingest a burst this large without forcing the buffer to grow first.
const READ_STACK_SIZE: usize = 64 * 1024;

/// Growable input buffer with explicit read/write cursors.
#[derive(Debug)]
pub struct Buffer {
    storage: Vec<u8>,
    reader: usize,
    writer: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    /// Creates an empty buffer with the default capacity.
    pub fn new() -> Self {
        Self {
            storage: vec![0; CHEAP_PREPEND + INITIAL_SIZE],
            reader: CHEAP_PREPEND,
            writer: CHEAP_PREPEND,
        }
    }

    /// Number of bytes available to read.
    pub fn readable_bytes(&self) -> usize {
        self.writer - self.reader
    }

    /// Number of bytes that can be appended without making space.
    pub fn writable_bytes(&self) -> usize {
        self.storage.len() - self.writer
    }

    /// Size of the region in front of the reader cursor.
    pub fn prependable_bytes(&self) -> usize {
        self.reader
    }

    /// Returns the readable region.
    pub fn peek(&self) -> &[u8] {
        &self.storage[self.reader..self.writer]
    }

    /// Copies `data` into the writable region, shifting or growing first
    /// if needed.
    pub fn append(&mut self, data: &[u8]) {
        self.make_space(data.len());
        self.storage[self.writer..self.writer + data.len()].copy_from_slice(data);
        self.writer += data.len();
    }

    /// Advances the reader cursor by up to `n` bytes.
    ///
    /// Draining the buffer completely resets both cursors to the prepend
    /// mark.
    pub fn retrieve(&mut self, n: usize) {
        self.reader += n.min(self.readable_bytes());
        if self.reader == self.writer {
            self.reader = CHEAP_PREPEND;
            self.writer = CHEAP_PREPEND;
        }
    }

    /// Consumes up to `n` readable bytes and returns them.
    pub fn retrieve_as_bytes(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.readable_bytes());
        let out = self.storage[self.reader..self.reader + n].to_vec();
        self.retrieve(n);
        out
    }

    /// Drops everything currently readable.
    pub fn retrieve_all(&mut self) {
        self.reader = CHEAP_PREPEND;
        self.writer = CHEAP_PREPEND;
    }

    /// Scans the readable region for the first `\r\n`.
    ///
    /// Returns its offset from the reader cursor, or `None` when the
    /// terminator is not present (it may still arrive in a later chunk).
    pub fn find_crlf(&self) -> Option<usize> {
        self.peek().windows(2).position(|pair| pair == b"\r\n")
    }

    /// Reads once from `reader` into the buffer via a 64 KiB stack staging
    /// area, so a single call ingests a large burst without growing the
    /// allocation up front.
    ///
    /// Returns the number of bytes read; `Ok(0)` means end of stream.
    pub async fn read_from<R>(&mut self, reader: &mut R) -> std::io::Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        let mut stack = [0u8; READ_STACK_SIZE];
        let n = reader.read(&mut stack).await?;
        if n > 0 {
            self.append(&stack[..n]);
        }
        Ok(n)
    }

    /// Makes room for `len` more bytes: shift the readable region left
    /// when the discarded prepend space plus the writable tail suffice,
    /// otherwise grow the allocation.
    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() >= len {
            return;
        }
        if self.writable_bytes() + self.prependable_bytes() - CHEAP_PREPEND >= len {
            let readable = self.readable_bytes();
            self.storage.copy_within(self.reader..self.writer, CHEAP_PREPEND);
            self.reader = CHEAP_PREPEND;
            self.writer = CHEAP_PREPEND + readable;
        } else {
            let target = (self.writer + len).next_power_of_two();
            self.storage.resize(target, 0);
        }
    }
}
