//! Cursor-based receive buffer.
//!
//! A [`FrameBuffer`] keeps received bytes in one contiguous allocation. Parsed
//! frames are released by advancing a read cursor rather than shifting the
//! remaining bytes, so a read that carries several frames costs no copies.
//! Space behind the cursor is reclaimed lazily: when the tail is full and the
//! cursor has passed one allocation quantum, the unconsumed bytes are moved to
//! the front; otherwise the storage grows by one quantum.

use tracing::trace;

/// Default allocation quantum (32 KiB). Also the initial capacity.
pub const DEFAULT_QUANTUM: usize = 32 * 1024;

/// Storage a session reads into and parses out of.
///
/// The session only ever talks to its receive buffer through this trait, so a
/// caller can supply its own implementation (a ring buffer, a pooled slab).
pub trait RecvBuffer: Send + 'static {
    /// Mutable region right after the valid bytes. Must never be empty.
    fn writable(&mut self) -> &mut [u8];

    /// Make at least `additional` bytes writable before the next read.
    fn reserve(&mut self, additional: usize);

    /// Mark the first `n` bytes of the last [`writable`](Self::writable) view as valid.
    fn commit(&mut self, n: usize);

    /// Release `n` bytes from the front of the valid region.
    fn consume(&mut self, n: usize);

    /// Contiguous view of the valid, unconsumed bytes.
    fn data(&self) -> &[u8];
}

/// Growable byte buffer with a read cursor.
///
/// Invariant: `cursor + len <= capacity`.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    storage: Vec<u8>,
    cursor: usize,
    len: usize,
    quantum: usize,
}

impl FrameBuffer {
    /// Create an empty buffer with the default quantum.
    pub fn new() -> Self {
        Self::with_quantum(DEFAULT_QUANTUM)
    }

    /// Create an empty buffer whose growth step and compaction threshold is `quantum`.
    pub fn with_quantum(quantum: usize) -> Self {
        let quantum = quantum.max(1);
        Self {
            storage: vec![0; quantum],
            cursor: 0,
            len: 0,
            quantum,
        }
    }

    /// Create a buffer pre-filled with `data`, e.g. a send-side staging buffer.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_slice_with_quantum(data, DEFAULT_QUANTUM)
    }

    /// Create a pre-filled buffer with a custom quantum.
    pub fn from_slice_with_quantum(data: &[u8], quantum: usize) -> Self {
        let quantum = quantum.max(1);
        let mut storage = vec![0; quantum.max(data.len())];
        storage[..data.len()].copy_from_slice(data);
        Self {
            storage,
            cursor: 0,
            len: data.len(),
            quantum,
        }
    }

    /// Valid, unconsumed bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.storage[self.cursor..self.cursor + self.len]
    }

    /// Number of valid bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no valid bytes remain.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the first valid byte in the backing storage.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Size of the backing storage.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Growth step and compaction threshold.
    #[inline]
    pub fn quantum(&self) -> usize {
        self.quantum
    }

    /// Bytes available after the valid region without growing or compacting.
    #[inline]
    pub fn writable_len(&self) -> usize {
        self.storage.len() - self.cursor - self.len
    }

    /// Writable region after the valid bytes, making room first if the tail is full.
    pub fn writable(&mut self) -> &mut [u8] {
        if self.writable_len() == 0 {
            if self.cursor >= self.quantum {
                self.compact();
            } else {
                self.grow(1);
            }
        }
        let start = self.cursor + self.len;
        &mut self.storage[start..]
    }

    /// Make at least `additional` bytes writable after the valid bytes.
    ///
    /// Same policy as [`writable`](Self::writable): compact once the cursor has
    /// passed a quantum, otherwise grow in whole quanta.
    pub fn reserve(&mut self, additional: usize) {
        if self.writable_len() >= additional {
            return;
        }
        if self.cursor >= self.quantum {
            self.compact();
            if self.writable_len() >= additional {
                return;
            }
        }
        let missing = additional - self.writable_len();
        self.grow(missing.div_ceil(self.quantum));
    }

    /// Mark `n` freshly written bytes as valid.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(
            n <= self.writable_len(),
            "commit({}) exceeds {} writable bytes",
            n,
            self.writable_len()
        );
        self.len += n.min(self.writable_len());
    }

    /// Release `n` bytes from the front. The cursor rewinds to 0 once nothing is left.
    ///
    /// Consuming more than [`len`](Self::len) is a caller bug: it panics in
    /// debug builds and releases everything in release builds.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(
            n <= self.len,
            "consume({}) exceeds {} valid bytes",
            n,
            self.len
        );
        let n = n.min(self.len);
        self.cursor += n;
        self.len -= n;
        if self.len == 0 {
            self.cursor = 0;
        }
    }

    /// Copy `data` after the valid bytes, growing as needed.
    pub fn append(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let window = self.writable();
            let n = window.len().min(data.len());
            window[..n].copy_from_slice(&data[..n]);
            self.commit(n);
            data = &data[n..];
        }
    }

    /// Move the valid bytes to offset 0. Capacity is unchanged.
    pub fn compact(&mut self) {
        if self.cursor == 0 {
            return;
        }
        trace!(
            "Compacting buffer: moving {} bytes from offset {}",
            self.len,
            self.cursor
        );
        self.storage
            .copy_within(self.cursor..self.cursor + self.len, 0);
        self.cursor = 0;
    }

    /// Compact, then release storage beyond the valid bytes rounded up to the quantum.
    ///
    /// Never called by the session itself.
    pub fn shrink(&mut self) {
        self.compact();
        let target = self
            .quantum
            .max(self.len.div_ceil(self.quantum) * self.quantum);
        if target < self.storage.len() {
            trace!("Shrinking buffer from {} to {} bytes", self.storage.len(), target);
            self.storage.truncate(target);
            self.storage.shrink_to_fit();
        }
    }

    /// Drop all valid bytes and rewind the cursor.
    pub fn clear(&mut self) {
        self.cursor = 0;
        self.len = 0;
    }

    fn grow(&mut self, quanta: usize) {
        let capacity = self.storage.len() + quanta * self.quantum;
        trace!("Growing buffer from {} to {} bytes", self.storage.len(), capacity);
        self.storage.resize(capacity, 0);
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecvBuffer for FrameBuffer {
    fn writable(&mut self) -> &mut [u8] {
        FrameBuffer::writable(self)
    }

    fn reserve(&mut self, additional: usize) {
        FrameBuffer::reserve(self, additional)
    }

    fn commit(&mut self, n: usize) {
        FrameBuffer::commit(self, n)
    }

    fn consume(&mut self, n: usize) {
        FrameBuffer::consume(self, n)
    }

    fn data(&self) -> &[u8] {
        FrameBuffer::data(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(buf: &mut FrameBuffer, bytes: &[u8]) {
        let window = buf.writable();
        assert!(window.len() >= bytes.len());
        window[..bytes.len()].copy_from_slice(bytes);
        buf.commit(bytes.len());
    }

    fn assert_invariant(buf: &FrameBuffer) {
        assert!(buf.cursor() + buf.len() <= buf.capacity());
        assert_eq!(buf.data().len(), buf.len());
    }

    #[test]
    fn test_empty_buffer_is_writable() {
        let mut buf = FrameBuffer::with_quantum(16);
        assert!(buf.is_empty());
        assert_eq!(buf.writable().len(), 16);
        assert!(buf.data().is_empty());
    }

    #[test]
    fn test_commit_and_consume() {
        let mut buf = FrameBuffer::with_quantum(16);
        write(&mut buf, b"hello world");
        assert_eq!(buf.data(), b"hello world");

        buf.consume(6);
        assert_eq!(buf.data(), b"world");
        assert_eq!(buf.cursor(), 6);
        assert_invariant(&buf);
    }

    #[test]
    fn test_consume_everything_then_write_again() {
        let mut buf = FrameBuffer::with_quantum(8);
        write(&mut buf, b"12345678");
        buf.consume(8);
        assert!(buf.is_empty());

        // No explicit reset needed
        let window = buf.writable();
        assert!(!window.is_empty());
        write(&mut buf, b"ab");
        assert_eq!(buf.data(), b"ab");
        assert_invariant(&buf);
    }

    #[test]
    fn test_compacts_once_cursor_reaches_quantum() {
        let quantum = 8;
        let mut buf = FrameBuffer::with_quantum(quantum);
        buf.append(b"abcdefghijkl");
        assert_eq!(buf.capacity(), 2 * quantum);
        buf.consume(quantum);
        write(&mut buf, b"mnop");

        buf.writable();
        assert_eq!(buf.cursor(), 0);
        assert_eq!(buf.capacity(), 2 * quantum);
        assert_eq!(buf.data(), b"ijklmnop");
    }

    #[test]
    fn test_consuming_everything_rewinds_cursor() {
        let mut buf = FrameBuffer::with_quantum(64);
        for _ in 0..20 {
            write(&mut buf, b"9abcdefghi");
            assert_eq!(buf.writable_len(), 54);
            buf.consume(10);
            assert_eq!(buf.cursor(), 0);
        }
        assert_eq!(buf.capacity(), 64);
    }

    #[test]
    fn test_reserve_guarantees_room() {
        let mut buf = FrameBuffer::with_quantum(16);
        buf.append(b"0123456789ab");
        buf.consume(10);
        assert_eq!(buf.writable_len(), 4);

        // Cursor below the quantum: grow in whole quanta, keep the data in place
        buf.reserve(20);
        assert!(buf.writable_len() >= 20);
        assert_eq!(buf.capacity(), 32);
        assert_eq!(buf.cursor(), 10);
        assert_eq!(buf.data(), b"ab");

        // Cursor past the quantum: compaction alone makes the room
        buf.append(&[b'x'; 14]);
        buf.consume(14);
        assert_eq!(buf.cursor(), 24);
        buf.reserve(20);
        assert_eq!(buf.cursor(), 0);
        assert_eq!(buf.capacity(), 32);
        assert_eq!(buf.data(), b"xx");

        // Already enough room: no change
        buf.reserve(1);
        assert_eq!(buf.capacity(), 32);
        assert_invariant(&buf);
    }

    #[test]
    fn test_grows_while_cursor_below_quantum() {
        let quantum = 8;
        let mut buf = FrameBuffer::with_quantum(quantum);
        write(&mut buf, b"abcdefgh");
        buf.consume(quantum - 1);

        buf.writable();
        assert_eq!(buf.capacity(), 2 * quantum);
        assert_eq!(buf.cursor(), quantum - 1);
        assert_eq!(buf.data(), b"h");
    }

    #[test]
    fn test_data_survives_compaction() {
        let mut buf = FrameBuffer::with_quantum(4);
        write(&mut buf, b"abcd");
        write(&mut buf, b"efgh"); // grows to 8
        assert_eq!(buf.capacity(), 8);

        buf.consume(5);
        assert_eq!(buf.data(), b"fgh");

        // Tail is full and cursor >= quantum, so this compacts
        write(&mut buf, b"ij");
        assert_eq!(buf.cursor(), 0);
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.data(), b"fghij");
    }

    #[test]
    fn test_capacity_never_shrinks_implicitly() {
        let mut buf = FrameBuffer::with_quantum(4);
        let mut last_capacity = buf.capacity();
        for round in 0..64u8 {
            buf.append(&[round; 3]);
            buf.consume(2);
            assert!(buf.capacity() >= last_capacity);
            last_capacity = buf.capacity();
            assert_invariant(&buf);
        }
    }

    #[test]
    fn test_random_sequence_keeps_invariant_and_order() {
        // Deterministic LCG so the test needs no extra crates
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as usize
        };

        let mut buf = FrameBuffer::with_quantum(16);
        let mut expected: Vec<u8> = Vec::new();
        let mut counter: u8 = 0;

        for _ in 0..2000 {
            match next() % 3 {
                0 | 1 => {
                    let window = buf.writable();
                    let n = 1 + next() % window.len().min(24);
                    let window = buf.writable();
                    for slot in window.iter_mut().take(n) {
                        *slot = counter;
                        expected.push(counter);
                        counter = counter.wrapping_add(1);
                    }
                    buf.commit(n);
                }
                _ => {
                    let n = if buf.is_empty() { 0 } else { next() % (buf.len() + 1) };
                    buf.consume(n);
                    expected.drain(..n);
                }
            }
            assert_invariant(&buf);
            assert_eq!(buf.data(), &expected[..]);
        }
    }

    #[test]
    fn test_from_slice() {
        let buf = FrameBuffer::from_slice(b"staged bytes");
        assert_eq!(buf.data(), b"staged bytes");
        assert_eq!(buf.capacity(), DEFAULT_QUANTUM);

        let big = vec![7u8; 40];
        let buf = FrameBuffer::from_slice_with_quantum(&big, 16);
        assert_eq!(buf.capacity(), 40);
        assert_eq!(buf.data(), &big[..]);
    }

    #[test]
    fn test_shrink_keeps_valid_bytes() {
        let mut buf = FrameBuffer::with_quantum(4);
        buf.append(b"0123456789abcdef");
        assert_eq!(buf.capacity(), 16);
        buf.consume(11);

        buf.shrink();
        assert_eq!(buf.cursor(), 0);
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.data(), b"bcdef");
    }

    #[test]
    fn test_clear() {
        let mut buf = FrameBuffer::with_quantum(8);
        buf.append(b"abc");
        buf.consume(1);
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.cursor(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "exceeds")]
    fn test_overconsume_panics_in_debug() {
        let mut buf = FrameBuffer::with_quantum(8);
        buf.append(b"abc");
        buf.consume(4);
    }
}
