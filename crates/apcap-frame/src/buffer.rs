use bytes::{Buf, Bytes, BytesMut};

/// Bounded receive buffer for one logical channel.
///
/// Capacity is fixed at creation. [`append`](Self::append) takes only what
/// fits and reports how much it took; callers size their transport reads by
/// [`remaining`](Self::remaining) so excess input stays in the transport
/// instead of being overwritten or dropped.
#[derive(Debug)]
pub struct RxBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl RxBuffer {
    /// Create an empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Append as much of `data` as fits. Returns the number of bytes accepted.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let accepted = data.len().min(self.remaining());
        self.buf.extend_from_slice(&data[..accepted]);
        accepted
    }

    /// Remove the first `n` bytes (or everything, if fewer are buffered).
    pub fn consume_front(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
    }

    /// Remove and return the first `n` bytes (or everything, if fewer are buffered).
    pub fn split_front(&mut self, n: usize) -> Bytes {
        let n = n.min(self.buf.len());
        self.buf.split_to(n).freeze()
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Buffered, unconsumed bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Maximum number of bytes this buffer holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free space left before the buffer applies backpressure.
    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }
}

impl AsRef<[u8]> for RxBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}
