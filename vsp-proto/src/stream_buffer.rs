use bytes::{Buf, Bytes, BytesMut};

use crate::PACKET_SIZE;

/// Bounded FIFO of stream bytes
///
/// Both directions of the byte stream buffer through one of these. Capacity
/// accounting reserves one spare byte, so the usable occupancy is always
/// strictly below `capacity`.
#[derive(Debug)]
pub(crate) struct StreamBuffer {
    data: BytesMut,
    capacity: usize,
}

impl StreamBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::new(),
            capacity,
        }
    }

    /// Whether `extra` additional bytes fit without breaching the bound
    pub(crate) fn can_accept(&self, extra: usize) -> bool {
        self.data.len() + extra + 1 <= self.capacity
    }

    /// Whether a further full packet would still fit after what is buffered
    pub(crate) fn has_packet_headroom(&self) -> bool {
        self.can_accept(PACKET_SIZE)
    }

    /// Append `data`; the caller must have checked `can_accept` first
    pub(crate) fn push(&mut self, data: &[u8]) {
        debug_assert!(self.can_accept(data.len()));
        self.data.extend_from_slice(data);
    }

    /// Dequeue up to `buf.len()` bytes from the front, in FIFO order
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.data.len().min(buf.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data.advance(n);
        n
    }

    /// Dequeue the next outbound chunk of at most `max_len` bytes
    pub(crate) fn pop_chunk(&mut self, max_len: usize) -> Option<Bytes> {
        if self.data.is_empty() {
            return None;
        }
        let n = self.data.len().min(max_len);
        Some(self.data.split_to(n).freeze())
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.data.clear();
    }
}
