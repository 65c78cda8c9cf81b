//! Stream read-ahead buffer
//!
//! A linear byte buffer with read and write cursors. Unread bytes are slid
//! back to offset 0 whenever the tail runs out of room, and the read cursor
//! can be moved back to re-queue bytes the device did not accept.

/// Read-ahead buffer between the HTTP body and the output device
pub struct StreamBuffer {
    buf: Vec<u8>,
    /// Read cursor
    r: usize,
    /// Write cursor, never behind `r`
    w: usize,
}

impl StreamBuffer {
    /// Create a new buffer with the specified capacity in bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            r: 0,
            w: 0,
        }
    }

    /// Get buffer capacity
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Unread bytes
    pub fn len(&self) -> usize {
        self.w - self.r
    }

    pub fn is_empty(&self) -> bool {
        self.w == self.r
    }

    /// Bytes that can still be written, counting space reclaimable by compaction
    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Append as much of `data` as fits, returning the number of bytes stored
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.buf.len() - self.w < data.len() {
            self.compact();
        }

        let n = data.len().min(self.buf.len() - self.w);
        self.buf[self.w..self.w + n].copy_from_slice(&data[..n]);
        self.w += n;
        n
    }

    /// Copy up to `out.len()` unread bytes into `out`
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len());
        out[..n].copy_from_slice(&self.buf[self.r..self.r + n]);
        self.r += n;
        n
    }

    /// Move the read cursor back by up to `n` bytes, returning how far it moved
    pub fn unread(&mut self, n: usize) -> usize {
        let n = n.min(self.r);
        self.r -= n;
        n
    }

    /// Drop all buffered data
    pub fn reset(&mut self) {
        self.r = 0;
        self.w = 0;
    }

    fn compact(&mut self) {
        if self.r > 0 {
            self.buf.copy_within(self.r..self.w, 0);
            self.w -= self.r;
            self.r = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_buffer_basic() {
        let mut buffer = StreamBuffer::new(8);

        assert_eq!(buffer.write(&[1, 2, 3, 4, 5]), 5);
        assert_eq!(buffer.len(), 5);

        let mut out = [0u8; 3];
        assert_eq!(buffer.read(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_write_compacts_tail() {
        let mut buffer = StreamBuffer::new(8);
        buffer.write(&[1, 2, 3, 4, 5, 6]);

        let mut out = [0u8; 4];
        buffer.read(&mut out);

        // Only 2 bytes of tail room left, compaction makes room for 6
        assert_eq!(buffer.write(&[7, 8, 9, 10, 11, 12, 13]), 6);
        assert_eq!(buffer.len(), 8);

        let mut out = [0u8; 8];
        buffer.read(&mut out);
        assert_eq!(out, [5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_unread_requeues_bytes() {
        let mut buffer = StreamBuffer::new(16);
        buffer.write(&[1, 2, 3, 4]);

        let mut out = [0u8; 4];
        buffer.read(&mut out);
        assert_eq!(buffer.unread(2), 2);

        let mut out = [0u8; 4];
        assert_eq!(buffer.read(&mut out), 2);
        assert_eq!(&out[..2], &[3, 4]);

        // Cannot rewind past the start
        buffer.reset();
        assert_eq!(buffer.unread(4), 0);
        assert!(buffer.is_empty());
    }

    proptest! {
        #[test]
        fn partial_accept_never_goes_negative(
            chunks in proptest::collection::vec((1usize..512, 0usize..512), 1..64)
        ) {
            let mut buffer = StreamBuffer::new(1024);
            let mut scratch = vec![0u8; 512];

            for (incoming, accepted) in chunks {
                buffer.write(&vec![0xAB; incoming]);

                let before = buffer.len();
                let handed = buffer.read(&mut scratch);
                let accepted = accepted.min(handed);
                buffer.unread(handed - accepted);

                prop_assert_eq!(buffer.len(), before - accepted);
                prop_assert!(buffer.len() <= buffer.capacity());
            }
        }
    }
}
