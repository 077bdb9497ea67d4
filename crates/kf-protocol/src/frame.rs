//! Frame header for tunnelled datagrams
//!
//! Layout:
//! ```text
//! +----------------+------------------+
//! | length (u32 BE)| payload (length) |
//! +----------------+------------------+
//! ```

use bytes::{Buf, BufMut, BytesMut};

/// Size of the length prefix in bytes
pub const HEADER_SIZE: usize = 4;

/// Largest datagram accepted on either side of the tunnel
pub const MAX_PAYLOAD_SIZE: usize = 65_535;

/// Length prefix preceding every datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a header for a payload of the given length
    pub fn new(payload_length: u32) -> Self {
        Self { payload_length }
    }

    /// Write the header into the buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u32(self.payload_length);
    }

    /// Read a header from the buffer, consuming it
    ///
    /// Returns `None` if fewer than `HEADER_SIZE` bytes are buffered.
    pub fn decode(src: &mut BytesMut) -> Option<Self> {
        if src.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            payload_length: src.get_u32(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_big_endian() {
        let mut buf = BytesMut::new();
        FrameHeader::new(0x0102_0304).encode(&mut buf);
        assert_eq!(&buf[..], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_header_needs_full_prefix() {
        let mut buf = BytesMut::from(&[0x00, 0x00, 0x01][..]);
        assert!(FrameHeader::decode(&mut buf).is_none());
        assert_eq!(buf.len(), 3);
    }
}
