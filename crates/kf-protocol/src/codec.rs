//! Tokio codec for length-prefixed datagrams

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, MAX_PAYLOAD_SIZE};

/// Codec turning a byte stream into discrete UDP payloads and back
#[derive(Debug, Default)]
pub struct UdpFrameCodec {
    /// Header already consumed while waiting for the payload
    pending_header: Option<FrameHeader>,
}

impl UdpFrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for UdpFrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src) {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let payload_len = header.payload_length as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        if src.len() < payload_len {
            src.reserve(payload_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        Ok(Some(src.split_to(payload_len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if let Some(header) = self.pending_header.take() {
                    return Err(ProtocolError::IncompleteFrame {
                        expected: header.payload_length as usize,
                        actual: src.len(),
                    });
                }
                if !src.is_empty() {
                    tracing::debug!("Discarding {} trailing bytes at end of stream", src.len());
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for UdpFrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = payload.as_ref();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        FrameHeader::new(payload.len() as u32).encode(dst);
        dst.extend_from_slice(payload);
        Ok(())
    }
}
