//! Single-packet frames: header plus a bounded payload.

use crate::header::{FrameHeader, HEADER_SIZE};
use crate::WireError;
use bytes::{Buf, Bytes, BytesMut};

/// Radio packet size with dynamic payloads enabled
pub const DEFAULT_PACKET_SIZE: usize = 32;

/// Largest payload that fits one default-sized packet
pub const MAX_FRAME_PAYLOAD: usize = DEFAULT_PACKET_SIZE - HEADER_SIZE;

/// Payload capacity of a packet of `packet_size` bytes
pub fn max_frame_payload(packet_size: usize) -> usize {
    packet_size.saturating_sub(HEADER_SIZE).min(u8::MAX as usize)
}

/// Complete wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Routing and fragmentation header
    pub header: FrameHeader,
    /// Payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(header: FrameHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Size of the frame once encoded
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode into one packet of at most `packet_size` bytes
    pub fn encode(&self, packet_size: usize) -> Result<Bytes, WireError> {
        if self.payload.len() > max_frame_payload(packet_size) {
            return Err(WireError::Size(self.payload.len()));
        }

        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.header.encode(self.payload.len() as u8, &mut buf);
        buf.extend_from_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode one packet
    pub fn decode(mut packet: Bytes) -> Result<Self, WireError> {
        let (header, declared) = FrameHeader::decode(&mut packet)?;
        if packet.remaining() != declared {
            return Err(WireError::Length {
                declared,
                actual: packet.remaining(),
            });
        }
        Ok(Self {
            header,
            payload: packet,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::LogicalAddress;
    use crate::header::MessageType;

    fn header() -> FrameHeader {
        FrameHeader::new(
            LogicalAddress::new(0o1).unwrap(),
            LogicalAddress::ROOT,
            7,
            MessageType(b'T'),
        )
    }

    #[test]
    fn test_round_trip_every_payload_length() {
        for len in 0..=MAX_FRAME_PAYLOAD {
            let payload: Vec<u8> = (0..len as u8).collect();
            let frame = Frame::new(header(), Bytes::from(payload));
            let bytes = frame.encode(DEFAULT_PACKET_SIZE).unwrap();
            assert_eq!(bytes.len(), HEADER_SIZE + len);
            assert_eq!(Frame::decode(bytes).unwrap(), frame);
        }
    }

    #[test]
    fn test_round_trip_fragment() {
        let frame = Frame::new(header().as_fragment(1, 4), Bytes::from_static(b"abc"));
        let bytes = frame.encode(DEFAULT_PACKET_SIZE).unwrap();
        assert_eq!(Frame::decode(bytes).unwrap(), frame);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let frame = Frame::new(header(), Bytes::from(vec![0u8; MAX_FRAME_PAYLOAD + 1]));
        assert_eq!(
            frame.encode(DEFAULT_PACKET_SIZE),
            Err(WireError::Size(MAX_FRAME_PAYLOAD + 1))
        );
    }

    #[test]
    fn test_decode_length_mismatch() {
        let frame = Frame::new(header(), Bytes::from_static(b"hello"));
        let bytes = frame.encode(DEFAULT_PACKET_SIZE).unwrap();

        let truncated = bytes.slice(..bytes.len() - 1);
        assert_eq!(
            Frame::decode(truncated),
            Err(WireError::Length {
                declared: 5,
                actual: 4
            })
        );

        let mut padded = BytesMut::from(&bytes[..]);
        padded.extend_from_slice(&[0]);
        assert!(matches!(
            Frame::decode(padded.freeze()),
            Err(WireError::Length { .. })
        ));
    }

    #[test]
    fn test_decode_short_buffer() {
        assert_eq!(
            Frame::decode(Bytes::from_static(&[1, 2, 3])),
            Err(WireError::Incomplete(3))
        );
    }
}
