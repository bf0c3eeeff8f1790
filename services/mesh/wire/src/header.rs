//! Frame header for the radio wire format.
//!
//! The header is 11 bytes, little-endian, and precedes the payload inside a
//! single radio packet:
//!
//! ```text
//! +------+------+------+------+-------+---------+----------+---------+
//! | to   | from | id   | type | flags | frag_id | frag_tot | len     |
//! | u16  | u16  | u16  | u8   | u8    | u8      | u8       | u8      |
//! +------+------+------+------+-------+---------+----------+---------+
//! ```

use bitflags::bitflags;
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::LogicalAddress;
use crate::error::WireError;

/// Header size in bytes
pub const HEADER_SIZE: usize = 11;

/// Message type tag carried by every frame
///
/// Types `0..=127` belong to applications; `128..=255` are reserved for the
/// network and mesh layers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageType(pub u8);

impl MessageType {
    /// Address assignment sent back toward a joining node
    pub const ADDR_RESPONSE: MessageType = MessageType(128);
    /// Node confirms or re-announces its assigned address
    pub const ADDR_CONFIRM: MessageType = MessageType(129);
    /// Link liveness probe
    pub const PING: MessageType = MessageType(130);
    /// Master refused an assignment request
    pub const ADDR_DENIED: MessageType = MessageType(131);
    /// Level multicast asking for contact nodes (and their replies)
    pub const POLL: MessageType = MessageType(194);
    /// Address assignment request
    pub const REQ_ADDRESS: MessageType = MessageType(195);
    /// Identity to address lookup
    pub const ADDR_LOOKUP: MessageType = MessageType(196);
    /// Node gives its address back
    pub const ADDR_RELEASE: MessageType = MessageType(197);
    /// Address to identity lookup
    pub const ID_LOOKUP: MessageType = MessageType(198);
    /// Answer to either lookup
    pub const LOOKUP_REPLY: MessageType = MessageType(199);

    /// First reserved system type
    pub const SYSTEM_MIN: u8 = 128;

    /// Whether this type is reserved for the network and mesh layers
    pub fn is_system(self) -> bool {
        self.0 >= Self::SYSTEM_MIN
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::ADDR_RESPONSE => "ADDR_RESPONSE",
            Self::ADDR_CONFIRM => "ADDR_CONFIRM",
            Self::PING => "PING",
            Self::ADDR_DENIED => "ADDR_DENIED",
            Self::POLL => "POLL",
            Self::REQ_ADDRESS => "REQ_ADDRESS",
            Self::ADDR_LOOKUP => "ADDR_LOOKUP",
            Self::ADDR_RELEASE => "ADDR_RELEASE",
            Self::ID_LOOKUP => "ID_LOOKUP",
            Self::LOOKUP_REPLY => "LOOKUP_REPLY",
            _ => return write!(f, "MessageType({})", self.0),
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Frame flags bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Flags: u8 {
        /// Payload is one fragment of a larger message
        const FRAGMENT = 1 << 0;
        /// Final fragment of the message
        const LAST_FRAGMENT = 1 << 1;
    }
}

/// Position of a fragment within its message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentInfo {
    /// 0-based fragment index
    pub fragment_id: u8,
    /// Number of fragments in the message
    pub fragments_total: u8,
}

impl FragmentInfo {
    /// Whether this is the final fragment
    pub fn is_last(&self) -> bool {
        self.fragment_id.checked_add(1) == Some(self.fragments_total)
    }

    pub(crate) fn validate(&self) -> Result<(), WireError> {
        if self.fragments_total < 2 || self.fragment_id >= self.fragments_total {
            return Err(WireError::Fragment {
                id: self.fragment_id,
                total: self.fragments_total,
            });
        }
        Ok(())
    }
}

/// Routing and control information carried ahead of every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    /// Final destination
    pub to: LogicalAddress,
    /// Originating node
    pub from: LogicalAddress,
    /// Per-origin sequence counter, shared by all fragments of a message
    pub id: u16,
    /// Message type
    pub msg_type: MessageType,
    /// Present only on fragments of an oversized message
    pub fragment: Option<FragmentInfo>,
}

impl FrameHeader {
    /// Create an unfragmented header
    pub fn new(to: LogicalAddress, from: LogicalAddress, id: u16, msg_type: MessageType) -> Self {
        Self {
            to,
            from,
            id,
            msg_type,
            fragment: None,
        }
    }

    /// Copy of this header marked as fragment `fragment_id` of `fragments_total`
    pub fn as_fragment(&self, fragment_id: u8, fragments_total: u8) -> Self {
        Self {
            fragment: Some(FragmentInfo {
                fragment_id,
                fragments_total,
            }),
            ..*self
        }
    }

    /// Flags derived from the fragment metadata
    pub fn flags(&self) -> Flags {
        match self.fragment {
            None => Flags::empty(),
            Some(info) if info.is_last() => Flags::FRAGMENT | Flags::LAST_FRAGMENT,
            Some(_) => Flags::FRAGMENT,
        }
    }

    /// Encode the header for a payload of `payload_len` bytes
    pub fn encode<B: BufMut>(&self, payload_len: u8, buf: &mut B) {
        buf.put_u16_le(self.to.raw());
        buf.put_u16_le(self.from.raw());
        buf.put_u16_le(self.id);
        buf.put_u8(self.msg_type.0);
        buf.put_u8(self.flags().bits());
        let (fragment_id, fragments_total) = self
            .fragment
            .map(|f| (f.fragment_id, f.fragments_total))
            .unwrap_or((0, 0));
        buf.put_u8(fragment_id);
        buf.put_u8(fragments_total);
        buf.put_u8(payload_len);
    }

    /// Decode a header, returning it together with the declared payload length
    pub fn decode<B: Buf>(buf: &mut B) -> Result<(Self, usize), WireError> {
        if buf.remaining() < HEADER_SIZE {
            return Err(WireError::Incomplete(buf.remaining()));
        }

        let to = LogicalAddress::new(buf.get_u16_le())?;
        let from = LogicalAddress::new(buf.get_u16_le())?;
        let id = buf.get_u16_le();
        let msg_type = MessageType(buf.get_u8());
        let flags = Flags::from_bits(buf.get_u8()).ok_or(WireError::Reserved)?;
        let fragment_id = buf.get_u8();
        let fragments_total = buf.get_u8();
        let payload_len = buf.get_u8() as usize;

        let fragment = if flags.contains(Flags::FRAGMENT) {
            let info = FragmentInfo {
                fragment_id,
                fragments_total,
            };
            info.validate()?;
            if info.is_last() != flags.contains(Flags::LAST_FRAGMENT) {
                return Err(WireError::Fragment {
                    id: fragment_id,
                    total: fragments_total,
                });
            }
            Some(info)
        } else {
            if !flags.is_empty() || fragment_id != 0 || fragments_total != 0 {
                return Err(WireError::Reserved);
            }
            None
        };

        Ok((
            Self {
                to,
                from,
                id,
                msg_type,
                fragment,
            },
            payload_len,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};

    fn header() -> FrameHeader {
        FrameHeader::new(
            LogicalAddress::new(0o21).unwrap(),
            LogicalAddress::new(0o3).unwrap(),
            0xBEEF,
            MessageType(b'M'),
        )
    }

    #[test]
    fn test_message_type_classes() {
        assert!(!MessageType(0).is_system());
        assert!(!MessageType(127).is_system());
        assert!(MessageType::POLL.is_system());
        assert_eq!(format!("{:?}", MessageType::REQ_ADDRESS), "REQ_ADDRESS");
        assert_eq!(format!("{:?}", MessageType(7)), "MessageType(7)");
    }

    #[test]
    fn test_header_layout() {
        let mut buf = BytesMut::new();
        header().encode(4, &mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[..], &[0x11, 0x00, 0x03, 0x00, 0xEF, 0xBE, b'M', 0, 0, 0, 4]);
    }

    #[test]
    fn test_fragment_flags() {
        let first = header().as_fragment(0, 3);
        let last = header().as_fragment(2, 3);
        assert_eq!(first.flags(), Flags::FRAGMENT);
        assert_eq!(last.flags(), Flags::FRAGMENT | Flags::LAST_FRAGMENT);

        let mut buf = BytesMut::new();
        last.encode(0, &mut buf);
        let (decoded, len) = FrameHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, last);
        assert_eq!(len, 0);
    }

    #[test]
    fn test_decode_rejects_inconsistent_fragments() {
        let mut buf = BytesMut::new();
        header().as_fragment(3, 3).encode(0, &mut buf);
        assert!(matches!(
            FrameHeader::decode(&mut buf.freeze()),
            Err(WireError::Fragment { id: 3, total: 3 })
        ));

        // LAST_FRAGMENT on a middle fragment
        let mut bytes = BytesMut::new();
        header().as_fragment(0, 3).encode(0, &mut bytes);
        bytes[7] |= Flags::LAST_FRAGMENT.bits();
        assert!(FrameHeader::decode(&mut bytes.freeze()).is_err());
    }

    #[test]
    fn test_decode_rejects_reserved_bits() {
        let mut buf = BytesMut::new();
        header().encode(0, &mut buf);
        buf[7] = 0x80;
        assert_eq!(FrameHeader::decode(&mut buf.freeze()), Err(WireError::Reserved));

        let mut buf = BytesMut::new();
        header().encode(0, &mut buf);
        buf[8] = 1;
        assert_eq!(FrameHeader::decode(&mut buf.freeze()), Err(WireError::Reserved));
    }

    #[test]
    fn test_decode_rejects_bad_address() {
        let mut buf = BytesMut::new();
        header().encode(0, &mut buf);
        buf[0] = 0o7;
        assert!(matches!(
            FrameHeader::decode(&mut buf.freeze()),
            Err(WireError::Address(_))
        ));
    }

    #[test]
    fn test_decode_incomplete() {
        let mut short = Bytes::from_static(&[0u8; HEADER_SIZE - 1]);
        assert_eq!(
            FrameHeader::decode(&mut short),
            Err(WireError::Incomplete(HEADER_SIZE - 1))
        );
    }
}
