//! Node identities and the payloads of mesh control messages.
//!
//! Control messages travel as ordinary frames with a system message type. The
//! payload layouts are fixed and little-endian:
//!
//! ```text
//! POLL, PING                      (empty)
//! REQ_ADDRESS      identity:u8 contact:u16
//! ADDR_RESPONSE    identity:u8 address:u16
//! ADDR_DENIED      identity:u8
//! ADDR_CONFIRM     identity:u8
//! ADDR_RELEASE     identity:u8
//! ADDR_LOOKUP      identity:u8
//! ID_LOOKUP        address:u16
//! LOOKUP_REPLY     identity:u8 address:u16   (0xFF / 0xFFFF = not found)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::LogicalAddress;
use crate::error::WireError;
use crate::header::MessageType;

const NO_IDENTITY: u8 = 0xFF;
const NO_ADDRESS: u16 = 0xFFFF;

/// Stable application-chosen node identifier
///
/// Values `0..=254` are valid; `0` is reserved for the master.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct NodeIdentity(u8);

impl NodeIdentity {
    /// Identity of the master node
    pub const MASTER: NodeIdentity = NodeIdentity(0);

    /// Validate a raw identity
    pub fn new(raw: u8) -> Result<Self, WireError> {
        if raw == NO_IDENTITY {
            return Err(WireError::Malformed);
        }
        Ok(Self(raw))
    }

    /// Raw identity byte
    pub fn raw(self) -> u8 {
        self.0
    }

    /// Whether this is the master identity
    pub fn is_master(self) -> bool {
        self == Self::MASTER
    }
}

impl TryFrom<u8> for NodeIdentity {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeIdentity> for u8 {
    fn from(id: NodeIdentity) -> Self {
        id.0
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeIdentity({})", self.0)
    }
}

/// Decoded mesh control message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Contact discovery on a level multicast, or a contact's unicast answer
    Poll,
    /// Link liveness probe
    Ping,
    /// Ask the master for an address, relayed through `contact`
    RequestAddress {
        /// Requesting node
        identity: NodeIdentity,
        /// Node that will relay the answer
        contact: LogicalAddress,
    },
    /// Address granted to `identity`
    AddressResponse {
        /// Requesting node
        identity: NodeIdentity,
        /// Assigned address
        address: LogicalAddress,
    },
    /// No address available for `identity`
    AddressDenied {
        /// Requesting node
        identity: NodeIdentity,
    },
    /// Node confirms (or re-announces) the address it sends from
    AddressConfirm {
        /// Announcing node
        identity: NodeIdentity,
    },
    /// Node gives up its address
    AddressRelease {
        /// Releasing node
        identity: NodeIdentity,
    },
    /// Resolve an identity to its current address
    AddressLookup {
        /// Identity to resolve
        identity: NodeIdentity,
    },
    /// Resolve an address to the identity holding it
    IdentityLookup {
        /// Address to resolve
        address: LogicalAddress,
    },
    /// Answer to either lookup; the unknown side is `None`
    LookupReply {
        /// Identity part of the mapping
        identity: Option<NodeIdentity>,
        /// Address part of the mapping
        address: Option<LogicalAddress>,
    },
}

impl ControlMessage {
    /// Message type this control message travels under
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Poll => MessageType::POLL,
            Self::Ping => MessageType::PING,
            Self::RequestAddress { .. } => MessageType::REQ_ADDRESS,
            Self::AddressResponse { .. } => MessageType::ADDR_RESPONSE,
            Self::AddressDenied { .. } => MessageType::ADDR_DENIED,
            Self::AddressConfirm { .. } => MessageType::ADDR_CONFIRM,
            Self::AddressRelease { .. } => MessageType::ADDR_RELEASE,
            Self::AddressLookup { .. } => MessageType::ADDR_LOOKUP,
            Self::IdentityLookup { .. } => MessageType::ID_LOOKUP,
            Self::LookupReply { .. } => MessageType::LOOKUP_REPLY,
        }
    }

    /// Encode the payload
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3);
        match *self {
            Self::Poll | Self::Ping => {}
            Self::RequestAddress { identity, contact } => {
                buf.put_u8(identity.raw());
                buf.put_u16_le(contact.raw());
            }
            Self::AddressResponse { identity, address } => {
                buf.put_u8(identity.raw());
                buf.put_u16_le(address.raw());
            }
            Self::AddressDenied { identity }
            | Self::AddressConfirm { identity }
            | Self::AddressRelease { identity }
            | Self::AddressLookup { identity } => buf.put_u8(identity.raw()),
            Self::IdentityLookup { address } => buf.put_u16_le(address.raw()),
            Self::LookupReply { identity, address } => {
                buf.put_u8(identity.map(NodeIdentity::raw).unwrap_or(NO_IDENTITY));
                buf.put_u16_le(address.map(LogicalAddress::raw).unwrap_or(NO_ADDRESS));
            }
        }
        buf.freeze()
    }

    /// Decode the payload of a frame carrying `msg_type`
    ///
    /// Returns `Ok(None)` for types that are not mesh control messages.
    pub fn decode(msg_type: MessageType, mut payload: &[u8]) -> Result<Option<Self>, WireError> {
        let expected = match msg_type {
            MessageType::POLL | MessageType::PING => 0,
            MessageType::REQ_ADDRESS | MessageType::ADDR_RESPONSE | MessageType::LOOKUP_REPLY => 3,
            MessageType::ADDR_DENIED
            | MessageType::ADDR_CONFIRM
            | MessageType::ADDR_RELEASE
            | MessageType::ADDR_LOOKUP => 1,
            MessageType::ID_LOOKUP => 2,
            _ => return Ok(None),
        };
        if payload.len() != expected {
            return Err(WireError::Malformed);
        }

        let msg = match msg_type {
            MessageType::POLL => Self::Poll,
            MessageType::PING => Self::Ping,
            MessageType::REQ_ADDRESS => Self::RequestAddress {
                identity: NodeIdentity::new(payload.get_u8())?,
                contact: LogicalAddress::new(payload.get_u16_le())?,
            },
            MessageType::ADDR_RESPONSE => Self::AddressResponse {
                identity: NodeIdentity::new(payload.get_u8())?,
                address: LogicalAddress::new(payload.get_u16_le())?,
            },
            MessageType::ADDR_DENIED => Self::AddressDenied {
                identity: NodeIdentity::new(payload.get_u8())?,
            },
            MessageType::ADDR_CONFIRM => Self::AddressConfirm {
                identity: NodeIdentity::new(payload.get_u8())?,
            },
            MessageType::ADDR_RELEASE => Self::AddressRelease {
                identity: NodeIdentity::new(payload.get_u8())?,
            },
            MessageType::ADDR_LOOKUP => Self::AddressLookup {
                identity: NodeIdentity::new(payload.get_u8())?,
            },
            MessageType::ID_LOOKUP => Self::IdentityLookup {
                address: LogicalAddress::new(payload.get_u16_le())?,
            },
            _ => {
                let identity = match payload.get_u8() {
                    NO_IDENTITY => None,
                    raw => Some(NodeIdentity::new(raw)?),
                };
                let address = match payload.get_u16_le() {
                    NO_ADDRESS => None,
                    raw => Some(LogicalAddress::new(raw)?),
                };
                Self::LookupReply { identity, address }
            }
        };
        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u8) -> NodeIdentity {
        NodeIdentity::new(raw).unwrap()
    }

    #[test]
    fn test_identity_range() {
        assert!(NodeIdentity::new(0).unwrap().is_master());
        assert!(NodeIdentity::new(254).is_ok());
        assert_eq!(NodeIdentity::new(255), Err(WireError::Malformed));
        assert!(serde_json::from_str::<NodeIdentity>("255").is_err());
        assert_eq!(serde_json::to_string(&id(7)).unwrap(), "7");
    }

    #[test]
    fn test_request_layout() {
        let msg = ControlMessage::RequestAddress {
            identity: id(4),
            contact: LogicalAddress::new(0o21).unwrap(),
        };
        assert_eq!(msg.message_type(), MessageType::REQ_ADDRESS);
        assert_eq!(&msg.encode()[..], &[4, 0x11, 0x00]);
    }

    #[test]
    fn test_decode_known_messages() {
        let cases = [
            ControlMessage::Poll,
            ControlMessage::Ping,
            ControlMessage::AddressResponse {
                identity: id(9),
                address: LogicalAddress::new(0o1).unwrap(),
            },
            ControlMessage::AddressDenied { identity: id(9) },
            ControlMessage::AddressConfirm { identity: id(9) },
            ControlMessage::AddressRelease { identity: id(9) },
            ControlMessage::AddressLookup { identity: id(9) },
            ControlMessage::IdentityLookup {
                address: LogicalAddress::new(0o5).unwrap(),
            },
            ControlMessage::LookupReply {
                identity: Some(id(9)),
                address: None,
            },
        ];
        for msg in cases {
            let decoded = ControlMessage::decode(msg.message_type(), &msg.encode()).unwrap();
            assert_eq!(decoded, Some(msg));
        }
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(
            ControlMessage::decode(MessageType::REQ_ADDRESS, &[4, 0]),
            Err(WireError::Malformed)
        );
        assert_eq!(
            ControlMessage::decode(MessageType::PING, &[1]),
            Err(WireError::Malformed)
        );
        assert!(matches!(
            ControlMessage::decode(MessageType::ADDR_RESPONSE, &[4, 0o6, 0]),
            Err(WireError::Address(_))
        ));
    }

    #[test]
    fn test_decode_ignores_other_types() {
        assert_eq!(ControlMessage::decode(MessageType(b'T'), b"hello"), Ok(None));
        assert_eq!(ControlMessage::decode(MessageType(150), &[]), Ok(None));
    }
}
