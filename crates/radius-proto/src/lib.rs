//! RADIUS and EAP wire formats
//!
//! This crate provides the parts of RFC 2865, RFC 3579 and RFC 3748 the EAP
//! engine needs: RADIUS packets and attributes, EAP framing carried in
//! EAP-Message attributes, EAP-TLS fragmentation (RFC 5216) and MS-MPPE key
//! attributes (RFC 2548).
//!
//! # Example
//!
//! ```rust
//! use radius_proto::{Attribute, AttributeType, Code, EapPacket, Packet};
//! use radius_proto::eap::{add_eap_to_radius_packet, eap_from_radius_packet};
//!
//! let mut packet = Packet::new(Code::AccessRequest, 1, [0u8; 16]);
//! packet.add_attribute(Attribute::string(AttributeType::UserName.as_u8(), "alice").unwrap());
//! add_eap_to_radius_packet(&mut packet, &EapPacket::identity_response(1, "alice")).unwrap();
//!
//! let bytes = packet.encode().unwrap();
//! let decoded = Packet::decode(&bytes).unwrap();
//! let eap = eap_from_radius_packet(&decoded).unwrap().unwrap();
//! assert_eq!(eap.data, b"alice");
//! ```

pub mod attributes;
pub mod eap;
pub mod mppe;
pub mod packet;
pub mod request;

pub use attributes::{Attribute, AttributeType};
pub use eap::{EapCode, EapError, EapPacket, MethodType};
pub use packet::{Code, Packet, PacketError};
pub use request::Request;
