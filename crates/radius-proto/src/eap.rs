//! EAP (Extensible Authentication Protocol) framing
//!
//! This module implements the EAP packet layout defined in RFC 3748 and
//! EAP over RADIUS as defined in RFC 3579.
//!
//! # EAP Packet Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Code      |  Identifier   |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |  Type-Data ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::attributes::{Attribute, AttributeType};
use crate::packet::Packet;
use std::fmt;
use thiserror::Error;

pub mod eap_tls;

/// EAP packet code (first byte of EAP packet)
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EapCode {
    /// Request packet (Code 1)
    Request = 1,
    /// Response packet (Code 2)
    Response = 2,
    /// Success packet (Code 3)
    Success = 3,
    /// Failure packet (Code 4)
    Failure = 4,
}

impl EapCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EapCode::Request),
            2 => Some(EapCode::Response),
            3 => Some(EapCode::Success),
            4 => Some(EapCode::Failure),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// EAP method type (the Type octet of Request/Response packets)
///
/// The set of methods is open: any octet is a valid identifier, and the
/// associated constants only name the ones from the IANA registry that the
/// engine knows about.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodType(pub u8);

impl MethodType {
    /// Identity (Type 1) - RFC 3748
    pub const IDENTITY: MethodType = MethodType(1);
    /// Notification (Type 2) - RFC 3748
    pub const NOTIFICATION: MethodType = MethodType(2);
    /// Legacy Nak (Type 3) - RFC 3748, response only
    pub const NAK: MethodType = MethodType(3);
    /// MD5-Challenge (Type 4) - RFC 3748
    pub const MD5_CHALLENGE: MethodType = MethodType(4);
    /// Generic Token Card (Type 6) - RFC 3748
    pub const GTC: MethodType = MethodType(6);
    /// EAP-TLS (Type 13) - RFC 5216
    pub const TLS: MethodType = MethodType(13);
    /// EAP-TTLS (Type 21) - RFC 5281
    pub const TTLS: MethodType = MethodType(21);
    /// PEAP (Type 25) - draft-josefsson-pppext-eap-tls-eap
    pub const PEAP: MethodType = MethodType(25);
    /// EAP-MSCHAPv2 (Type 26) - draft-kamath-pppext-eap-mschapv2
    pub const MSCHAPV2: MethodType = MethodType(26);
    /// EAP-TEAP (Type 55) - RFC 7170
    pub const TEAP: MethodType = MethodType(55);

    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Registry name of well-known methods
    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::IDENTITY => Some("Identity"),
            Self::NOTIFICATION => Some("Notification"),
            Self::NAK => Some("Nak"),
            Self::MD5_CHALLENGE => Some("MD5-Challenge"),
            Self::GTC => Some("GTC"),
            Self::TLS => Some("TLS"),
            Self::TTLS => Some("TTLS"),
            Self::PEAP => Some("PEAP"),
            Self::MSCHAPV2 => Some("MSCHAPv2"),
            Self::TEAP => Some("TEAP"),
            _ => None,
        }
    }
}

impl From<u8> for MethodType {
    fn from(value: u8) -> Self {
        MethodType(value)
    }
}

impl fmt::Display for MethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Type-{}", self.0),
        }
    }
}

/// EAP packet structure
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapPacket {
    /// EAP code (Request, Response, Success, Failure)
    pub code: EapCode,
    /// Identifier for matching requests and responses (0-255)
    pub identifier: u8,
    /// Method type (only present for Request/Response)
    pub method_type: Option<MethodType>,
    /// Type-specific data
    pub data: Vec<u8>,
}

impl EapPacket {
    /// Header length (code + identifier + length)
    pub const HEADER_LEN: usize = 4;

    pub fn new(code: EapCode, identifier: u8, method_type: Option<MethodType>, data: Vec<u8>) -> Self {
        EapPacket {
            code,
            identifier,
            method_type,
            data,
        }
    }

    /// Create a Request of the given method
    pub fn request(identifier: u8, method_type: MethodType, data: Vec<u8>) -> Self {
        Self::new(EapCode::Request, identifier, Some(method_type), data)
    }

    /// Create a Response of the given method
    pub fn response(identifier: u8, method_type: MethodType, data: Vec<u8>) -> Self {
        Self::new(EapCode::Response, identifier, Some(method_type), data)
    }

    pub fn identity_request(identifier: u8, message: &str) -> Self {
        Self::request(identifier, MethodType::IDENTITY, message.as_bytes().to_vec())
    }

    pub fn identity_response(identifier: u8, identity: &str) -> Self {
        Self::response(identifier, MethodType::IDENTITY, identity.as_bytes().to_vec())
    }

    /// Create a Nak response listing the methods the peer would accept.
    /// An empty list is encoded as the single octet 0 ("no alternative").
    pub fn nak(identifier: u8, desired: &[MethodType]) -> Self {
        let data = if desired.is_empty() {
            vec![0]
        } else {
            desired.iter().map(|m| m.as_u8()).collect()
        };
        Self::response(identifier, MethodType::NAK, data)
    }

    pub fn success(identifier: u8) -> Self {
        Self::new(EapCode::Success, identifier, None, Vec::new())
    }

    pub fn failure(identifier: u8) -> Self {
        Self::new(EapCode::Failure, identifier, None, Vec::new())
    }

    /// Methods proposed by a Nak response, `None` for any other packet
    pub fn desired_methods(&self) -> Option<Vec<MethodType>> {
        if self.code != EapCode::Response || self.method_type != Some(MethodType::NAK) {
            return None;
        }
        Some(
            self.data
                .iter()
                .filter(|&&b| b != 0)
                .map(|&b| MethodType(b))
                .collect(),
        )
    }

    /// Parse EAP packet from bytes
    ///
    /// Bytes beyond the Length field are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EapError> {
        if bytes.len() < Self::HEADER_LEN {
            return Err(EapError::PacketTooShort {
                expected: Self::HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let code = EapCode::from_u8(bytes[0]).ok_or(EapError::InvalidCode(bytes[0]))?;
        let identifier = bytes[1];
        let length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;

        if length < Self::HEADER_LEN {
            return Err(EapError::InvalidLength(length));
        }
        if bytes.len() < length {
            return Err(EapError::PacketTooShort {
                expected: length,
                actual: bytes.len(),
            });
        }

        let (method_type, data) = match code {
            EapCode::Request | EapCode::Response => {
                if length < Self::HEADER_LEN + 1 {
                    return Err(EapError::InvalidLength(length));
                }
                (Some(MethodType(bytes[4])), bytes[5..length].to_vec())
            }
            // Success and Failure packets have no Type field
            EapCode::Success | EapCode::Failure => (None, Vec::new()),
        };

        Ok(EapPacket {
            code,
            identifier,
            method_type,
            data,
        })
    }

    /// Encode EAP packet to bytes
    ///
    /// Fails if a Request/Response has no method type or the packet does not
    /// fit the 16-bit Length field.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EapError> {
        let length = self.length();
        if length > u16::MAX as usize {
            return Err(EapError::PacketTooLarge(length));
        }

        let mut bytes = Vec::with_capacity(length);
        bytes.push(self.code.as_u8());
        bytes.push(self.identifier);
        bytes.extend_from_slice(&(length as u16).to_be_bytes());

        match self.code {
            EapCode::Request | EapCode::Response => {
                let method_type = self.method_type.ok_or(EapError::MissingType(self.code))?;
                bytes.push(method_type.as_u8());
                bytes.extend_from_slice(&self.data);
            }
            EapCode::Success | EapCode::Failure => {}
        }

        Ok(bytes)
    }

    /// Get the total length of the packet
    pub fn length(&self) -> usize {
        match self.code {
            EapCode::Request | EapCode::Response => Self::HEADER_LEN + 1 + self.data.len(),
            EapCode::Success | EapCode::Failure => Self::HEADER_LEN,
        }
    }
}

/// EAP-related errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EapError {
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("Invalid EAP code: {0}")]
    InvalidCode(u8),

    #[error("Invalid packet length: {0}")]
    InvalidLength(usize),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("{0:?} packet has no method type")]
    MissingType(EapCode),

    #[error("Invalid response format")]
    InvalidResponseFormat,

    #[error("Fragment length mismatch: announced {announced} bytes, received {received}")]
    FragmentLengthMismatch { announced: usize, received: usize },

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

// =============================================================================
// RADIUS Integration Helpers (RFC 3579)
// =============================================================================

/// Split an encoded EAP frame into EAP-Message attributes
///
/// Per RFC 3579, frames longer than 253 bytes are carried in consecutive
/// EAP-Message attributes.
pub fn frame_to_radius_attributes(frame: &[u8]) -> Result<Vec<Attribute>, EapError> {
    frame
        .chunks(Attribute::MAX_VALUE_LENGTH)
        .map(|chunk| {
            Attribute::new(AttributeType::EapMessage.as_u8(), chunk.to_vec()).map_err(|e| {
                EapError::EncodingError(format!("Failed to create EAP-Message attribute: {}", e))
            })
        })
        .collect()
}

/// Convert an EAP packet to RADIUS EAP-Message attribute(s)
///
/// ```
/// use radius_proto::eap::{EapPacket, eap_to_radius_attributes};
///
/// let eap = EapPacket::success(1);
/// let attributes = eap_to_radius_attributes(&eap).unwrap();
/// assert_eq!(attributes.len(), 1);
/// assert_eq!(attributes[0].attr_type, 79); // EAP-Message
/// ```
pub fn eap_to_radius_attributes(eap_packet: &EapPacket) -> Result<Vec<Attribute>, EapError> {
    frame_to_radius_attributes(&eap_packet.to_bytes()?)
}

/// Concatenate the values of all EAP-Message attributes of a RADIUS packet
///
/// Returns `None` when the packet carries no EAP-Message attribute.
pub fn eap_bytes_from_radius_packet(radius_packet: &Packet) -> Option<Vec<u8>> {
    let messages = radius_packet.find_all_attributes(AttributeType::EapMessage.as_u8());
    if messages.is_empty() {
        return None;
    }
    Some(messages.iter().flat_map(|attr| attr.value.iter().copied()).collect())
}

/// Extract and decode the EAP packet carried by a RADIUS packet
pub fn eap_from_radius_packet(radius_packet: &Packet) -> Result<Option<EapPacket>, EapError> {
    match eap_bytes_from_radius_packet(radius_packet) {
        Some(bytes) if !bytes.is_empty() => EapPacket::from_bytes(&bytes).map(Some),
        _ => Ok(None),
    }
}

/// Add an EAP packet to a RADIUS packet as EAP-Message attribute(s)
pub fn add_eap_to_radius_packet(
    radius_packet: &mut Packet,
    eap_packet: &EapPacket,
) -> Result<(), EapError> {
    for attr in eap_to_radius_attributes(eap_packet)? {
        radius_packet.add_attribute(attr);
    }
    Ok(())
}
