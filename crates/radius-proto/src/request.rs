use crate::attributes::AttributeType;
use crate::eap::{EapError, EapPacket, eap_bytes_from_radius_packet};
use crate::packet::Packet;
use std::net::SocketAddr;

/// A decoded Access-Request together with what is needed to answer it
///
/// The shared secret is kept with the packet because reply attributes such
/// as MS-MPPE keys are encrypted with it.
#[derive(Debug, Clone)]
pub struct Request {
    pub packet: Packet,
    pub secret: Vec<u8>,
    pub remote_addr: Option<SocketAddr>,
}

impl Request {
    pub fn new(packet: Packet, secret: impl Into<Vec<u8>>) -> Self {
        Request {
            packet,
            secret: secret.into(),
            remote_addr: None,
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn authenticator(&self) -> &[u8; 16] {
        &self.packet.authenticator
    }

    /// Reassembled EAP-Message payload, if any
    pub fn eap_bytes(&self) -> Option<Vec<u8>> {
        eap_bytes_from_radius_packet(&self.packet)
    }

    /// Decoded EAP packet, `Ok(None)` when the request carries none
    pub fn eap_message(&self) -> Result<Option<EapPacket>, EapError> {
        match self.eap_bytes() {
            Some(bytes) if !bytes.is_empty() => EapPacket::from_bytes(&bytes).map(Some),
            _ => Ok(None),
        }
    }

    /// Raw value of the State attribute
    pub fn state(&self) -> Option<&[u8]> {
        self.packet
            .find_attribute(AttributeType::State.as_u8())
            .map(|attr| attr.value.as_slice())
    }

    pub fn user_name(&self) -> Option<String> {
        self.packet
            .find_attribute(AttributeType::UserName.as_u8())
            .and_then(|attr| attr.as_string().ok())
    }
}
