//! Built-in EAP methods

pub mod identity;
pub mod md5;
pub mod nak;
pub mod tls;

pub use identity::{IdentityPayload, IdentityState};
pub use md5::{Md5Payload, Md5State};
pub use tls::TlsPayload;

use radius_proto::{EapCode, EapPacket, MethodType};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::error::MethodError;
use crate::protocol::{Context, MethodRegistry, Status};

/// Reply a method has prepared for `encode`
#[derive(Debug, Default)]
pub(crate) enum Staged {
    #[default]
    Empty,
    Frame(EapPacket),
    /// The method ended and has nothing to send
    Silent,
}

impl Staged {
    /// Serialize and clear the staged reply
    pub(crate) fn take_bytes(&mut self, method: MethodType) -> Result<Vec<u8>, MethodError> {
        match std::mem::take(self) {
            Staged::Empty => Err(MethodError::Encode(format!("{} has no reply staged", method))),
            Staged::Frame(packet) => packet
                .to_bytes()
                .map_err(|e| MethodError::Encode(e.to_string())),
            Staged::Silent => Ok(Vec::new()),
        }
    }
}

/// A peer frame as seen by a method
#[derive(Debug)]
pub(crate) enum Inbound {
    /// No peer frame: the method is being started
    Start,
    Frame(EapPacket),
    /// The peer refused the method and proposed others
    Nak(Vec<MethodType>),
}

impl Inbound {
    pub(crate) fn parse(raw: &[u8], method: MethodType) -> Result<Self, MethodError> {
        if raw.is_empty() {
            return Ok(Inbound::Start);
        }

        let packet = EapPacket::from_bytes(raw)?;
        if packet.code != EapCode::Response {
            return Err(MethodError::Decode(format!(
                "expected a Response, got {:?}",
                packet.code
            )));
        }
        if let Some(desired) = packet.desired_methods() {
            return Ok(Inbound::Nak(desired));
        }
        if packet.method_type != Some(method) {
            return Err(MethodError::Decode(format!(
                "expected {} response, got {}",
                method,
                packet.method_type.map_or_else(|| "none".to_string(), |m| m.to_string())
            )));
        }
        Ok(Inbound::Frame(packet))
    }
}

/// Log `reason`, report Error for this level and send nothing further
pub(crate) fn fail(ctx: &mut dyn Context, staged: &mut Staged, method: MethodType, reason: impl fmt::Display) {
    warn!(parent: ctx.log(), method = %method, reason = %reason, "EAP method failed");
    ctx.end_inner_protocol(Status::Error, None);
    *staged = Staged::Silent;
}

/// Methods that may run inside a tunnel
pub fn inner_registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    registry.register(MethodType::IDENTITY, || Box::new(IdentityPayload::new()));
    registry.register(MethodType::MD5_CHALLENGE, || Box::new(Md5Payload::new()));
    registry
}

/// Every built-in method, with PEAP tunneling the inner registry
pub fn default_registry() -> MethodRegistry {
    let inner = Arc::new(inner_registry());
    let mut registry = inner_registry();
    registry.register(MethodType::TLS, || Box::new(TlsPayload::new(MethodType::TLS, None)));
    registry.register(MethodType::PEAP, move || {
        Box::new(TlsPayload::new(MethodType::PEAP, Some(inner.clone())))
    });
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_encoding() {
        let mut staged = Staged::default();
        assert!(matches!(
            staged.take_bytes(MethodType::GTC),
            Err(MethodError::Encode(_))
        ));

        staged = Staged::Silent;
        assert!(staged.take_bytes(MethodType::GTC).unwrap().is_empty());

        staged = Staged::Frame(EapPacket::success(4));
        assert_eq!(staged.take_bytes(MethodType::GTC).unwrap(), vec![3, 4, 0, 4]);
        // Taking clears the slot
        assert!(staged.take_bytes(MethodType::GTC).is_err());
    }

    #[test]
    fn test_inbound_parse() {
        assert!(matches!(Inbound::parse(&[], MethodType::GTC), Ok(Inbound::Start)));

        let nak = EapPacket::nak(1, &[MethodType::PEAP]).to_bytes().unwrap();
        assert!(matches!(
            Inbound::parse(&nak, MethodType::MD5_CHALLENGE),
            Ok(Inbound::Nak(desired)) if desired == vec![MethodType::PEAP]
        ));

        let request = EapPacket::identity_request(1, "").to_bytes().unwrap();
        assert!(Inbound::parse(&request, MethodType::IDENTITY).is_err());

        let other = EapPacket::identity_response(1, "bob").to_bytes().unwrap();
        assert!(Inbound::parse(&other, MethodType::MD5_CHALLENGE).is_err());
        assert!(matches!(
            Inbound::parse(&other, MethodType::IDENTITY),
            Ok(Inbound::Frame(_))
        ));
    }

    #[test]
    fn test_registries() {
        let inner = inner_registry();
        assert!(inner.contains(MethodType::MD5_CHALLENGE));
        assert!(!inner.contains(MethodType::PEAP));

        let registry = default_registry();
        for method in [MethodType::IDENTITY, MethodType::MD5_CHALLENGE, MethodType::TLS, MethodType::PEAP] {
            assert_eq!(registry.construct(method).unwrap().method_type(), method);
        }
    }
}
