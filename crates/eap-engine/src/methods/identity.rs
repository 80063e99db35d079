//! EAP Identity (RFC 3748 Section 5.1)

use radius_proto::{EapPacket, MethodType};
use tracing::info;

use super::{Inbound, Staged, fail};
use crate::error::MethodError;
use crate::protocol::{Context, ContextExt, Payload, Status};

#[derive(Debug, Default)]
pub struct IdentityState {
    pub identity: Option<String>,
}

/// Identity recorded at the context's level, if the peer sent one
pub fn identity(ctx: &mut dyn Context) -> Option<String> {
    if ctx.is_protocol_start(MethodType::IDENTITY) {
        return None;
    }
    ctx.protocol_state::<IdentityState>(MethodType::IDENTITY)
        .ok()
        .and_then(|state| state.identity.clone())
}

/// Asks for the peer identity and hands over to the next method
#[derive(Debug, Default)]
pub struct IdentityPayload {
    inbound: Option<Inbound>,
    staged: Staged,
}

impl IdentityPayload {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Payload for IdentityPayload {
    fn method_type(&self) -> MethodType {
        MethodType::IDENTITY
    }

    fn decode(&mut self, raw: &[u8]) -> Result<(), MethodError> {
        self.inbound = Some(Inbound::parse(raw, MethodType::IDENTITY)?);
        Ok(())
    }

    fn handle(&mut self, ctx: &mut dyn Context) {
        if let Err(e) = ctx.protocol_state::<IdentityState>(MethodType::IDENTITY) {
            return fail(ctx, &mut self.staged, MethodType::IDENTITY, e);
        }

        match self.inbound.take().unwrap_or(Inbound::Start) {
            Inbound::Start => {
                let id = ctx.next_identifier();
                self.staged = Staged::Frame(EapPacket::identity_request(id, ""));
            }
            Inbound::Frame(packet) => {
                let identity = String::from_utf8_lossy(&packet.data)
                    .trim_end_matches('\0')
                    .to_string();
                if let Ok(state) = ctx.protocol_state::<IdentityState>(MethodType::IDENTITY) {
                    state.identity = Some(identity.clone());
                }
                info!(parent: ctx.log(), identity = %identity, "Peer identity received");
                ctx.end_inner_protocol(Status::NextProtocol, None);
                self.staged = Staged::Silent;
            }
            Inbound::Nak(_) => {
                fail(ctx, &mut self.staged, MethodType::IDENTITY, "Nak in reply to an Identity request");
            }
        }
    }

    fn encode(&mut self) -> Result<Vec<u8>, MethodError> {
        self.staged.take_bytes(MethodType::IDENTITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::session;
    use radius_proto::EapCode;
    use std::sync::Arc;

    #[test]
    fn test_start_requests_identity() {
        let mut ctx = session(Arc::new(()));
        let mut payload = IdentityPayload::new();

        payload.decode(&[]).unwrap();
        payload.handle(&mut ctx);
        let frame = EapPacket::from_bytes(&payload.encode().unwrap()).unwrap();

        assert_eq!(frame.code, EapCode::Request);
        assert_eq!(frame.method_type, Some(MethodType::IDENTITY));
        assert_eq!(frame.identifier, 1);
        assert!(!ctx.is_protocol_start(MethodType::IDENTITY));
        assert_eq!(ctx.take_termination().status, Status::Unknown);
    }

    #[test]
    fn test_response_records_identity() {
        let mut ctx = session(Arc::new(()));
        let mut payload = IdentityPayload::new();

        let response = EapPacket::identity_response(1, "alice@example.org").to_bytes().unwrap();
        payload.decode(&response).unwrap();
        payload.handle(&mut ctx);

        assert!(payload.encode().unwrap().is_empty());
        assert_eq!(ctx.take_termination().status, Status::NextProtocol);
        assert_eq!(identity(&mut ctx).as_deref(), Some("alice@example.org"));
    }

    #[test]
    fn test_nak_is_an_error() {
        let mut ctx = session(Arc::new(()));
        let mut payload = IdentityPayload::new();
        payload.decode(&EapPacket::nak(1, &[]).to_bytes().unwrap()).unwrap();
        payload.handle(&mut ctx);
        assert_eq!(ctx.take_termination().status, Status::Error);
    }

    #[test]
    fn test_encode_without_handle_fails() {
        let mut payload = IdentityPayload::new();
        assert!(payload.encode().is_err());
    }
}
