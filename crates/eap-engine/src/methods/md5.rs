//! EAP-MD5 Challenge (RFC 3748 Section 5.4)
//!
//! ```text
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Value-Size    | Value ...                                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Name ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The response value is MD5(identifier + password + challenge).

use radius_proto::{Attribute, AttributeType, EapPacket, MethodType, Packet};
use rand::Rng;
use tracing::{info, warn};

use super::identity::identity;
use super::{Inbound, Staged, fail, nak};
use crate::config::ProtocolSettings;
use crate::error::MethodError;
use crate::protocol::{Context, ContextExt, PacketMutator, Payload, Status};

pub const CHALLENGE_LEN: usize = 16;
const RESPONSE_LEN: usize = 16;

pub fn compute_response_hash(identifier: u8, password: &str, challenge: &[u8]) -> [u8; 16] {
    let mut data = Vec::with_capacity(1 + password.len() + challenge.len());
    data.push(identifier);
    data.extend_from_slice(password.as_bytes());
    data.extend_from_slice(challenge);
    md5::compute(&data).0
}

/// Build an MD5-Challenge request
pub fn challenge_request(identifier: u8, challenge: &[u8]) -> EapPacket {
    let mut data = Vec::with_capacity(1 + challenge.len());
    data.push(challenge.len() as u8);
    data.extend_from_slice(challenge);
    EapPacket::request(identifier, MethodType::MD5_CHALLENGE, data)
}

/// Split an MD5-Challenge response into (hash, name)
pub fn parse_response(packet: &EapPacket) -> Result<([u8; 16], String), MethodError> {
    let value_size = *packet
        .data
        .first()
        .ok_or_else(|| MethodError::Decode("empty MD5 response".to_string()))? as usize;
    if value_size != RESPONSE_LEN || packet.data.len() < 1 + RESPONSE_LEN {
        return Err(MethodError::Decode(format!(
            "invalid MD5 response value size {}",
            value_size
        )));
    }

    let mut hash = [0u8; 16];
    hash.copy_from_slice(&packet.data[1..1 + RESPONSE_LEN]);
    let name = String::from_utf8_lossy(&packet.data[1 + RESPONSE_LEN..]).to_string();
    Ok((hash, name))
}

/// Outstanding challenge of this level
#[derive(Debug, Default)]
pub struct Md5State {
    pub challenge: Option<(u8, [u8; CHALLENGE_LEN])>,
}

fn user_name_mutator(username: String) -> PacketMutator {
    Box::new(move |mut packet: Packet| {
        if let Ok(attr) = Attribute::string(AttributeType::UserName.as_u8(), username) {
            packet.remove_attributes(AttributeType::UserName.as_u8());
            packet.add_attribute(attr);
        }
        packet
    })
}

/// Password check against the configured user table
#[derive(Debug, Default)]
pub struct Md5Payload {
    inbound: Option<Inbound>,
    staged: Staged,
}

impl Md5Payload {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&mut self, ctx: &mut dyn Context) {
        let mut challenge = [0u8; CHALLENGE_LEN];
        rand::rng().fill(&mut challenge);
        let id = ctx.next_identifier();

        match ctx.protocol_state::<Md5State>(MethodType::MD5_CHALLENGE) {
            Ok(state) => state.challenge = Some((id, challenge)),
            Err(e) => return fail(ctx, &mut self.staged, MethodType::MD5_CHALLENGE, e),
        }
        self.staged = Staged::Frame(challenge_request(id, &challenge));
    }

    fn verify(&mut self, ctx: &mut dyn Context, packet: EapPacket) {
        let outstanding = match ctx.protocol_state::<Md5State>(MethodType::MD5_CHALLENGE) {
            Ok(state) => state.challenge.take(),
            Err(e) => return fail(ctx, &mut self.staged, MethodType::MD5_CHALLENGE, e),
        };
        let Some((challenge_id, challenge)) = outstanding else {
            return fail(ctx, &mut self.staged, MethodType::MD5_CHALLENGE, "response without a challenge");
        };

        let (hash, name) = match parse_response(&packet) {
            Ok(parsed) => parsed,
            Err(e) => return fail(ctx, &mut self.staged, MethodType::MD5_CHALLENGE, e),
        };

        let username = if name.is_empty() {
            identity(ctx).or_else(|| ctx.packet().user_name()).unwrap_or_default()
        } else {
            name
        };

        let Some(settings) = ctx.settings::<ProtocolSettings>() else {
            return fail(ctx, &mut self.staged, MethodType::MD5_CHALLENGE, "protocol settings unavailable");
        };
        let accepted = settings
            .config()
            .find_user(&username)
            .is_some_and(|user| compute_response_hash(challenge_id, &user.password, &challenge) == hash);

        if accepted {
            info!(parent: ctx.log(), username = %username, "MD5-Challenge authentication successful");
            ctx.end_inner_protocol(Status::Success, Some(user_name_mutator(username)));
            self.staged = Staged::Frame(EapPacket::success(packet.identifier));
        } else {
            warn!(parent: ctx.log(), username = %username, "MD5-Challenge authentication failed");
            ctx.end_inner_protocol(Status::Error, None);
            self.staged = Staged::Frame(EapPacket::failure(packet.identifier));
        }
    }
}

impl Payload for Md5Payload {
    fn method_type(&self) -> MethodType {
        MethodType::MD5_CHALLENGE
    }

    fn decode(&mut self, raw: &[u8]) -> Result<(), MethodError> {
        self.inbound = Some(Inbound::parse(raw, MethodType::MD5_CHALLENGE)?);
        Ok(())
    }

    fn handle(&mut self, ctx: &mut dyn Context) {
        match self.inbound.take().unwrap_or(Inbound::Start) {
            Inbound::Start => self.start(ctx),
            Inbound::Frame(packet) => self.verify(ctx, packet),
            Inbound::Nak(desired) => {
                nak::decline(ctx, MethodType::MD5_CHALLENGE, desired);
                self.staged = Staged::Silent;
            }
        }
    }

    fn encode(&mut self) -> Result<Vec<u8>, MethodError> {
        self.staged.take_bytes(MethodType::MD5_CHALLENGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::context::SessionContext;
    use crate::context::tests::session;
    use radius_proto::{Code, EapCode};
    use std::sync::Arc;

    fn settings() -> Arc<ProtocolSettings> {
        let config = EngineConfig::from_json(
            r#"{"methods": [4], "users": [{"username": "alice", "password": "password123"}]}"#,
        )
        .unwrap();
        Arc::new(ProtocolSettings::new(config))
    }

    fn challenge(ctx: &mut SessionContext, payload: &mut Md5Payload) -> EapPacket {
        payload.decode(&[]).unwrap();
        payload.handle(ctx);
        EapPacket::from_bytes(&payload.encode().unwrap()).unwrap()
    }

    fn respond(request: &EapPacket, password: &str, name: &str) -> Vec<u8> {
        let value = &request.data[1..];
        let hash = compute_response_hash(request.identifier, password, value);
        let mut data = vec![16];
        data.extend_from_slice(&hash);
        data.extend_from_slice(name.as_bytes());
        EapPacket::response(request.identifier, MethodType::MD5_CHALLENGE, data)
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn test_response_hash() {
        // MD5(0x01 || "password" || 0x00..0x0f)
        let challenge: Vec<u8> = (0..16).collect();
        let hash = compute_response_hash(1, "password", &challenge);
        assert_eq!(
            hash,
            [
                0x51, 0xb4, 0xc7, 0x5f, 0x26, 0x14, 0x78, 0xf6, 0x7e, 0x37, 0xe4, 0x29, 0x44, 0x0e,
                0x29, 0x4d
            ]
        );
    }

    #[test]
    fn test_challenge_layout() {
        let mut ctx = session(settings());
        let mut payload = Md5Payload::new();
        let request = challenge(&mut ctx, &mut payload);

        assert_eq!(request.code, EapCode::Request);
        assert_eq!(request.method_type, Some(MethodType::MD5_CHALLENGE));
        assert_eq!(request.data[0] as usize, CHALLENGE_LEN);
        assert_eq!(request.data.len(), 1 + CHALLENGE_LEN);
        assert!(!ctx.is_protocol_start(MethodType::MD5_CHALLENGE));
    }

    #[test]
    fn test_correct_password_succeeds() {
        let mut ctx = session(settings());
        let mut payload = Md5Payload::new();
        let request = challenge(&mut ctx, &mut payload);

        payload.decode(&respond(&request, "password123", "alice")).unwrap();
        payload.handle(&mut ctx);
        let reply = EapPacket::from_bytes(&payload.encode().unwrap()).unwrap();
        assert_eq!(reply.code, EapCode::Success);
        assert_eq!(reply.identifier, request.identifier);

        let termination = ctx.take_termination();
        assert_eq!(termination.status, Status::Success);
        let accept = termination.apply(Packet::new(Code::AccessAccept, 1, [0u8; 16]));
        let user = accept.find_attribute(AttributeType::UserName.as_u8()).unwrap();
        assert_eq!(user.as_string().unwrap(), "alice");
    }

    #[test]
    fn test_wrong_password_fails() {
        let mut ctx = session(settings());
        let mut payload = Md5Payload::new();
        let request = challenge(&mut ctx, &mut payload);

        payload.decode(&respond(&request, "guess", "alice")).unwrap();
        payload.handle(&mut ctx);
        let reply = EapPacket::from_bytes(&payload.encode().unwrap()).unwrap();
        assert_eq!(reply.code, EapCode::Failure);
        assert_eq!(ctx.take_termination().status, Status::Error);
    }

    #[test]
    fn test_name_falls_back_to_identity() {
        let mut ctx = session(settings());
        ctx.protocol_state::<crate::methods::IdentityState>(MethodType::IDENTITY)
            .unwrap()
            .identity = Some("alice".to_string());

        let mut payload = Md5Payload::new();
        let request = challenge(&mut ctx, &mut payload);
        payload.decode(&respond(&request, "password123", "")).unwrap();
        payload.handle(&mut ctx);
        assert_eq!(ctx.take_termination().status, Status::Success);
    }

    #[test]
    fn test_response_without_challenge_fails() {
        let mut ctx = session(settings());
        let mut payload = Md5Payload::new();
        let request = challenge_request(3, &[0u8; 16]);
        payload.decode(&respond(&request, "password123", "alice")).unwrap();
        payload.handle(&mut ctx);
        assert_eq!(ctx.take_termination().status, Status::Error);
        assert!(payload.encode().unwrap().is_empty());
    }

    #[test]
    fn test_nak_declines() {
        let mut ctx = session(settings());
        let mut payload = Md5Payload::new();
        challenge(&mut ctx, &mut payload);

        payload.decode(&EapPacket::nak(2, &[MethodType::PEAP]).to_bytes().unwrap()).unwrap();
        payload.handle(&mut ctx);
        assert!(payload.encode().unwrap().is_empty());
        assert_eq!(ctx.take_termination().status, Status::NextProtocol);
        assert_eq!(nak::take_desired(&mut ctx), Some(vec![MethodType::PEAP]));
    }

    #[test]
    fn test_malformed_response_rejected() {
        let packet = EapPacket::response(1, MethodType::MD5_CHALLENGE, vec![5, 1, 2]);
        assert!(parse_response(&packet).is_err());
        let packet = EapPacket::response(1, MethodType::MD5_CHALLENGE, vec![]);
        assert!(parse_response(&packet).is_err());
    }
}
