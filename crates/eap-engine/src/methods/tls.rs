//! TLS based methods: EAP-TLS (RFC 5216) and a PEAP-style tunnel
//!
//! Both share the EAP-TLS framing and handshake. EAP-TLS succeeds once the
//! handshake is acknowledged by the peer; over TLS 1.3 the server first sends
//! the RFC 9190 commitment message, a single 0x00 byte of application data.
//!
//! Method 25 keeps the connection as a tunnel and runs an inner EAP
//! conversation through it, starting with Identity and continuing with the
//! configured inner methods. Inner frames travel with their full EAP header
//! and the inner outcome is an EAP-Success or EAP-Failure frame. There is no
//! PEAPv0 header compression and no Result TLV, so this is a PEAP-like
//! tunnel rather than Microsoft PEAP. The outer method succeeds when the peer
//! acknowledges the inner EAP-Success.
//!
//! MSK/EMSK are exported from the TLS session and delivered to the NAS as
//! MS-MPPE keys on the final Access-Accept.

use radius_proto::eap::eap_tls::{EapTlsPacket, TlsFragmentAssembler, fragment_tls_message};
use radius_proto::mppe::mppe_key_attributes;
use radius_proto::{MethodType, Packet};
use rustls::ProtocolVersion;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::identity::identity;
use super::{Inbound, Staged, fail, nak};
use crate::config::{DEFAULT_FRAGMENT_SIZE, ProtocolSettings};
use crate::context::{Identifiers, InnerContext};
use crate::error::{MethodError, StateError};
use crate::protocol::{
    Context, ContextExt, MethodRegistry, PacketMutator, Payload, ProtocolStateStore, Status,
    Termination,
};
use crate::tls_config::certificate_common_name;
use crate::tunnel::{TlsTunnel, drive_inner};

/// Application data closing a TLS 1.3 EAP-TLS handshake (RFC 9190)
pub const COMMITMENT_MESSAGE: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsPhase {
    /// Start sent, waiting for the ClientHello
    #[default]
    Started,
    Handshaking,
    Established,
}

#[derive(Debug, Default)]
pub struct TlsState {
    pub phase: TlsPhase,
}

enum TlsInbound {
    Start,
    Nak(Vec<MethodType>),
    Record(EapTlsPacket),
}

/// Whether processing of the current frame should go on
enum Flow {
    Continue,
    Done,
}

fn mppe_mutator(msk: [u8; 64], secret: Vec<u8>) -> PacketMutator {
    Box::new(move |mut packet: Packet| {
        match mppe_key_attributes(&msk, &secret, &packet.authenticator) {
            Ok(attributes) => {
                for attribute in attributes {
                    packet.add_attribute(attribute);
                }
            }
            Err(e) => warn!(error = %e, "Failed to build MPPE key attributes"),
        }
        packet
    })
}

pub struct TlsPayload {
    method: MethodType,
    /// Methods available inside the tunnel; `None` for plain EAP-TLS
    inner_registry: Option<Arc<MethodRegistry>>,
    inbound: Option<TlsInbound>,
    staged: Staged,
    tunnel: Option<TlsTunnel>,
    assembler: TlsFragmentAssembler,
    outgoing: VecDeque<EapTlsPacket>,
    inner: Option<Box<dyn Payload>>,
    inner_states: ProtocolStateStore,
    inner_identifiers: Identifiers,
    tried_inner: Vec<MethodType>,
    /// Outcome to report once the peer acknowledged the last flight
    pending: Option<Termination>,
    msk: Option<[u8; 64]>,
}

impl TlsPayload {
    pub fn new(method: MethodType, inner_registry: Option<Arc<MethodRegistry>>) -> Self {
        TlsPayload {
            method,
            inner_registry,
            inbound: None,
            staged: Staged::Empty,
            tunnel: None,
            assembler: TlsFragmentAssembler::new(),
            outgoing: VecDeque::new(),
            inner: None,
            inner_states: ProtocolStateStore::new(),
            inner_identifiers: Identifiers::new(0),
            tried_inner: Vec::new(),
            pending: None,
            msk: None,
        }
    }

    pub fn is_tunnel(&self) -> bool {
        self.inner_registry.is_some()
    }

    pub fn msk(&self) -> Option<&[u8; 64]> {
        self.msk.as_ref()
    }

    fn set_phase(&self, ctx: &mut dyn Context, phase: TlsPhase) -> Result<(), StateError> {
        ctx.protocol_state::<TlsState>(self.method)?.phase = phase;
        Ok(())
    }

    fn phase(&self, ctx: &mut dyn Context) -> Result<TlsPhase, StateError> {
        Ok(ctx.protocol_state::<TlsState>(self.method)?.phase)
    }

    fn stage_request(&mut self, ctx: &mut dyn Context, packet: EapTlsPacket) {
        let id = ctx.next_identifier();
        self.staged = Staged::Frame(packet.to_eap_request(id, self.method));
    }

    fn end(&mut self, ctx: &mut dyn Context, termination: Termination) {
        ctx.end_inner_protocol(termination.status, termination.mutator);
        self.staged = Staged::Silent;
    }

    fn key_mutator(&self, ctx: &dyn Context) -> Option<PacketMutator> {
        let msk = self.msk?;
        Some(mppe_mutator(msk, ctx.packet().secret.clone()))
    }

    fn start(&mut self, ctx: &mut dyn Context) {
        let Some(config) = ctx.settings::<ProtocolSettings>().and_then(|s| s.tls_config()) else {
            return fail(ctx, &mut self.staged, self.method, "no TLS server configuration");
        };
        match TlsTunnel::new(config) {
            Ok(tunnel) => self.tunnel = Some(tunnel),
            Err(e) => return fail(ctx, &mut self.staged, self.method, e),
        }
        if let Err(e) = self.set_phase(ctx, TlsPhase::Started) {
            return fail(ctx, &mut self.staged, self.method, e);
        }

        self.assembler.reset();
        self.outgoing.clear();
        self.inner = None;
        self.inner_states.clear();
        self.tried_inner.clear();
        self.pending = None;
        self.msk = None;

        debug!(parent: ctx.log(), method = %self.method, "Sending TLS start");
        self.stage_request(ctx, EapTlsPacket::start());
    }

    fn receive(&mut self, ctx: &mut dyn Context, packet: EapTlsPacket) {
        if packet.is_ack() && !self.assembler.in_progress() {
            return self.acknowledged(ctx);
        }

        let message = match self.assembler.add_fragment(&packet) {
            Ok(Some(message)) => message,
            Ok(None) => return self.stage_request(ctx, EapTlsPacket::ack()),
            Err(e) => return fail(ctx, &mut self.staged, self.method, e),
        };
        if !self.outgoing.is_empty() {
            debug!(parent: ctx.log(), dropped = self.outgoing.len(), "Peer sent data before our flight was acknowledged");
            self.outgoing.clear();
        }

        let Some(tunnel) = self.tunnel.as_mut() else {
            return fail(ctx, &mut self.staged, self.method, "TLS data before start");
        };
        if let Err(e) = tunnel.receive_records(&message) {
            return fail(ctx, &mut self.staged, self.method, e);
        }
        let handshaking = tunnel.is_handshaking();

        let flow = if handshaking {
            match self.set_phase(ctx, TlsPhase::Handshaking) {
                Ok(()) => Flow::Continue,
                Err(e) => {
                    fail(ctx, &mut self.staged, self.method, e);
                    Flow::Done
                }
            }
        } else {
            match self.phase(ctx) {
                Ok(TlsPhase::Established) if self.is_tunnel() => self.run_inner(ctx),
                Ok(TlsPhase::Established) => Flow::Continue,
                Ok(_) => self.established(ctx),
                Err(e) => {
                    fail(ctx, &mut self.staged, self.method, e);
                    Flow::Done
                }
            }
        };

        if let Flow::Continue = flow {
            self.flush(ctx);
        }
    }

    /// Peer acknowledged our last fragment or flight
    fn acknowledged(&mut self, ctx: &mut dyn Context) {
        if !self.outgoing.is_empty() {
            return self.send_next(ctx);
        }
        match self.pending.take() {
            Some(pending) => {
                info!(parent: ctx.log(), method = %self.method, status = %pending.status, "Peer acknowledged final flight");
                self.end(ctx, pending);
            }
            None => fail(ctx, &mut self.staged, self.method, "unexpected acknowledgement"),
        }
    }

    fn established(&mut self, ctx: &mut dyn Context) -> Flow {
        if let Err(e) = self.set_phase(ctx, TlsPhase::Established) {
            fail(ctx, &mut self.staged, self.method, e);
            return Flow::Done;
        }
        let Some(tunnel) = self.tunnel.as_ref() else {
            fail(ctx, &mut self.staged, self.method, "TLS tunnel missing");
            return Flow::Done;
        };

        let keys = match tunnel.export_keying_material() {
            Ok(keys) => keys,
            Err(e) => {
                fail(ctx, &mut self.staged, self.method, e);
                return Flow::Done;
            }
        };
        let mut msk = [0u8; 64];
        msk.copy_from_slice(&keys[..64]);
        self.msk = Some(msk);

        info!(
            parent: ctx.log(),
            method = %self.method,
            version = ?tunnel.protocol_version(),
            "TLS handshake complete"
        );

        let verify_identity = ctx
            .settings::<ProtocolSettings>()
            .is_some_and(|settings| settings.verify_peer_identity());
        if verify_identity {
            let common_name = tunnel
                .peer_certificates()
                .and_then(|certs| certs.first())
                .and_then(|cert| certificate_common_name(cert));
            let expected = identity(ctx);
            if common_name.is_none() || common_name != expected {
                warn!(
                    parent: ctx.log(),
                    certificate = ?common_name,
                    identity = ?expected,
                    "Client certificate does not match EAP identity"
                );
                ctx.end_inner_protocol(Status::Error, None);
                self.staged = Staged::Silent;
                return Flow::Done;
            }
        }

        let Some(registry) = self.inner_registry.clone() else {
            if let Err(e) = self.commit(&*ctx) {
                fail(ctx, &mut self.staged, self.method, e);
                return Flow::Done;
            }
            self.pending = Some(Termination::new(Status::Success, self.key_mutator(&*ctx)));
            return Flow::Continue;
        };
        match registry.construct(MethodType::IDENTITY) {
            Some(inner) => {
                self.inner = Some(inner);
                self.run_inner(ctx)
            }
            None => {
                fail(ctx, &mut self.staged, self.method, "inner Identity method unavailable");
                Flow::Done
            }
        }
    }

    /// Queue the commitment message when EAP-TLS runs over TLS 1.3
    fn commit(&mut self, ctx: &dyn Context) -> Result<(), MethodError> {
        let Some(tunnel) = self.tunnel.as_mut() else {
            return Err(MethodError::Tls("TLS tunnel missing".to_string()));
        };
        if tunnel.protocol_version() != Some(ProtocolVersion::TLSv1_3) {
            return Ok(());
        }
        debug!(parent: ctx.log(), method = %self.method, "Sending TLS 1.3 commitment message");
        tunnel
            .write_all(&[COMMITMENT_MESSAGE])
            .map_err(MethodError::TunnelWrite)
    }

    /// Drive the inner method until it needs the peer again
    fn run_inner(&mut self, ctx: &mut dyn Context) -> Flow {
        loop {
            let termination = {
                let (Some(inner), Some(tunnel)) = (self.inner.as_mut(), self.tunnel.as_mut()) else {
                    fail(ctx, &mut self.staged, self.method, "tunnel without inner method");
                    return Flow::Done;
                };
                let mut inner_ctx = InnerContext::new(
                    ctx,
                    &mut self.inner_states,
                    &mut self.inner_identifiers,
                    self.method,
                );
                drive_inner(&mut **inner, tunnel, &mut inner_ctx);
                inner_ctx.into_termination()
            };

            match termination.status {
                Status::Unknown => return Flow::Continue,
                Status::Success => {
                    info!(parent: ctx.log(), method = %self.method, "Inner authentication succeeded");
                    self.pending = Some(termination.then(self.key_mutator(&*ctx)));
                    return Flow::Continue;
                }
                Status::Error => {
                    warn!(parent: ctx.log(), method = %self.method, "Inner authentication failed");
                    self.end(ctx, termination);
                    return Flow::Done;
                }
                Status::NextProtocol => {
                    if let Some(finished) = self.inner.as_ref().map(|inner| inner.method_type()) {
                        self.tried_inner.push(finished);
                    }
                    let desired = nak::take_desired_in(&mut self.inner_states);
                    let preferences = ctx
                        .settings::<ProtocolSettings>()
                        .map(|settings| settings.config().inner_methods.clone())
                        .unwrap_or_default();
                    let next = self.inner_registry.as_ref().and_then(|registry| {
                        registry
                            .negotiate(&preferences, &self.tried_inner, desired.as_deref())
                            .and_then(|method| registry.construct(method))
                    });

                    match next {
                        Some(inner) => {
                            info!(parent: ctx.log(), inner = %inner.method_type(), "Starting inner method");
                            self.inner = Some(inner);
                        }
                        None => {
                            warn!(parent: ctx.log(), tried = ?self.tried_inner, "No inner method left to negotiate");
                            self.end(ctx, Termination::new(Status::Error, termination.mutator));
                            return Flow::Done;
                        }
                    }
                }
            }
        }
    }

    /// Send whatever the TLS connection has queued
    fn flush(&mut self, ctx: &mut dyn Context) {
        let records = match self.tunnel.as_mut().map(|tunnel| tunnel.pending_records()) {
            Some(Ok(records)) => records,
            Some(Err(e)) => return fail(ctx, &mut self.staged, self.method, e),
            None => return fail(ctx, &mut self.staged, self.method, "TLS tunnel missing"),
        };

        if records.is_empty() {
            return match self.pending.take() {
                Some(pending) => self.end(ctx, pending),
                None => self.stage_request(ctx, EapTlsPacket::ack()),
            };
        }

        let fragment_size = ctx
            .settings::<ProtocolSettings>()
            .map_or(DEFAULT_FRAGMENT_SIZE, |settings| settings.fragment_size());
        self.outgoing = fragment_tls_message(&records, fragment_size).into();
        debug!(
            parent: ctx.log(),
            bytes = records.len(),
            fragments = self.outgoing.len(),
            "Sending TLS records"
        );
        self.send_next(ctx);
    }

    fn send_next(&mut self, ctx: &mut dyn Context) {
        let packet = self.outgoing.pop_front().unwrap_or_else(EapTlsPacket::ack);
        self.stage_request(ctx, packet);
    }
}

impl Payload for TlsPayload {
    fn method_type(&self) -> MethodType {
        self.method
    }

    fn decode(&mut self, raw: &[u8]) -> Result<(), MethodError> {
        let inbound = match Inbound::parse(raw, self.method)? {
            Inbound::Start => TlsInbound::Start,
            Inbound::Nak(desired) => TlsInbound::Nak(desired),
            Inbound::Frame(packet) => TlsInbound::Record(EapTlsPacket::from_eap_data(&packet.data)?),
        };
        self.inbound = Some(inbound);
        Ok(())
    }

    fn handle(&mut self, ctx: &mut dyn Context) {
        match self.inbound.take().unwrap_or(TlsInbound::Start) {
            TlsInbound::Start => self.start(ctx),
            TlsInbound::Nak(desired) => {
                nak::decline(ctx, self.method, desired);
                self.staged = Staged::Silent;
            }
            TlsInbound::Record(packet) => self.receive(ctx, packet),
        }
    }

    fn encode(&mut self) -> Result<Vec<u8>, MethodError> {
        self.staged.take_bytes(self.method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::context::tests::session;
    use pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use radius_proto::eap::eap_tls::TlsFlags;
    use radius_proto::{EapCode, EapPacket};
    use rustls::ServerConfig;

    fn config() -> EngineConfig {
        EngineConfig::from_json(
            r#"{"methods": [13], "tls": {"cert_path": "unused", "key_path": "unused"}}"#,
        )
        .unwrap()
    }

    fn tls_settings() -> Arc<ProtocolSettings> {
        let generated = rcgen::generate_simple_self_signed(vec!["radius.test".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der()));
        let server = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![generated.cert.der().clone()], key)
            .unwrap();
        Arc::new(ProtocolSettings::new(config()).with_tls_config(Arc::new(server)))
    }

    fn response(identifier: u8, tls: EapTlsPacket) -> Vec<u8> {
        tls.to_eap_response(identifier, MethodType::TLS).to_bytes().unwrap()
    }

    fn started(payload: &mut TlsPayload, ctx: &mut crate::context::SessionContext) -> EapPacket {
        payload.decode(&[]).unwrap();
        payload.handle(ctx);
        EapPacket::from_bytes(&payload.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_start_without_tls_config_fails() {
        let mut ctx = session(Arc::new(ProtocolSettings::new(config())));
        let mut payload = TlsPayload::new(MethodType::TLS, None);
        payload.decode(&[]).unwrap();
        payload.handle(&mut ctx);

        assert_eq!(ctx.take_termination().status, Status::Error);
        assert!(payload.encode().unwrap().is_empty());
    }

    #[test]
    fn test_start_sends_start_flag() {
        let mut ctx = session(tls_settings());
        let mut payload = TlsPayload::new(MethodType::TLS, None);
        let request = started(&mut payload, &mut ctx);

        assert_eq!(request.code, EapCode::Request);
        assert_eq!(request.method_type, Some(MethodType::TLS));
        assert!(EapTlsPacket::from_eap_data(&request.data).unwrap().flags.start());
        assert!(!ctx.is_protocol_start(MethodType::TLS));
        assert_eq!(ctx.take_termination().status, Status::Unknown);
        // No keys before the handshake completes
        assert!(payload.msk().is_none());
    }

    #[test]
    fn test_fragment_is_acknowledged() {
        let mut ctx = session(tls_settings());
        let mut payload = TlsPayload::new(MethodType::TLS, None);
        started(&mut payload, &mut ctx);

        let first = EapTlsPacket::new(TlsFlags::new(true, true, false), Some(400), vec![0x16; 200]);
        payload.decode(&response(1, first)).unwrap();
        payload.handle(&mut ctx);

        let ack = EapPacket::from_bytes(&payload.encode().unwrap()).unwrap();
        assert!(EapTlsPacket::from_eap_data(&ack.data).unwrap().is_ack());
        assert_eq!(ctx.take_termination().status, Status::Unknown);
    }

    #[test]
    fn test_garbage_handshake_fails() {
        let mut ctx = session(tls_settings());
        let mut payload = TlsPayload::new(MethodType::TLS, None);
        started(&mut payload, &mut ctx);

        let garbage = EapTlsPacket::new(TlsFlags::default(), None, vec![0xFF; 32]);
        payload.decode(&response(1, garbage)).unwrap();
        payload.handle(&mut ctx);
        assert_eq!(ctx.take_termination().status, Status::Error);
    }

    #[test]
    fn test_unexpected_ack_fails() {
        let mut ctx = session(tls_settings());
        let mut payload = TlsPayload::new(MethodType::TLS, None);
        started(&mut payload, &mut ctx);

        payload.decode(&response(1, EapTlsPacket::ack())).unwrap();
        payload.handle(&mut ctx);
        assert_eq!(ctx.take_termination().status, Status::Error);
    }

    #[test]
    fn test_nak_declines() {
        let mut ctx = session(tls_settings());
        let mut payload = TlsPayload::new(MethodType::PEAP, Some(Arc::new(MethodRegistry::new())));
        started(&mut payload, &mut ctx);

        payload
            .decode(&EapPacket::nak(1, &[MethodType::MD5_CHALLENGE]).to_bytes().unwrap())
            .unwrap();
        payload.handle(&mut ctx);
        assert_eq!(ctx.take_termination().status, Status::NextProtocol);
        assert_eq!(nak::take_desired(&mut ctx), Some(vec![MethodType::MD5_CHALLENGE]));
    }

    #[test]
    fn test_wrong_method_rejected() {
        let mut payload = TlsPayload::new(MethodType::PEAP, None);
        let frame = response(1, EapTlsPacket::ack());
        assert!(matches!(payload.decode(&frame), Err(MethodError::Decode(_))));
        assert!(!payload.is_tunnel());
    }
}
