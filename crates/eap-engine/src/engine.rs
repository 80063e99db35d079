//! EAP session engine
//!
//! The engine sits between the RADIUS packet handler and the EAP methods. For
//! every Access-Request carrying an EAP-Message it:
//!
//! 1. Resumes the session named by the State attribute, or opens a new one
//!    starting with EAP Identity. A response whose EAP identifier does not
//!    match the outstanding request is discarded and the session is left
//!    untouched; the caller sends nothing back.
//! 2. Runs the top-level method, moving on to the next negotiated method for
//!    as long as methods report `NextProtocol`.
//! 3. Builds the reply: Access-Challenge carrying the next EAP request,
//!    Access-Accept with EAP-Success, or Access-Reject with EAP-Failure.
//!    Packet mutators collected along the way are applied to it.
//!
//! # Example
//!
//! ```no_run
//! use eap_engine::{Engine, EngineConfig};
//! use radius_proto::{Packet, Request};
//!
//! let config = EngineConfig::from_file("eap.json").unwrap();
//! let engine = Engine::from_config(config).unwrap();
//!
//! # let packet: Packet = unimplemented!();
//! let reply = engine.handle_request(Request::new(packet, "testing123")).unwrap();
//! println!("{:?} for session {}", reply.status, reply.session_id);
//! ```

use dashmap::DashMap;
use radius_proto::eap::frame_to_radius_attributes;
use radius_proto::{Attribute, AttributeType, Code, EapPacket, MethodType, Packet, Request};
use rand::Rng;
use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, ProtocolSettings};
use crate::context::SessionContext;
use crate::error::EngineError;
use crate::methods::{default_registry, nak};
use crate::protocol::{
    Context, MethodRegistry, PacketMutator, Payload, Status, Termination, chain_mutators,
};

const SESSION_ID_LEN: usize = 16;

/// One in-flight EAP exchange
struct Session {
    ctx: SessionContext,
    payload: Box<dyn Payload>,
    tried: Vec<MethodType>,
}

/// Outcome of one Access-Request
#[derive(Debug)]
pub struct Reply {
    pub packet: Packet,
    pub status: Status,
    pub session_id: String,
}

pub struct Engine {
    registry: Arc<MethodRegistry>,
    settings: Arc<ProtocolSettings>,
    sessions: DashMap<String, Mutex<Session>>,
}

fn new_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_LEN];
    rand::rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl Engine {
    pub fn new(registry: Arc<MethodRegistry>, settings: Arc<ProtocolSettings>) -> Self {
        Engine {
            registry,
            settings,
            sessions: DashMap::new(),
        }
    }

    /// Engine with every built-in method, certificates loaded from `config`
    pub fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        let settings = ProtocolSettings::from_config(config)?;
        Ok(Engine::new(Arc::new(default_registry()), Arc::new(settings)))
    }

    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Process one Access-Request and build the reply for the NAS
    pub fn handle_request(&self, request: Request) -> Result<Reply, EngineError> {
        let raw = request.eap_bytes().ok_or(EngineError::MissingEapMessage)?;
        if raw.is_empty() {
            return Err(EngineError::MissingEapMessage);
        }
        let eap = EapPacket::from_bytes(&raw)?;

        let mut session = match self.resume(&request) {
            Some(mut session) => {
                if let Some(expected) = session.ctx.outstanding_identifier()
                    && eap.identifier != expected
                {
                    warn!(
                        parent: session.ctx.log(),
                        expected,
                        received = eap.identifier,
                        "Discarding EAP response to a request that is not outstanding"
                    );
                    let id = session.ctx.session_id().to_string();
                    self.sessions.insert(id, Mutex::new(session));
                    return Err(EngineError::StaleIdentifier {
                        expected,
                        received: eap.identifier,
                    });
                }
                session.ctx.begin_invocation(request);
                session
            }
            None => self.open(request, eap.identifier)?,
        };

        let (status, mutator) = self.run(&mut session, raw);
        let reply = self.reply(&mut session, &eap, status, mutator);

        if reply.status == Status::Unknown {
            let id = session.ctx.session_id().to_string();
            self.sessions.insert(id, Mutex::new(session));
        } else {
            info!(
                parent: session.ctx.log(),
                status = %reply.status,
                methods = ?session.tried,
                "EAP session finished"
            );
        }
        Ok(reply)
    }

    fn resume(&self, request: &Request) -> Option<Session> {
        let state = request.state()?;
        let id = String::from_utf8_lossy(state).to_string();
        match self.sessions.remove(&id) {
            Some((_, session)) => Some(session.into_inner().unwrap_or_else(PoisonError::into_inner)),
            None => {
                debug!(session = %id, "No session for State, starting over");
                None
            }
        }
    }

    fn open(&self, request: Request, peer_identifier: u8) -> Result<Session, EngineError> {
        let payload = self
            .registry
            .construct(MethodType::IDENTITY)
            .ok_or(EngineError::UnknownMethod(MethodType::IDENTITY))?;
        let settings: Arc<dyn Any + Send + Sync> = self.settings.clone();
        let ctx = SessionContext::new(
            new_session_id(),
            request,
            settings,
            MethodType::IDENTITY,
            peer_identifier.wrapping_add(1),
        );
        debug!(parent: ctx.log(), "New EAP session");
        Ok(Session {
            ctx,
            payload,
            tried: vec![MethodType::IDENTITY],
        })
    }

    /// Run methods until one of them waits for the peer or the exchange ends
    fn run(&self, session: &mut Session, raw: Vec<u8>) -> (Status, Option<PacketMutator>) {
        let mut input = raw;
        let mut carried: Option<PacketMutator> = None;

        loop {
            let method = session.payload.method_type();
            match session.payload.decode(&input) {
                Ok(()) => session.payload.handle(&mut session.ctx),
                Err(e) => {
                    warn!(parent: session.ctx.log(), method = %method, error = %e, "Failed to decode EAP response");
                    session.ctx.end_inner_protocol(Status::Error, None);
                }
            }

            let termination = session.ctx.take_termination();
            let mutator = chain_mutators(carried.take(), termination.mutator);
            if termination.status != Status::NextProtocol {
                return (termination.status, mutator);
            }
            carried = mutator;

            let desired = nak::take_desired(&mut session.ctx);
            let next = self
                .registry
                .negotiate(&self.settings.config().methods, &session.tried, desired.as_deref())
                .and_then(|next| self.registry.construct(next));
            let Some(payload) = next else {
                warn!(
                    parent: session.ctx.log(),
                    tried = ?session.tried,
                    desired = ?desired,
                    "No EAP method left to negotiate"
                );
                return (Status::Error, carried);
            };

            let next = payload.method_type();
            info!(parent: session.ctx.log(), method = %next, "Starting EAP method");
            session.ctx.set_root(next);
            session.tried.push(next);
            session.payload = payload;
            input = Vec::new();
        }
    }

    fn reply(
        &self,
        session: &mut Session,
        eap: &EapPacket,
        status: Status,
        mutator: Option<PacketMutator>,
    ) -> Reply {
        let session_id = session.ctx.session_id().to_string();

        let (code, frame, status) = match status {
            Status::Success => (Code::AccessAccept, EapPacket::success(eap.identifier).to_bytes(), status),
            Status::Error | Status::NextProtocol => {
                (Code::AccessReject, EapPacket::failure(eap.identifier).to_bytes(), Status::Error)
            }
            Status::Unknown => match session.payload.encode() {
                Ok(bytes) if !bytes.is_empty() => (Code::AccessChallenge, Ok(bytes), status),
                Ok(_) => {
                    warn!(parent: session.ctx.log(), "Method produced no reply without ending");
                    (Code::AccessReject, EapPacket::failure(eap.identifier).to_bytes(), Status::Error)
                }
                Err(e) => {
                    warn!(parent: session.ctx.log(), error = %e, "Failed to encode EAP request");
                    (Code::AccessReject, EapPacket::failure(eap.identifier).to_bytes(), Status::Error)
                }
            },
        };

        let mut packet = session.ctx.packet().packet.response(code);
        match frame.and_then(|bytes| frame_to_radius_attributes(&bytes)) {
            Ok(attributes) => {
                for attribute in attributes {
                    packet.add_attribute(attribute);
                }
            }
            Err(e) => warn!(parent: session.ctx.log(), error = %e, "Failed to attach EAP-Message"),
        }
        if code == Code::AccessChallenge {
            match Attribute::new(AttributeType::State.as_u8(), session_id.clone().into_bytes()) {
                Ok(state) => packet.add_attribute(state),
                Err(e) => warn!(parent: session.ctx.log(), error = %e, "Failed to attach State"),
            }
        }

        Reply {
            packet: Termination::new(status, mutator).apply(packet),
            status,
            session_id,
        }
    }

    /// Drop sessions idle for longer than `timeout`
    pub fn expire_idle(&self, timeout: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|id, session| {
            let session = session.get_mut().unwrap_or_else(PoisonError::into_inner);
            let keep = session.ctx.idle_for() < timeout;
            if !keep {
                debug!(session = %id, "Expiring idle EAP session");
            }
            keep
        });
        before.saturating_sub(self.sessions.len())
    }

    /// [`expire_idle`](Self::expire_idle) with the configured session timeout
    pub fn expire_idle_sessions(&self) -> usize {
        self.expire_idle(Duration::from_secs(self.settings.config().session_timeout_secs))
    }
}
