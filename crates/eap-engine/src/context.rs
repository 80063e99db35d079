//! Contexts handed to methods
//!
//! [`SessionContext`] lives as long as an authentication exchange and is
//! handed to the top-level method on every round trip. [`InnerContext`] is
//! built by a tunneling method around its own state for the duration of one
//! call into its inner method.

use radius_proto::{MethodType, Request};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Span, debug, info_span};

use crate::protocol::{Context, PacketMutator, ProtocolStateStore, Status, Termination};

fn record_termination(
    slot: &mut Option<Termination>,
    span: &Span,
    status: Status,
    mutator: Option<PacketMutator>,
) {
    if let Some(previous) = slot.as_ref() {
        debug!(
            parent: span,
            previous = %previous.status,
            status = %status,
            "termination status overwritten"
        );
    }
    *slot = Some(Termination::new(status, mutator));
}

/// EAP identifiers issued by one level of the conversation
///
/// A Response is only accepted when it carries the identifier of the last
/// Request issued here (RFC 3748 section 4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identifiers {
    next: u8,
    outstanding: Option<u8>,
}

impl Identifiers {
    pub fn new(first: u8) -> Self {
        Identifiers {
            next: first,
            outstanding: None,
        }
    }

    pub fn issue(&mut self) -> u8 {
        let id = self.next;
        self.next = id.wrapping_add(1);
        self.outstanding = Some(id);
        id
    }

    pub fn outstanding(&self) -> Option<u8> {
        self.outstanding
    }
}

/// Context of one authentication exchange
pub struct SessionContext {
    session_id: String,
    request: Request,
    root: MethodType,
    states: ProtocolStateStore,
    settings: Arc<dyn Any + Send + Sync>,
    span: Span,
    termination: Option<Termination>,
    identifiers: Identifiers,
    last_activity: Instant,
}

impl SessionContext {
    /// `first_identifier` is the identifier of the first request this level
    /// will emit.
    pub fn new(
        session_id: impl Into<String>,
        request: Request,
        settings: Arc<dyn Any + Send + Sync>,
        root: MethodType,
        first_identifier: u8,
    ) -> Self {
        let session_id = session_id.into();
        let span = info_span!(
            "eap_session",
            session = %session_id,
            peer = ?request.remote_addr,
        );
        SessionContext {
            session_id,
            request,
            root,
            states: ProtocolStateStore::new(),
            settings,
            span,
            termination: None,
            identifiers: Identifiers::new(first_identifier),
            last_activity: Instant::now(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Start a new round trip with the next request of the exchange
    pub fn begin_invocation(&mut self, request: Request) {
        self.request = request;
        self.termination = None;
        self.last_activity = Instant::now();
    }

    /// Outcome reported during this invocation, `Unknown` if none
    pub fn take_termination(&mut self) -> Termination {
        self.termination.take().unwrap_or_default()
    }

    pub fn set_root(&mut self, root: MethodType) {
        self.root = root;
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

impl Context for SessionContext {
    fn packet(&self) -> &Request {
        &self.request
    }

    fn root_payload(&self) -> MethodType {
        self.root
    }

    fn protocol_settings(&self) -> &(dyn Any + Send + Sync + 'static) {
        self.settings.as_ref()
    }

    fn get_protocol_state(&mut self, id: MethodType) -> Option<&mut (dyn Any + Send + 'static)> {
        self.states.get(id)
    }

    fn set_protocol_state(&mut self, id: MethodType, state: Box<dyn Any + Send>) {
        self.states.set(id, state);
    }

    fn is_protocol_start(&self, id: MethodType) -> bool {
        !self.states.contains(id)
    }

    fn end_inner_protocol(&mut self, status: Status, mutator: Option<PacketMutator>) {
        record_termination(&mut self.termination, &self.span, status, mutator);
    }

    fn next_identifier(&mut self) -> u8 {
        self.identifiers.issue()
    }

    fn outstanding_identifier(&self) -> Option<u8> {
        self.identifiers.outstanding()
    }

    fn log(&self) -> &Span {
        &self.span
    }
}

/// Context of a method running inside a tunnel
///
/// State, identifiers and termination are private to the tunnel level;
/// the request and settings are the outer session's.
pub struct InnerContext<'a> {
    parent: &'a mut dyn Context,
    states: &'a mut ProtocolStateStore,
    identifiers: &'a mut Identifiers,
    span: Span,
    termination: Option<Termination>,
}

impl<'a> InnerContext<'a> {
    pub fn new(
        parent: &'a mut dyn Context,
        states: &'a mut ProtocolStateStore,
        identifiers: &'a mut Identifiers,
        tunnel: MethodType,
    ) -> Self {
        let span = info_span!(parent: parent.log(), "tunnel", method = %tunnel);
        InnerContext {
            parent,
            states,
            identifiers,
            span,
            termination: None,
        }
    }

    pub fn into_termination(self) -> Termination {
        self.termination.unwrap_or_default()
    }
}

impl Context for InnerContext<'_> {
    fn packet(&self) -> &Request {
        self.parent.packet()
    }

    fn root_payload(&self) -> MethodType {
        self.parent.root_payload()
    }

    fn protocol_settings(&self) -> &(dyn Any + Send + Sync + 'static) {
        self.parent.protocol_settings()
    }

    fn get_protocol_state(&mut self, id: MethodType) -> Option<&mut (dyn Any + Send + 'static)> {
        self.states.get(id)
    }

    fn set_protocol_state(&mut self, id: MethodType, state: Box<dyn Any + Send>) {
        self.states.set(id, state);
    }

    fn is_protocol_start(&self, id: MethodType) -> bool {
        !self.states.contains(id)
    }

    fn end_inner_protocol(&mut self, status: Status, mutator: Option<PacketMutator>) {
        record_termination(&mut self.termination, &self.span, status, mutator);
    }

    fn next_identifier(&mut self) -> u8 {
        self.identifiers.issue()
    }

    fn outstanding_identifier(&self) -> Option<u8> {
        self.identifiers.outstanding()
    }

    fn log(&self) -> &Span {
        &self.span
    }
}
