//! Method contract shared by every EAP method and the code that drives them
//!
//! A method is driven one EAP frame at a time: [`Payload::decode`] ingests
//! the peer's frame, [`Payload::handle`] stages a reply using the session
//! [`Context`], and [`Payload::encode`] serializes the staged reply. A method
//! reports that it is done through [`Context::end_inner_protocol`] rather
//! than through return values.

mod registry;
mod state;

pub use registry::{Constructor, MethodRegistry};
pub use state::ProtocolStateStore;

use radius_proto::{MethodType, Packet, Request};
use std::any::{Any, type_name};
use std::fmt;
use tracing::Span;

use crate::error::{MethodError, StateError};

/// Outcome a method reports for its level of the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// Nothing reported; another round trip is needed
    #[default]
    Unknown,
    /// Authentication completed and accepted
    Success,
    /// Authentication failed, abort the exchange
    Error,
    /// Method declined or finished a preliminary phase; negotiate another one
    NextProtocol,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Success | Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Unknown => "unknown",
            Status::Success => "success",
            Status::Error => "error",
            Status::NextProtocol => "next-protocol",
        };
        f.write_str(name)
    }
}

/// Edit applied to the outgoing RADIUS packet right before it is sent
pub type PacketMutator = Box<dyn FnOnce(Packet) -> Packet + Send>;

/// Run `first` then `second`
pub fn chain_mutators(
    first: Option<PacketMutator>,
    second: Option<PacketMutator>,
) -> Option<PacketMutator> {
    match (first, second) {
        (Some(first), Some(second)) => Some(Box::new(move |packet| second(first(packet)))),
        (first, None) => first,
        (None, second) => second,
    }
}

/// Status reported by a method level together with its packet edit
#[derive(Default)]
pub struct Termination {
    pub status: Status,
    pub mutator: Option<PacketMutator>,
}

impl Termination {
    pub fn new(status: Status, mutator: Option<PacketMutator>) -> Self {
        Termination { status, mutator }
    }

    /// Append a mutator that runs after the one already attached
    pub fn then(mut self, mutator: Option<PacketMutator>) -> Self {
        self.mutator = chain_mutators(self.mutator.take(), mutator);
        self
    }

    pub fn apply(self, packet: Packet) -> Packet {
        match self.mutator {
            Some(mutator) => mutator(packet),
            None => packet,
        }
    }
}

impl fmt::Debug for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Termination")
            .field("status", &self.status)
            .field("mutator", &self.mutator.is_some())
            .finish()
    }
}

/// An EAP method handler
pub trait Payload: Send {
    fn method_type(&self) -> MethodType;

    /// Ingest a complete EAP frame from the peer. An empty slice means the
    /// method is being started and there is no peer frame yet.
    fn decode(&mut self, raw: &[u8]) -> Result<(), MethodError>;

    /// Stage the reply to the last decoded frame. Failures are reported via
    /// [`Context::end_inner_protocol`].
    fn handle(&mut self, ctx: &mut dyn Context);

    /// Serialize the staged reply. Fails when nothing was staged; a method
    /// that ended without a frame to send encodes to zero bytes.
    fn encode(&mut self) -> Result<Vec<u8>, MethodError>;
}

/// What a method sees of the session it runs in
pub trait Context {
    /// RADIUS request of the current invocation
    fn packet(&self) -> &Request;

    /// Method negotiated at the top level of the session
    fn root_payload(&self) -> MethodType;

    fn protocol_settings(&self) -> &(dyn Any + Send + Sync + 'static);

    fn get_protocol_state(&mut self, id: MethodType) -> Option<&mut (dyn Any + Send + 'static)>;

    fn set_protocol_state(&mut self, id: MethodType, state: Box<dyn Any + Send>);

    /// True until state for `id` has been created at this level
    fn is_protocol_start(&self, id: MethodType) -> bool;

    /// Report the outcome of the calling level. The last call of an
    /// invocation wins.
    fn end_inner_protocol(&mut self, status: Status, mutator: Option<PacketMutator>);

    /// EAP identifier for the next request emitted at this level
    fn next_identifier(&mut self) -> u8;

    /// Identifier of the last request emitted at this level, `None` until
    /// the first one
    fn outstanding_identifier(&self) -> Option<u8>;

    fn log(&self) -> &Span;
}

/// Typed helpers on top of [`Context`]
pub trait ContextExt: Context {
    fn settings<T: Any>(&self) -> Option<&T> {
        self.protocol_settings().downcast_ref::<T>()
    }

    /// Get the state of `id`, creating it with `S::default()` on first use
    fn protocol_state<S: Any + Send + Default>(&mut self, id: MethodType) -> Result<&mut S, StateError> {
        if self.get_protocol_state(id).is_none() {
            self.set_protocol_state(id, Box::new(S::default()));
        }
        self.get_protocol_state(id)
            .and_then(|state| state.downcast_mut::<S>())
            .ok_or(StateError::TypeMismatch {
                method: id,
                expected: type_name::<S>(),
            })
    }
}

impl<C: Context + ?Sized> ContextExt for C {}
