//! Legacy Nak (RFC 3748 Section 5.3.1)
//!
//! A Nak is only ever a response. The method that receives it records the
//! peer's proposals here and reports `NextProtocol`; the level that
//! negotiates the next method picks them up with [`take_desired`].

use radius_proto::MethodType;
use tracing::info;

use crate::protocol::{Context, ContextExt, ProtocolStateStore, Status};

#[derive(Debug, Default)]
pub struct NakState {
    pub desired: Option<Vec<MethodType>>,
}

/// Record the methods the peer asked for and give up the current method
pub fn decline(ctx: &mut dyn Context, method: MethodType, desired: Vec<MethodType>) {
    info!(parent: ctx.log(), method = %method, desired = ?desired, "Peer refused method");
    match ctx.protocol_state::<NakState>(MethodType::NAK) {
        Ok(state) => {
            state.desired = Some(desired);
            ctx.end_inner_protocol(Status::NextProtocol, None);
        }
        Err(_) => ctx.end_inner_protocol(Status::Error, None),
    }
}

/// Methods proposed by the last Nak at this level, if one arrived
pub fn take_desired(ctx: &mut dyn Context) -> Option<Vec<MethodType>> {
    if ctx.is_protocol_start(MethodType::NAK) {
        return None;
    }
    ctx.protocol_state::<NakState>(MethodType::NAK)
        .ok()
        .and_then(|state| state.desired.take())
}

/// Same as [`take_desired`], straight from a level's state store
pub(crate) fn take_desired_in(states: &mut ProtocolStateStore) -> Option<Vec<MethodType>> {
    states
        .get(MethodType::NAK)
        .and_then(|state| state.downcast_mut::<NakState>())
        .and_then(|state| state.desired.take())
}
