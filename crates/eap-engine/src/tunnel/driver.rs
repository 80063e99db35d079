use std::io::{Read, Write};
use tracing::warn;

use crate::error::MethodError;
use crate::protocol::{Context, Payload, Status};

/// Largest inner EAP frame accepted from the tunnel
pub const MAX_INNER_FRAME: usize = 1024;

/// Run one round of the inner method over the tunnel plaintext
///
/// The tunnel is only read once the inner method has created its state, so
/// the first call decodes an empty frame and lets the method open the
/// conversation. A frame whose EAP identifier is not the one of the
/// outstanding inner request is discarded without touching the method.
/// Failures are logged and reported as `Status::Error` on `ctx`; a failed
/// read is not fatal.
pub fn drive_inner<T>(inner: &mut dyn Payload, tunnel: &mut T, ctx: &mut dyn Context)
where
    T: Read + Write + ?Sized,
{
    let method = inner.method_type();
    let mut buf = vec![0u8; MAX_INNER_FRAME + 1];
    let mut len = 0;

    if !ctx.is_protocol_start(method) {
        match tunnel.read(&mut buf) {
            Ok(read) => len = read,
            Err(e) => {
                let err = MethodError::TunnelRead(e);
                warn!(parent: ctx.log(), method = %method, error = %err, "No plaintext read from tunnel");
            }
        }
    }

    if len > MAX_INNER_FRAME {
        let err = MethodError::FrameTooLarge {
            size: len,
            max: MAX_INNER_FRAME,
        };
        warn!(parent: ctx.log(), method = %method, error = %err, "Rejecting inner frame");
        ctx.end_inner_protocol(Status::Error, None);
        return;
    }

    // A response to anything but the outstanding request is dropped unseen
    if len >= 2
        && let Some(expected) = ctx.outstanding_identifier()
        && buf[1] != expected
    {
        warn!(
            parent: ctx.log(),
            method = %method,
            expected,
            received = buf[1],
            "Discarding inner frame with stale identifier"
        );
        return;
    }

    if let Err(err) = inner.decode(&buf[..len]) {
        warn!(parent: ctx.log(), method = %method, error = %err, "Failed to decode inner frame");
        ctx.end_inner_protocol(Status::Error, None);
        return;
    }

    inner.handle(ctx);

    let frame = match inner.encode() {
        Ok(frame) => frame,
        Err(err) => {
            warn!(parent: ctx.log(), method = %method, error = %err, "Failed to encode inner frame");
            ctx.end_inner_protocol(Status::Error, None);
            return;
        }
    };

    if frame.is_empty() {
        return;
    }

    if let Err(e) = tunnel.write_all(&frame) {
        let err = MethodError::TunnelWrite(e);
        warn!(parent: ctx.log(), method = %method, error = %err, "Failed to write inner frame");
        ctx.end_inner_protocol(Status::Error, None);
    }
}
