//! TLS tunnel carrying an inner EAP conversation

mod driver;
mod stream;

pub use driver::{MAX_INNER_FRAME, drive_inner};
pub use stream::{KEYING_MATERIAL_LABEL, TlsTunnel};
