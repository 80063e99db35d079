//! EAP method dispatch and tunneling for a RADIUS server
//!
//! This crate runs EAP conversations carried in RADIUS Access-Requests. It
//! is built on top of the `radius-proto` wire formats.
//!
//! # Features
//!
//! - A small method contract ([`Payload`]) with a per-session [`Context`]
//! - Method registry and negotiation, including legacy Nak
//! - EAP-MD5, EAP-TLS and a PEAP-like tunnel running inner methods
//! - MS-MPPE keys on Access-Accept for TLS based methods
//! - JSON configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use eap_engine::{Engine, EngineConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_file("eap.json")?;
//!     let engine = Engine::from_config(config)?;
//!
//!     // Hand every Access-Request carrying an EAP-Message to the engine
//!     // and send `reply.packet` back to the NAS.
//!     println!("{} sessions in flight", engine.session_count());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod methods;
pub mod protocol;
pub mod tls_config;
pub mod tunnel;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, EngineConfig, ProtocolSettings, TlsSettings, User};
pub use context::{Identifiers, InnerContext, SessionContext};
pub use engine::{Engine, Reply};
pub use error::{EngineError, MethodError, StateError};
pub use methods::{default_registry, inner_registry};
pub use protocol::{
    Context, ContextExt, MethodRegistry, PacketMutator, Payload, ProtocolStateStore, Status,
    Termination,
};
pub use tunnel::{TlsTunnel, drive_inner};
