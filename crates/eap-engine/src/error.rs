use radius_proto::{EapError, MethodType, PacketError};
use std::io;
use thiserror::Error;

use crate::config::ConfigError;

/// Failures inside a single EAP method
///
/// These never cross the method boundary from `handle`; they are logged and
/// turned into a termination status by whoever observed them.
#[derive(Error, Debug)]
pub enum MethodError {
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("Tunnel read failed: {0}")]
    TunnelRead(#[source] io::Error),
    #[error("Tunnel write failed: {0}")]
    TunnelWrite(#[source] io::Error),
    #[error("Inner frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("Settings error: {0}")]
    Settings(String),
}

impl From<EapError> for MethodError {
    fn from(err: EapError) -> Self {
        MethodError::Decode(err.to_string())
    }
}

/// Misuse of the per-method state store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("State for method {method} is not a {expected}")]
    TypeMismatch {
        method: MethodType,
        expected: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Request carries no EAP-Message")]
    MissingEapMessage,
    #[error("EAP error: {0}")]
    Eap(#[from] EapError),
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),
    #[error("EAP identifier {received} does not answer outstanding request {expected}")]
    StaleIdentifier { expected: u8, received: u8 },
    #[error("Method {0} is not registered")]
    UnknownMethod(MethodType),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
