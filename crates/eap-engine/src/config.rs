use radius_proto::MethodType;
use rustls::ServerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::tls_config::build_server_config;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Certificate error: {0}")]
    Certificate(String),
    #[error("TLS error: {0}")]
    Tls(String),
}

/// Credentials for password based methods
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password: String,
}

/// Server certificate and EAP-TLS framing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSettings {
    /// Server certificate chain (PEM)
    pub cert_path: String,
    /// Server private key (PEM)
    pub key_path: String,
    /// CA used to verify client certificates (PEM)
    #[serde(default)]
    pub ca_cert_path: Option<String>,
    #[serde(default)]
    pub require_client_cert: bool,
    /// Require the client certificate CN to match the EAP identity
    #[serde(default)]
    pub verify_peer_identity: bool,
    /// Largest EAP-TLS Type-Data sent per round trip
    #[serde(default = "default_fragment_size")]
    pub fragment_size: usize,
}

pub const DEFAULT_FRAGMENT_SIZE: usize = 1020;
const FRAGMENT_SIZE_RANGE: std::ops::RangeInclusive<usize> = 64..=3000;

fn default_fragment_size() -> usize {
    DEFAULT_FRAGMENT_SIZE
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Outer methods in order of preference, proposed after Identity
    #[serde(default = "default_methods")]
    pub methods: Vec<MethodType>,
    /// Methods run inside a tunnel after the inner Identity exchange
    #[serde(default = "default_inner_methods")]
    pub inner_methods: Vec<MethodType>,
    #[serde(default)]
    pub tls: Option<TlsSettings>,
    #[serde(default)]
    pub users: Vec<User>,
    /// Idle time after which an unfinished exchange is dropped
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
}

fn default_methods() -> Vec<MethodType> {
    vec![MethodType::PEAP, MethodType::TLS, MethodType::MD5_CHALLENGE]
}

fn default_inner_methods() -> Vec<MethodType> {
    vec![MethodType::MD5_CHALLENGE]
}

fn default_session_timeout() -> u64 {
    300
}

fn is_tls_based(method: MethodType) -> bool {
    matches!(method, MethodType::TLS | MethodType::PEAP | MethodType::TTLS)
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.methods.is_empty() {
            return Err(ConfigError::Invalid("At least one EAP method must be enabled".to_string()));
        }

        for method in self.methods.iter().chain(&self.inner_methods) {
            if matches!(*method, MethodType::IDENTITY | MethodType::NAK | MethodType::NOTIFICATION) {
                return Err(ConfigError::Invalid(format!(
                    "{} cannot be negotiated as an authentication method",
                    method
                )));
            }
        }

        if let Some(method) = self.inner_methods.iter().find(|m| is_tls_based(**m)) {
            return Err(ConfigError::Invalid(format!(
                "{} cannot run inside a tunnel",
                method
            )));
        }

        if self.tls.is_none()
            && let Some(method) = self.methods.iter().find(|m| is_tls_based(**m))
        {
            return Err(ConfigError::Invalid(format!(
                "{} requires a tls section",
                method
            )));
        }

        if let Some(tls) = &self.tls {
            if !FRAGMENT_SIZE_RANGE.contains(&tls.fragment_size) {
                return Err(ConfigError::Invalid(format!(
                    "fragment_size must be within {}..={}",
                    FRAGMENT_SIZE_RANGE.start(),
                    FRAGMENT_SIZE_RANGE.end()
                )));
            }
            if tls.require_client_cert && tls.ca_cert_path.is_none() {
                return Err(ConfigError::Invalid(
                    "require_client_cert needs ca_cert_path".to_string(),
                ));
            }
            if tls.verify_peer_identity && !tls.require_client_cert {
                return Err(ConfigError::Invalid(
                    "verify_peer_identity needs require_client_cert".to_string(),
                ));
            }
        }

        if self.session_timeout_secs == 0 {
            return Err(ConfigError::Invalid("session_timeout_secs cannot be 0".to_string()));
        }

        for user in &self.users {
            if user.username.is_empty() {
                return Err(ConfigError::Invalid("User has empty username".to_string()));
            }
        }

        Ok(())
    }

    pub fn find_user(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|user| user.username == username)
    }

    pub fn example() -> Self {
        EngineConfig {
            methods: default_methods(),
            inner_methods: default_inner_methods(),
            tls: Some(TlsSettings {
                cert_path: "/etc/radius/certs/server.pem".to_string(),
                key_path: "/etc/radius/certs/server-key.pem".to_string(),
                ca_cert_path: Some("/etc/radius/certs/ca.pem".to_string()),
                require_client_cert: false,
                verify_peer_identity: false,
                fragment_size: DEFAULT_FRAGMENT_SIZE,
            }),
            users: vec![User {
                username: "alice".to_string(),
                password: "password123".to_string(),
            }],
            session_timeout_secs: default_session_timeout(),
        }
    }
}

/// Settings handed to methods through the session context
#[derive(Debug, Clone)]
pub struct ProtocolSettings {
    config: EngineConfig,
    tls: Option<Arc<ServerConfig>>,
}

impl ProtocolSettings {
    /// Settings without a TLS server configuration
    pub fn new(config: EngineConfig) -> Self {
        ProtocolSettings { config, tls: None }
    }

    /// Validate `config` and load its certificates
    pub fn from_config(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let tls = match &config.tls {
            Some(settings) => Some(Arc::new(build_server_config(settings)?)),
            None => None,
        };
        Ok(ProtocolSettings { config, tls })
    }

    pub fn with_tls_config(mut self, tls: Arc<ServerConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tls_config(&self) -> Option<Arc<ServerConfig>> {
        self.tls.clone()
    }

    pub fn fragment_size(&self) -> usize {
        self.config
            .tls
            .as_ref()
            .map_or(DEFAULT_FRAGMENT_SIZE, |tls| tls.fragment_size)
    }

    pub fn verify_peer_identity(&self) -> bool {
        self.config
            .tls
            .as_ref()
            .is_some_and(|tls| tls.verify_peer_identity)
    }
}
