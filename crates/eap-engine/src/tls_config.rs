//! rustls server configuration for the TLS based methods

use pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use rustls::crypto::CryptoProvider;
use rustls::server::WebPkiClientVerifier;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use x509_parser::prelude::*;

use crate::config::{ConfigError, TlsSettings};

/// Load every certificate of a PEM file
pub fn load_certificates_from_pem(path: &str) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let file = File::open(path).map_err(|e| {
        ConfigError::Certificate(format!("Failed to open certificate file '{}': {}", path, e))
    })?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Certificate(format!("Failed to parse certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(ConfigError::Certificate(format!(
            "No certificates found in '{}'",
            path
        )));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) of a PEM file
pub fn load_private_key_from_pem(path: &str) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let file = File::open(path)
        .map_err(|e| ConfigError::Certificate(format!("Failed to open key file '{}': {}", path, e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ConfigError::Certificate(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| ConfigError::Certificate(format!("No private key found in '{}'", path)))
}

/// Reject certificates outside their validity period
pub fn validate_certificate(cert_der: &[u8]) -> Result<(), ConfigError> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| ConfigError::Certificate(format!("Invalid X.509 certificate: {}", e)))?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| ConfigError::Certificate(format!("System time error: {}", e)))?
        .as_secs() as i64;

    let validity = cert.validity();
    if now < validity.not_before.timestamp() {
        return Err(ConfigError::Certificate(format!(
            "Certificate is not yet valid (not before: {})",
            validity.not_before
        )));
    }
    if now > validity.not_after.timestamp() {
        return Err(ConfigError::Certificate(format!(
            "Certificate has expired (not after: {})",
            validity.not_after
        )));
    }
    Ok(())
}

/// Subject CN of a DER certificate
pub fn certificate_common_name(cert_der: &[u8]) -> Option<String> {
    let (_, cert) = X509Certificate::from_der(cert_der).ok()?;
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build the rustls server configuration described by `settings`
pub fn build_server_config(settings: &TlsSettings) -> Result<ServerConfig, ConfigError> {
    let certs = load_certificates_from_pem(&settings.cert_path)?;
    let key = load_private_key_from_pem(&settings.key_path)?;
    validate_certificate(&certs[0])?;

    let provider = crypto_provider();
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::Tls(format!("Unsupported protocol versions: {}", e)))?;

    let builder = if settings.require_client_cert {
        let ca_path = settings.ca_cert_path.as_deref().ok_or_else(|| {
            ConfigError::Invalid(
                "Client certificate verification required but no CA certificate path provided"
                    .to_string(),
            )
        })?;

        let mut roots = rustls::RootCertStore::empty();
        for ca in load_certificates_from_pem(ca_path)? {
            roots.add(ca).map_err(|e| {
                ConfigError::Certificate(format!("Failed to add CA certificate: {}", e))
            })?;
        }

        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| ConfigError::Tls(format!("Failed to build client verifier: {}", e)))?;
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };

    builder
        .with_single_cert(certs, key)
        .map_err(|e| ConfigError::Tls(format!("Failed to configure server: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FRAGMENT_SIZE;
    use rcgen::{CertificateParams, DnType, KeyPair};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn pem_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn settings(cert: &NamedTempFile, key: &NamedTempFile) -> TlsSettings {
        TlsSettings {
            cert_path: cert.path().to_str().unwrap().to_string(),
            key_path: key.path().to_str().unwrap().to_string(),
            ca_cert_path: None,
            require_client_cert: false,
            verify_peer_identity: false,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
        }
    }

    #[test]
    fn test_build_server_config() {
        let generated = rcgen::generate_simple_self_signed(vec!["radius.test".to_string()]).unwrap();
        let cert = pem_file(&generated.cert.pem());
        let key = pem_file(&generated.key_pair.serialize_pem());

        assert!(build_server_config(&settings(&cert, &key)).is_ok());
    }

    #[test]
    fn test_client_verification_needs_ca() {
        let generated = rcgen::generate_simple_self_signed(vec!["radius.test".to_string()]).unwrap();
        let cert = pem_file(&generated.cert.pem());
        let key = pem_file(&generated.key_pair.serialize_pem());

        let mut tls = settings(&cert, &key);
        tls.require_client_cert = true;
        assert!(matches!(build_server_config(&tls), Err(ConfigError::Invalid(_))));

        tls.ca_cert_path = Some(tls.cert_path.clone());
        assert!(build_server_config(&tls).is_ok());
    }

    #[test]
    fn test_missing_and_empty_files() {
        assert!(load_certificates_from_pem("/nonexistent/cert.pem").is_err());
        let empty = pem_file("");
        assert!(load_certificates_from_pem(empty.path().to_str().unwrap()).is_err());
        assert!(load_private_key_from_pem(empty.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_common_name() {
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, "alice");
        let key_pair = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();

        assert_eq!(certificate_common_name(cert.der()).as_deref(), Some("alice"));
        assert!(validate_certificate(cert.der()).is_ok());
        assert_eq!(certificate_common_name(b"not a certificate"), None);
    }
}
