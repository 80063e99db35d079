//! Helpers shared by the end-to-end tests: a NAS relaying EAP frames in
//! RADIUS packets, a throwaway PKI and a TLS capable EAP peer.

#![allow(dead_code)]

use eap_engine::methods::md5::compute_response_hash;
use eap_engine::methods::tls::COMMITMENT_MESSAGE;
use eap_engine::{Engine, Reply, Status};
use pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use radius_proto::eap::eap_tls::{EapTlsPacket, TlsFlags, TlsFragmentAssembler};
use radius_proto::eap::{add_eap_to_radius_packet, eap_from_radius_packet};
use radius_proto::mppe::{MS_MPPE_RECV_KEY, MS_MPPE_SEND_KEY, VENDOR_MICROSOFT, decrypt_mppe_key};
use radius_proto::{Attribute, AttributeType, Code, EapCode, EapPacket, MethodType, Packet, Request};
use rand::Rng;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::crypto::CryptoProvider;
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig};
use std::io::{Read, Write};
use std::sync::Arc;

pub const SECRET: &str = "testing123";
pub const SERVER_NAME: &str = "radius.test";

/// Relays EAP frames to the engine the way a NAS does
pub struct Nas {
    identifier: u8,
    state: Option<Vec<u8>>,
}

impl Nas {
    pub fn new() -> Self {
        Nas {
            identifier: 0,
            state: None,
        }
    }

    pub fn request(&mut self, eap: &EapPacket) -> Request {
        self.identifier = self.identifier.wrapping_add(1);
        let mut authenticator = [0u8; 16];
        rand::rng().fill(&mut authenticator);

        let mut packet = Packet::new(Code::AccessRequest, self.identifier, authenticator);
        add_eap_to_radius_packet(&mut packet, eap).expect("Failed to add EAP-Message");
        if let Some(state) = &self.state {
            packet.add_attribute(
                Attribute::new(AttributeType::State.as_u8(), state.clone())
                    .expect("Failed to create State"),
            );
        }
        Request::new(packet, SECRET)
    }

    pub fn send(&mut self, engine: &Engine, eap: &EapPacket) -> Reply {
        let request = self.request(eap);
        let reply = engine.handle_request(request).expect("Engine rejected request");
        assert_eq!(reply.packet.identifier, self.identifier);
        self.state = reply
            .packet
            .find_attribute(AttributeType::State.as_u8())
            .map(|attr| attr.value.clone());
        reply
    }
}

pub fn eap_of(reply: &Reply) -> EapPacket {
    eap_from_radius_packet(&reply.packet)
        .expect("Invalid EAP-Message")
        .expect("Reply without EAP-Message")
}

pub fn user_name(reply: &Reply) -> Option<String> {
    reply
        .packet
        .find_attribute(AttributeType::UserName.as_u8())
        .and_then(|attr| attr.as_string().ok())
}

/// Decrypted (Recv, Send) MPPE keys of an Access-Accept
pub fn mppe_keys(reply: &Reply) -> (Vec<u8>, Vec<u8>) {
    let mut recv = None;
    let mut send = None;
    for attr in reply.packet.find_all_attributes(AttributeType::VendorSpecific.as_u8()) {
        let Some((VENDOR_MICROSOFT, vendor_type, value)) = attr.as_vendor_specific() else {
            continue;
        };
        let key = decrypt_mppe_key(value, SECRET.as_bytes(), &reply.packet.authenticator)
            .expect("Failed to decrypt MPPE key");
        match vendor_type {
            MS_MPPE_RECV_KEY => recv = Some(key),
            MS_MPPE_SEND_KEY => send = Some(key),
            _ => {}
        }
    }
    (recv.expect("No MS-MPPE-Recv-Key"), send.expect("No MS-MPPE-Send-Key"))
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Certificate authority issuing the server and client certificates
pub struct TestCa {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl TestCa {
    pub fn new() -> Self {
        let key = KeyPair::generate().expect("Failed to generate CA key");
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, "EAP Test CA");
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::DigitalSignature];
        let cert = params.self_signed(&key).expect("Failed to sign CA");
        TestCa { cert, key }
    }

    fn roots(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.add(self.cert.der().clone()).expect("Failed to add CA");
        roots
    }

    fn issue(
        &self,
        names: Vec<String>,
        common_name: &str,
        usage: ExtendedKeyUsagePurpose,
    ) -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
        let key = KeyPair::generate().expect("Failed to generate key");
        let mut params = CertificateParams::new(names).expect("Certificate params");
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.extended_key_usages = vec![usage];
        let cert = params
            .signed_by(&key, &self.cert, &self.key)
            .expect("Failed to issue certificate");
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
        (cert.der().clone(), key)
    }

    pub fn server_config(&self, require_client_cert: bool) -> Arc<ServerConfig> {
        let (cert, key) = self.issue(
            vec![SERVER_NAME.to_string()],
            SERVER_NAME,
            ExtendedKeyUsagePurpose::ServerAuth,
        );
        let builder = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .expect("Protocol versions");
        let config = if require_client_cert {
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(self.roots()), provider())
                .build()
                .expect("Client verifier");
            builder.with_client_cert_verifier(verifier)
        } else {
            builder.with_no_client_auth()
        };
        Arc::new(config.with_single_cert(vec![cert], key).expect("Server certificate"))
    }

    pub fn client_config(&self, client_common_name: Option<&str>) -> Arc<ClientConfig> {
        let builder = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .expect("Protocol versions")
            .with_root_certificates(self.roots());
        let config = match client_common_name {
            Some(name) => {
                let (cert, key) = self.issue(Vec::new(), name, ExtendedKeyUsagePurpose::ClientAuth);
                builder
                    .with_client_auth_cert(vec![cert], key)
                    .expect("Client certificate")
            }
            None => builder.with_no_client_auth(),
        };
        Arc::new(config)
    }
}

/// EAP peer for EAP-TLS and PEAP with EAP-MD5 inside the tunnel
pub struct TlsPeer {
    method: MethodType,
    config: Arc<ClientConfig>,
    conn: Option<ClientConnection>,
    assembler: TlsFragmentAssembler,
    identity: String,
    password: String,
    /// Inner EAP-Success or EAP-Failure seen through the tunnel
    pub inner_result: Option<EapCode>,
    pub fragments_acked: usize,
    /// TLS 1.3 EAP-TLS commitment message seen
    pub commitment_received: bool,
}

impl TlsPeer {
    pub fn new(method: MethodType, config: Arc<ClientConfig>, identity: &str, password: &str) -> Self {
        TlsPeer {
            method,
            config,
            conn: None,
            assembler: TlsFragmentAssembler::new(),
            identity: identity.to_string(),
            password: password.to_string(),
            inner_result: None,
            fragments_acked: 0,
            commitment_received: false,
        }
    }

    pub fn respond(&mut self, request: &EapPacket) -> EapPacket {
        assert_eq!(request.code, EapCode::Request);
        assert_eq!(request.method_type, Some(self.method));
        let tls = EapTlsPacket::from_eap_data(&request.data).expect("Invalid EAP-TLS request");

        if tls.flags.start() {
            let name = ServerName::try_from(SERVER_NAME).expect("Server name");
            self.conn = Some(ClientConnection::new(self.config.clone(), name).expect("Client connection"));
            return self.flight(request.identifier);
        }

        let Some(message) = self.assembler.add_fragment(&tls).expect("Fragment reassembly") else {
            self.fragments_acked += 1;
            return EapTlsPacket::ack().to_eap_response(request.identifier, self.method);
        };

        let mut plaintext = Vec::new();
        {
            let conn = self.conn.as_mut().expect("TLS not started");
            let mut records = &message[..];
            while !records.is_empty() {
                conn.read_tls(&mut records).expect("read_tls");
                conn.process_new_packets().expect("TLS processing");
            }
            // WouldBlock once the buffered plaintext is drained
            let _ = conn.reader().read_to_end(&mut plaintext);
        }

        if plaintext == [COMMITMENT_MESSAGE] {
            self.commitment_received = true;
        } else if !plaintext.is_empty() {
            let inner = EapPacket::from_bytes(&plaintext).expect("Invalid inner EAP frame");
            if let Some(reply) = self.inner_reply(&inner) {
                let conn = self.conn.as_mut().expect("TLS not started");
                conn.writer()
                    .write_all(&reply.to_bytes().expect("Inner encode"))
                    .expect("Tunnel write");
            }
        }
        self.flight(request.identifier)
    }

    fn inner_reply(&mut self, request: &EapPacket) -> Option<EapPacket> {
        match (request.code, request.method_type) {
            (EapCode::Request, Some(MethodType::IDENTITY)) => {
                Some(EapPacket::identity_response(request.identifier, &self.identity))
            }
            (EapCode::Request, Some(MethodType::MD5_CHALLENGE)) => {
                let hash = compute_response_hash(request.identifier, &self.password, &request.data[1..]);
                let mut data = vec![16];
                data.extend_from_slice(&hash);
                data.extend_from_slice(self.identity.as_bytes());
                Some(EapPacket::response(request.identifier, MethodType::MD5_CHALLENGE, data))
            }
            (code, _) => {
                self.inner_result = Some(code);
                None
            }
        }
    }

    fn flight(&mut self, identifier: u8) -> EapPacket {
        let conn = self.conn.as_mut().expect("TLS not started");
        let mut out = Vec::new();
        while conn.wants_write() {
            conn.write_tls(&mut out).expect("write_tls");
        }
        let packet = if out.is_empty() {
            EapTlsPacket::ack()
        } else {
            EapTlsPacket::new(TlsFlags::new(true, false, false), Some(out.len() as u32), out)
        };
        packet.to_eap_response(identifier, self.method)
    }

    /// MSK as derived on the peer side
    pub fn msk(&self) -> Vec<u8> {
        let conn = self.conn.as_ref().expect("TLS not started");
        let keys = conn
            .export_keying_material([0u8; 128], b"client EAP encryption", None)
            .expect("Keying material");
        keys[..64].to_vec()
    }
}

/// Run the whole conversation, starting from the peer's identity
pub fn authenticate(engine: &Engine, peer: &mut TlsPeer, identity: &str) -> Reply {
    let mut nas = Nas::new();
    let mut reply = nas.send(engine, &EapPacket::identity_response(0, identity));
    for _ in 0..64 {
        if reply.status != Status::Unknown {
            return reply;
        }
        let response = peer.respond(&eap_of(&reply));
        reply = nas.send(engine, &response);
    }
    panic!("EAP conversation did not finish");
}
