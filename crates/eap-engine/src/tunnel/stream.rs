use pki_types::CertificateDer;
use rustls::{ProtocolVersion, ServerConfig, ServerConnection};
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use crate::error::MethodError;

/// Exporter label for MSK/EMSK derivation (RFC 5216 Section 2.3)
pub const KEYING_MATERIAL_LABEL: &[u8] = b"client EAP encryption";

/// Server side of a TLS tunnel driven by EAP round trips
///
/// Records received from the peer are pushed in with
/// [`receive_records`](Self::receive_records); records to send back are
/// pulled with [`pending_records`](Self::pending_records). Plaintext is
/// exchanged through the `Read`/`Write` impls.
pub struct TlsTunnel {
    conn: ServerConnection,
}

impl TlsTunnel {
    pub fn new(config: Arc<ServerConfig>) -> Result<Self, MethodError> {
        let conn = ServerConnection::new(config)
            .map_err(|e| MethodError::Tls(format!("Failed to create connection: {}", e)))?;
        Ok(TlsTunnel { conn })
    }

    /// Feed a reassembled TLS message from the peer
    pub fn receive_records(&mut self, data: &[u8]) -> Result<(), MethodError> {
        let mut cursor = Cursor::new(data);
        while (cursor.position() as usize) < data.len() {
            let read = self
                .conn
                .read_tls(&mut cursor)
                .map_err(|e| MethodError::Tls(format!("Failed to read TLS: {}", e)))?;
            if read == 0 {
                break;
            }
            self.conn
                .process_new_packets()
                .map_err(|e| MethodError::Tls(format!("TLS processing error: {}", e)))?;
        }
        Ok(())
    }

    /// Drain every record waiting to be sent to the peer
    pub fn pending_records(&mut self) -> Result<Vec<u8>, MethodError> {
        let mut out = Vec::new();
        while self.conn.wants_write() {
            self.conn
                .write_tls(&mut out)
                .map_err(|e| MethodError::Tls(format!("Failed to write TLS: {}", e)))?;
        }
        Ok(out)
    }

    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.conn.protocol_version()
    }

    /// MSK followed by EMSK
    pub fn export_keying_material(&self) -> Result<[u8; 128], MethodError> {
        self.conn
            .export_keying_material([0u8; 128], KEYING_MATERIAL_LABEL, None)
            .map_err(|e| MethodError::Tls(format!("Failed to export keying material: {}", e)))
    }

    pub fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        self.conn.peer_certificates()
    }
}

impl Read for TlsTunnel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.conn.reader().read(buf)
    }
}

impl Write for TlsTunnel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.conn.writer().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.conn.writer().flush()
    }
}
