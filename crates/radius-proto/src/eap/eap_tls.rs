//! EAP-TLS framing (RFC 5216 Section 3)
//!
//! The same framing is shared by the TLS-based tunnel methods (PEAP, TTLS),
//! which only differ in the method type and in the version bits that live in
//! the low part of the flags octet.

use super::{EapError, EapPacket, MethodType};

/// EAP-TLS flags (first byte of Type-Data)
///
/// ```text
///  0 1 2 3 4 5 6 7
/// +-+-+-+-+-+-+-+-+
/// |L M S R R R R R|
/// +-+-+-+-+-+-+-+-+
/// ```
///
/// - L (Length included) = 0x80
/// - M (More fragments) = 0x40
/// - S (Start) = 0x20
/// - R (Reserved, or version bits for PEAP/TTLS)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlsFlags(u8);

impl TlsFlags {
    pub const LENGTH_INCLUDED: u8 = 0x80;
    pub const MORE_FRAGMENTS: u8 = 0x40;
    pub const START: u8 = 0x20;

    pub fn new(length_included: bool, more_fragments: bool, start: bool) -> Self {
        let mut flags = 0u8;
        if length_included {
            flags |= Self::LENGTH_INCLUDED;
        }
        if more_fragments {
            flags |= Self::MORE_FRAGMENTS;
        }
        if start {
            flags |= Self::START;
        }
        TlsFlags(flags)
    }

    /// Create from raw byte, dropping the reserved/version bits
    pub fn from_u8(value: u8) -> Self {
        TlsFlags(value & 0xE0)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    pub fn length_included(self) -> bool {
        (self.0 & Self::LENGTH_INCLUDED) != 0
    }

    pub fn more_fragments(self) -> bool {
        (self.0 & Self::MORE_FRAGMENTS) != 0
    }

    pub fn start(self) -> bool {
        (self.0 & Self::START) != 0
    }
}

/// EAP-TLS Type-Data
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Flags     |               TLS Message Length              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     TLS Message Length        |       TLS Data...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapTlsPacket {
    pub flags: TlsFlags,
    /// Total TLS message length (present if L flag is set)
    pub tls_message_length: Option<u32>,
    pub tls_data: Vec<u8>,
}

impl EapTlsPacket {
    /// Upper bound for a reassembled TLS message
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

    pub fn new(flags: TlsFlags, tls_message_length: Option<u32>, tls_data: Vec<u8>) -> Self {
        EapTlsPacket {
            flags,
            tls_message_length,
            tls_data,
        }
    }

    /// EAP-TLS Start (S flag, no data)
    pub fn start() -> Self {
        Self::new(TlsFlags::new(false, false, true), None, Vec::new())
    }

    /// Acknowledgement of a received fragment (no flags, no data)
    pub fn ack() -> Self {
        Self::new(TlsFlags::default(), None, Vec::new())
    }

    pub fn is_ack(&self) -> bool {
        self.flags.as_u8() == 0 && self.tls_data.is_empty()
    }

    pub fn from_eap_data(data: &[u8]) -> Result<Self, EapError> {
        if data.is_empty() {
            return Err(EapError::PacketTooShort {
                expected: 1,
                actual: 0,
            });
        }

        let flags = TlsFlags::from_u8(data[0]);
        let (tls_message_length, offset) = if flags.length_included() {
            if data.len() < 5 {
                return Err(EapError::PacketTooShort {
                    expected: 5,
                    actual: data.len(),
                });
            }
            (Some(u32::from_be_bytes([data[1], data[2], data[3], data[4]])), 5)
        } else {
            (None, 1)
        };

        Ok(EapTlsPacket {
            flags,
            tls_message_length,
            tls_data: data[offset..].to_vec(),
        })
    }

    pub fn to_eap_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(5 + self.tls_data.len());
        data.push(self.flags.as_u8());
        if let Some(length) = self.tls_message_length {
            data.extend_from_slice(&length.to_be_bytes());
        }
        data.extend_from_slice(&self.tls_data);
        data
    }

    /// Wrap into an EAP Request of the given TLS-based method
    pub fn to_eap_request(&self, identifier: u8, method: MethodType) -> EapPacket {
        EapPacket::request(identifier, method, self.to_eap_data())
    }

    /// Wrap into an EAP Response of the given TLS-based method
    pub fn to_eap_response(&self, identifier: u8, method: MethodType) -> EapPacket {
        EapPacket::response(identifier, method, self.to_eap_data())
    }
}

/// Reassembles fragmented TLS messages received from the peer
#[derive(Debug, Clone, Default)]
pub struct TlsFragmentAssembler {
    expected_length: Option<u32>,
    fragments: Vec<u8>,
}

impl TlsFragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fragment
    ///
    /// Returns `Some(message)` once the last fragment arrived; the assembler
    /// is then ready for the next message.
    pub fn add_fragment(&mut self, packet: &EapTlsPacket) -> Result<Option<Vec<u8>>, EapError> {
        if packet.flags.length_included() && self.expected_length.is_none() {
            self.expected_length = packet.tls_message_length;
        }

        self.fragments.extend_from_slice(&packet.tls_data);
        if self.fragments.len() > EapTlsPacket::MAX_MESSAGE_SIZE {
            let size = self.fragments.len();
            self.reset();
            return Err(EapError::PacketTooLarge(size));
        }

        if packet.flags.more_fragments() {
            return Ok(None);
        }

        let expected = self.expected_length;
        let message = std::mem::take(&mut self.fragments);
        self.reset();

        if let Some(announced) = expected
            && message.len() != announced as usize
        {
            return Err(EapError::FragmentLengthMismatch {
                announced: announced as usize,
                received: message.len(),
            });
        }
        Ok(Some(message))
    }

    /// True while a fragmented message is partially received
    pub fn in_progress(&self) -> bool {
        !self.fragments.is_empty() || self.expected_length.is_some()
    }

    pub fn reset(&mut self) {
        self.expected_length = None;
        self.fragments.clear();
    }
}

/// Fragment a TLS message into EAP-TLS packets
///
/// `max_fragment_size` bounds the Type-Data of each packet (flags and length
/// field included). The first packet carries the L flag with the total
/// length, every packet but the last carries the M flag. An empty message
/// yields no packets.
pub fn fragment_tls_message(tls_data: &[u8], max_fragment_size: usize) -> Vec<EapTlsPacket> {
    let mut packets = Vec::new();
    let total_length = tls_data.len() as u32;
    let first_fragment_size = max_fragment_size.saturating_sub(5).max(1);
    let subsequent_fragment_size = max_fragment_size.saturating_sub(1).max(1);

    let mut offset = 0;
    while offset < tls_data.len() {
        let is_first = offset == 0;
        let remaining = tls_data.len() - offset;
        let fragment_size = if is_first {
            first_fragment_size.min(remaining)
        } else {
            subsequent_fragment_size.min(remaining)
        };

        let more_fragments = offset + fragment_size < tls_data.len();
        let fragment_data = tls_data[offset..offset + fragment_size].to_vec();

        packets.push(if is_first {
            EapTlsPacket::new(
                TlsFlags::new(true, more_fragments, false),
                Some(total_length),
                fragment_data,
            )
        } else {
            EapTlsPacket::new(TlsFlags::new(false, more_fragments, false), None, fragment_data)
        });
        offset += fragment_size;
    }

    packets
}
