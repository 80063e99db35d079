//! Microsoft MPPE key attributes (RFC 2548 Section 2.4.2 and 2.4.3)
//!
//! EAP methods that derive keying material hand the first 64 octets of it
//! (the MSK) to the NAS in two Vendor-Specific attributes. Each key is
//! obfuscated with the shared secret and the Request Authenticator:
//!
//! ```text
//! P    = key length (1) + key + zero padding to a multiple of 16
//! b(1) = MD5(secret + request authenticator + salt)   c(1) = p(1) xor b(1)
//! b(i) = MD5(secret + c(i-1))                         c(i) = p(i) xor b(i)
//! value = salt (2) + c(1) + ... + c(n)
//! ```

use crate::attributes::Attribute;
use crate::packet::PacketError;
use rand::Rng;

/// Microsoft vendor id
pub const VENDOR_MICROSOFT: u32 = 311;
/// MS-MPPE-Send-Key vendor type
pub const MS_MPPE_SEND_KEY: u8 = 16;
/// MS-MPPE-Recv-Key vendor type
pub const MS_MPPE_RECV_KEY: u8 = 17;

/// Length of each MPPE key taken from the MSK
pub const MPPE_KEY_LEN: usize = 32;

/// Build the MS-MPPE-Recv-Key and MS-MPPE-Send-Key attributes for an MSK
///
/// The Recv-Key carries the first half of the MSK, the Send-Key the second.
pub fn mppe_key_attributes(
    msk: &[u8; 64],
    secret: &[u8],
    request_authenticator: &[u8; 16],
) -> Result<Vec<Attribute>, PacketError> {
    let mut rng = rand::rng();
    let mut salt = [0u8; 2];
    rng.fill(&mut salt);
    salt[0] |= 0x80;
    // Each attribute needs its own salt
    let mut send_salt = salt;
    send_salt[1] ^= 0x01;

    let recv = encrypt_mppe_key(&msk[..MPPE_KEY_LEN], secret, request_authenticator, salt);
    let send = encrypt_mppe_key(&msk[MPPE_KEY_LEN..], secret, request_authenticator, send_salt);

    Ok(vec![
        Attribute::vendor_specific(VENDOR_MICROSOFT, MS_MPPE_RECV_KEY, &recv)?,
        Attribute::vendor_specific(VENDOR_MICROSOFT, MS_MPPE_SEND_KEY, &send)?,
    ])
}

/// Encrypt a single key, returning salt + ciphertext
pub fn encrypt_mppe_key(
    key: &[u8],
    secret: &[u8],
    request_authenticator: &[u8; 16],
    salt: [u8; 2],
) -> Vec<u8> {
    let mut plain = Vec::with_capacity(key.len() + 16);
    plain.push(key.len() as u8);
    plain.extend_from_slice(key);
    let padding_needed = (16 - (plain.len() % 16)) % 16;
    plain.resize(plain.len() + padding_needed, 0);

    let mut result = Vec::with_capacity(2 + plain.len());
    result.extend_from_slice(&salt);

    let mut previous_block = Vec::with_capacity(18);
    previous_block.extend_from_slice(request_authenticator);
    previous_block.extend_from_slice(&salt);

    for chunk in plain.chunks(16) {
        let mut data = Vec::with_capacity(secret.len() + previous_block.len());
        data.extend_from_slice(secret);
        data.extend_from_slice(&previous_block);
        let hash = md5::compute(&data);

        let encrypted_block: Vec<u8> = chunk.iter().zip(hash.0.iter()).map(|(p, b)| p ^ b).collect();
        result.extend_from_slice(&encrypted_block);
        previous_block = encrypted_block;
    }

    result
}

/// Reverse of [`encrypt_mppe_key`], used by NAS-side tooling and tests
pub fn decrypt_mppe_key(
    value: &[u8],
    secret: &[u8],
    request_authenticator: &[u8; 16],
) -> Result<Vec<u8>, PacketError> {
    if value.len() < 18 || (value.len() - 2) % 16 != 0 {
        return Err(PacketError::AttributeError(format!(
            "Invalid MPPE key length: {} bytes",
            value.len()
        )));
    }

    let (salt, cipher) = value.split_at(2);
    let mut plain = Vec::with_capacity(cipher.len());
    let mut previous_block = Vec::with_capacity(18);
    previous_block.extend_from_slice(request_authenticator);
    previous_block.extend_from_slice(salt);

    for chunk in cipher.chunks(16) {
        let mut data = Vec::with_capacity(secret.len() + previous_block.len());
        data.extend_from_slice(secret);
        data.extend_from_slice(&previous_block);
        let hash = md5::compute(&data);

        plain.extend(chunk.iter().zip(hash.0.iter()).map(|(c, b)| c ^ b));
        previous_block = chunk.to_vec();
    }

    let key_len = plain[0] as usize;
    if key_len + 1 > plain.len() {
        return Err(PacketError::AttributeError(format!(
            "MPPE key length {} exceeds payload",
            key_len
        )));
    }
    Ok(plain[1..1 + key_len].to_vec())
}
