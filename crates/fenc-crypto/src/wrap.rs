//! Password wrapping of serialized key records.
//!
//! Uses XChaCha20-Poly1305 with a random nonce.
//! Output: `[24-byte nonce][ciphertext + 16-byte tag]`, authenticated over the
//! caller-supplied AAD (the record header).

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use fenc_core::{FencError, FencResult};

use crate::kdf::WrappingKey;
use crate::{TAG_SIZE, XNONCE_SIZE};

/// Encrypt `plaintext` under `key`, binding `aad`.
pub fn seal(key: &WrappingKey, plaintext: &[u8], aad: &[u8]) -> FencResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; XNONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| FencError::input(format!("key wrapping failed: {e}")))?;

    let mut result = Vec::with_capacity(XNONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt the output of `seal`.
///
/// Every failure (short input, wrong key, tampered AAD or body) is the same
/// `IntegrityError`.
pub fn open(key: &WrappingKey, wrapped: &[u8], aad: &[u8]) -> FencResult<Zeroizing<Vec<u8>>> {
    if wrapped.len() < XNONCE_SIZE + TAG_SIZE {
        return Err(FencError::Integrity);
    }

    let (nonce_bytes, ciphertext) = wrapped.split_at(XNONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map(Zeroizing::new)
        .map_err(|_| FencError::Integrity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;

    fn test_key(byte: u8) -> WrappingKey {
        WrappingKey::from_bytes([byte; KEY_SIZE])
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let wrapped = seal(&test_key(42), b"{\"name\":\"k\"}", b"hdr").unwrap();
        let plain = open(&test_key(42), &wrapped, b"hdr").unwrap();
        assert_eq!(plain.as_slice(), b"{\"name\":\"k\"}");
    }

    #[test]
    fn test_wrapped_size() {
        let wrapped = seal(&test_key(1), &[0u8; 32], b"").unwrap();
        // nonce (24) + payload (32) + tag (16) = 72
        assert_eq!(wrapped.len(), XNONCE_SIZE + 32 + TAG_SIZE);
    }

    #[test]
    fn test_unwrap_wrong_key() {
        let wrapped = seal(&test_key(1), b"secret", b"").unwrap();
        assert!(matches!(open(&test_key(2), &wrapped, b""), Err(FencError::Integrity)));
    }

    #[test]
    fn test_unwrap_wrong_aad() {
        let wrapped = seal(&test_key(1), b"secret", b"iterations=1000").unwrap();
        assert!(open(&test_key(1), &wrapped, b"iterations=1").is_err());
    }

    #[test]
    fn test_unwrap_truncated() {
        assert!(matches!(open(&test_key(1), &[0u8; 39], b""), Err(FencError::Integrity)));
    }
}
