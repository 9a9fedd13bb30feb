//! Key derivation: PBKDF2-HMAC-SHA256 password → wrapping key

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use fenc_core::{FencError, FencResult};

use crate::{KEY_SIZE, SALT_SIZE};

/// A 256-bit key derived from a password, used only to wrap key records.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct WrappingKey {
    bytes: [u8; KEY_SIZE],
}

impl WrappingKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for WrappingKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappingKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a 256-bit wrapping key from a password and salt.
///
/// The salt is 16 random bytes stored next to the wrapped record; the
/// iteration count travels with it so records stay readable if the default
/// changes.
pub fn derive_wrapping_key(
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    iterations: u32,
) -> FencResult<WrappingKey> {
    if iterations == 0 {
        return Err(FencError::input("PBKDF2 iteration count must be at least 1"));
    }
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password.expose_secret().as_bytes(), salt, iterations, &mut key);
    Ok(WrappingKey::from_bytes(key))
}

/// Fresh random salt for `derive_wrapping_key`.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf_deterministic() {
        let password = SecretString::from("test-password-123");
        let salt = [1u8; SALT_SIZE];

        let key1 = derive_wrapping_key(&password, &salt, 1000).unwrap();
        let key2 = derive_wrapping_key(&password, &salt, 1000).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes(), "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_rfc7914_vector() {
        // PBKDF2-HMAC-SHA256, P="passwd", S="salt", c=1 (RFC 7914 section 11), first 32 bytes
        let mut out = [0u8; 32];
        pbkdf2_hmac::<Sha256>(b"passwd", b"salt", 1, &mut out);
        assert_eq!(
            hex::encode(out),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn test_kdf_inputs_matter() {
        let salt = [1u8; SALT_SIZE];
        let a = derive_wrapping_key(&SecretString::from("password-a"), &salt, 1000).unwrap();
        let b = derive_wrapping_key(&SecretString::from("password-b"), &salt, 1000).unwrap();
        let c = derive_wrapping_key(&SecretString::from("password-a"), &[2u8; SALT_SIZE], 1000).unwrap();
        let d = derive_wrapping_key(&SecretString::from("password-a"), &salt, 1001).unwrap();

        assert_ne!(a.as_bytes(), b.as_bytes(), "different passwords must produce different keys");
        assert_ne!(a.as_bytes(), c.as_bytes(), "different salts must produce different keys");
        assert_ne!(a.as_bytes(), d.as_bytes(), "different iteration counts must produce different keys");
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let err = derive_wrapping_key(&SecretString::from("x"), &[0u8; SALT_SIZE], 0).unwrap_err();
        assert_eq!(err.kind(), fenc_core::ErrorKind::Input);
    }

    #[test]
    fn test_debug_redacted() {
        let key = WrappingKey::from_bytes([0x41; KEY_SIZE]);
        assert_eq!(format!("{key:?}"), "WrappingKey { bytes: \"[REDACTED]\" }");
    }
}
