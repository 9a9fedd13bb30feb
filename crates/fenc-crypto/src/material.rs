//! Key material produced by `Cipher::generate_key` and persisted by the key manager.

use zeroize::Zeroizing;

use fenc_core::{FencError, FencResult};

use crate::algorithm::{CipherAlgorithm, CipherCategory};
use crate::IV_SIZE;

/// Secret and public key material for one algorithm.
///
/// Secret fields are zeroized on drop and never printed by `Debug`.
#[derive(Clone)]
pub struct KeyMaterial {
    /// Registry name of the algorithm this material belongs to
    pub algorithm: String,
    /// Unix timestamp of generation
    pub created_at: u64,
    /// Declared key size in bits
    pub key_size: u32,
    /// AES mode name, if any
    pub mode: Option<String>,
    /// Raw symmetric secret (AES / ChaCha20-Poly1305)
    pub key: Option<Zeroizing<Vec<u8>>>,
    /// AES initialization vector
    pub iv: Option<Vec<u8>>,
    /// SPKI PEM of the RSA public half
    pub public_pem: Option<String>,
    /// PKCS#8 PEM of the RSA private half, possibly passphrase-encrypted
    pub private_pem: Option<Zeroizing<String>>,
    /// Whether `private_pem` is an encrypted PKCS#8 document
    pub private_key_encrypted: bool,
}

impl KeyMaterial {
    /// Material for a symmetric or AEAD cipher.
    pub fn symmetric(algorithm: &CipherAlgorithm, key: Vec<u8>, iv: Option<Vec<u8>>) -> Self {
        Self {
            algorithm: algorithm.name().to_string(),
            created_at: now_secs(),
            key_size: algorithm.key_bits(),
            mode: algorithm.mode().map(|m| m.as_str().to_string()),
            key: Some(Zeroizing::new(key)),
            iv,
            public_pem: None,
            private_pem: None,
            private_key_encrypted: false,
        }
    }

    /// Material for an asymmetric key pair (either half may be absent).
    pub fn key_pair(
        algorithm: &CipherAlgorithm,
        public_pem: Option<String>,
        private_pem: Option<Zeroizing<String>>,
        private_key_encrypted: bool,
    ) -> Self {
        Self {
            algorithm: algorithm.name().to_string(),
            created_at: now_secs(),
            key_size: algorithm.key_bits(),
            mode: None,
            key: None,
            iv: None,
            public_pem,
            private_pem,
            private_key_encrypted,
        }
    }

    /// The raw symmetric secret, or `InputError` if this material has none.
    pub fn secret(&self) -> FencResult<&[u8]> {
        self.key
            .as_ref()
            .map(|k| k.as_slice())
            .ok_or_else(|| FencError::input(format!("{} key material has no secret key", self.algorithm)))
    }

    pub fn has_private_half(&self) -> bool {
        self.private_pem.is_some()
    }

    /// Check that the fields match what `algorithm` declares.
    pub fn validate(&self, algorithm: &CipherAlgorithm) -> FencResult<()> {
        if self.algorithm != algorithm.name() {
            return Err(FencError::input(format!(
                "key material is for {}, not {}",
                self.algorithm,
                algorithm.name()
            )));
        }

        match algorithm.category() {
            CipherCategory::Symmetric | CipherCategory::Aead => {
                let secret = self.secret()?;
                if secret.len() != algorithm.key_len() {
                    return Err(FencError::input(format!(
                        "key length mismatch: {} requires {} bits, got {}",
                        algorithm.name(),
                        algorithm.key_bits(),
                        secret.len() * 8
                    )));
                }
                if let Some(iv) = &self.iv {
                    if algorithm.mode().is_some() && iv.len() != IV_SIZE {
                        return Err(FencError::input(format!(
                            "IV must be {IV_SIZE} bytes, got {}",
                            iv.len()
                        )));
                    }
                }
            }
            CipherCategory::Asymmetric => {
                if self.public_pem.is_none() && self.private_pem.is_none() {
                    return Err(FencError::input(format!(
                        "{} key material has neither a public nor a private key",
                        algorithm.name()
                    )));
                }
                if self.key.is_some() {
                    return Err(FencError::input(format!(
                        "{} key material must not carry a symmetric secret",
                        algorithm.name()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .field("key_size", &self.key_size)
            .field("mode", &self.mode)
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .field("iv", &self.iv.as_ref().map(hex::encode))
            .field("public_pem", &self.public_pem.is_some())
            .field("private_pem", &self.private_pem.as_ref().map(|_| "[REDACTED]"))
            .field("private_key_encrypted", &self.private_key_encrypted)
            .finish()
    }
}

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
