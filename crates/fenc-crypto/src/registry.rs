//! Name → constructor map for every available cipher.
//!
//! The registry is an ordinary value: build one at startup, share it behind
//! an `Arc`, and construct a fresh cipher per operation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use fenc_core::{FencError, FencResult};

use crate::aes::AesCipher;
use crate::algorithm::{AesMode, CipherAlgorithm, CipherCategory};
use crate::chacha::{ChaChaCipher, CHACHA_NAME};
use crate::cipher::{ChunkTransform, Cipher, CipherParams, StreamOptions};
use crate::material::KeyMaterial;
use crate::rsa::RsaCipher;

/// RSA modulus sizes registered by default
pub const RSA_KEY_SIZES: [u32; 3] = [1024, 2048, 4096];

/// AES key sizes registered by default
pub const AES_KEY_SIZES: [u32; 3] = [128, 192, 256];

/// A concrete cipher built by the registry.
pub enum AnyCipher {
    Aes(AesCipher),
    ChaCha(ChaChaCipher),
    Rsa(RsaCipher),
    /// Runtime-registered implementation
    Custom(Box<dyn Cipher>),
}

impl AnyCipher {
    fn inner(&self) -> &dyn Cipher {
        match self {
            AnyCipher::Aes(c) => c,
            AnyCipher::ChaCha(c) => c,
            AnyCipher::Rsa(c) => c,
            AnyCipher::Custom(c) => c.as_ref(),
        }
    }

    /// The RSA cipher, when this is one (for PEM import).
    pub fn as_rsa(&self) -> Option<&RsaCipher> {
        match self {
            AnyCipher::Rsa(c) => Some(c),
            _ => None,
        }
    }
}

impl Cipher for AnyCipher {
    fn algorithm(&self) -> &CipherAlgorithm {
        self.inner().algorithm()
    }

    fn encrypt_data(
        &self,
        plaintext: &[u8],
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Vec<u8>> {
        self.inner().encrypt_data(plaintext, key, params)
    }

    fn decrypt_data(
        &self,
        ciphertext: &[u8],
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Vec<u8>> {
        self.inner().decrypt_data(ciphertext, key, params)
    }

    fn generate_key(&self, params: &CipherParams) -> FencResult<KeyMaterial> {
        self.inner().generate_key(params)
    }

    fn encryptor(
        &self,
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Box<dyn ChunkTransform>> {
        self.inner().encryptor(key, params)
    }

    fn decryptor(
        &self,
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Box<dyn ChunkTransform>> {
        self.inner().decryptor(key, params)
    }

    fn encrypt_file(
        &self,
        input: &Path,
        output: &Path,
        key: &KeyMaterial,
        params: &CipherParams,
        options: &mut StreamOptions<'_>,
    ) -> FencResult<u64> {
        self.inner().encrypt_file(input, output, key, params, options)
    }

    fn decrypt_file(
        &self,
        input: &Path,
        output: &Path,
        key: &KeyMaterial,
        params: &CipherParams,
        options: &mut StreamOptions<'_>,
    ) -> FencResult<u64> {
        self.inner().decrypt_file(input, output, key, params, options)
    }
}

impl fmt::Debug for AnyCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnyCipher").field(&self.algorithm().name()).finish()
    }
}

pub type Constructor = Arc<dyn Fn() -> FencResult<AnyCipher> + Send + Sync>;

/// Algorithm names grouped for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryGroups {
    pub symmetric: Vec<String>,
    pub asymmetric: Vec<String>,
    /// AEAD and anything else
    pub other: Vec<String>,
}

#[derive(Clone)]
pub struct CipherRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl CipherRegistry {
    /// Registry with the built-in AES, RSA and ChaCha20-Poly1305 ciphers.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        for bits in AES_KEY_SIZES {
            for mode in AesMode::ALL {
                registry.register(format!("AES-{bits}-{mode}"), move || {
                    AesCipher::new(bits, mode).map(AnyCipher::Aes)
                });
            }
        }
        for bits in RSA_KEY_SIZES {
            registry.register(format!("RSA-{bits}"), move || {
                RsaCipher::new(bits).map(AnyCipher::Rsa)
            });
        }
        registry.register(CHACHA_NAME, || Ok(AnyCipher::ChaCha(ChaChaCipher::new())));
        registry
    }

    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Add or replace a constructor. Later registrations win.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> FencResult<AnyCipher> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.constructors.insert(name.clone(), Arc::new(constructor)).is_some() {
            tracing::debug!(algorithm = %name, "replaced cipher constructor");
        }
    }

    /// Build a fresh cipher instance for `name`.
    pub fn create(&self, name: &str) -> FencResult<AnyCipher> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| FencError::UnsupportedAlgorithm(name.to_string()))?;
        constructor()
    }

    /// The algorithm descriptor for `name`.
    pub fn describe(&self, name: &str) -> FencResult<CipherAlgorithm> {
        Ok(self.create(name)?.algorithm().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    pub fn group_by_category(&self) -> CategoryGroups {
        let mut groups = CategoryGroups::default();
        for name in self.constructors.keys() {
            let category = match self.describe(name) {
                Ok(algorithm) => algorithm.category(),
                Err(e) => {
                    tracing::warn!(algorithm = %name, error = %e, "constructor failed; skipping");
                    continue;
                }
            };
            match category {
                CipherCategory::Symmetric => groups.symmetric.push(name.clone()),
                CipherCategory::Asymmetric => groups.asymmetric.push(name.clone()),
                CipherCategory::Aead => groups.other.push(name.clone()),
            }
        }
        groups
    }
}

impl Default for CipherRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl fmt::Debug for CipherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherRegistry")
            .field("algorithms", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}
