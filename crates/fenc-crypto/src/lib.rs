//! fenc-crypto: the cipher engine behind fenc
//!
//! Ciphers: AES-{128,192,256} in CBC/CFB/OFB/CTR, ChaCha20-Poly1305, and an
//! RSA-OAEP hybrid envelope over AES-256-CBC. Every cipher implements the
//! `Cipher` trait and streams files through a per-operation `ChunkTransform`,
//! so memory stays bounded by the chunk size.
//!
//! Key record protection:
//! ```text
//! password ──PBKDF2-HMAC-SHA256(salt, iterations)──▶ wrapping key (256-bit)
//!   └── XChaCha20-Poly1305(nonce=random_192bit, AAD=record header) ──▶ wrapped record
//! ```

pub mod aes;
pub mod algorithm;
pub mod chacha;
pub mod cipher;
pub mod hash;
pub mod kdf;
pub mod material;
pub mod registry;
pub mod rsa;
pub mod stream;
pub mod wrap;

pub use crate::aes::{AesCipher, AesStream};
pub use crate::rsa::RsaCipher;
pub use algorithm::{AesMode, CipherAlgorithm, CipherCategory};
pub use chacha::ChaChaCipher;
pub use cipher::{ChunkTransform, Cipher, CipherParams, StreamOptions};
pub use hash::{hash_data, hash_file, hash_reader, verify_file_hash, DigestSink, HashAlgorithm};
pub use kdf::{derive_wrapping_key, generate_salt, WrappingKey};
pub use material::KeyMaterial;
pub use registry::{AnyCipher, CategoryGroups, CipherRegistry};

/// Size of a 256-bit symmetric key in bytes
pub const KEY_SIZE: usize = 32;

/// AES block / IV size
pub const IV_SIZE: usize = 16;

/// ChaCha20-Poly1305 nonce (96-bit)
pub const CHACHA_NONCE_SIZE: usize = 12;

/// XChaCha20-Poly1305 nonce (192-bit)
pub const XNONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// PBKDF2 salt size
pub const SALT_SIZE: usize = 16;
