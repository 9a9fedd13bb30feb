//! RSA-OAEP(SHA-256) and the hybrid file envelope.
//!
//! Envelope format (binary):
//! ```text
//! [4 bytes: wrapped length, big-endian][wrapped session][AES-256-CBC stream]
//! wrapped session = RSA-OAEP-SHA256(public key, session_key (32) || iv (16))
//! ```
//!
//! The envelope is produced and consumed in a single pass: the header goes
//! out with the first ciphertext bytes and the opener buffers only until the
//! wrapped session is complete.

use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroizing;

use fenc_core::{Direction, FencError, FencResult};

use crate::aes::AesStream;
use crate::algorithm::{AesMode, CipherAlgorithm, CipherCategory};
use crate::cipher::{ChunkTransform, Cipher, CipherParams};
use crate::material::KeyMaterial;
use crate::{IV_SIZE, KEY_SIZE};

/// Smallest modulus accepted by `RsaCipher::new`
pub const MIN_RSA_BITS: u32 = 1024;

/// OAEP-SHA256 overhead: two hash lengths plus two bytes
const OAEP_OVERHEAD: usize = 2 * 32 + 2;

const SESSION_LEN: usize = KEY_SIZE + IV_SIZE;

pub struct RsaCipher {
    algorithm: CipherAlgorithm,
}

impl RsaCipher {
    pub fn new(key_bits: u32) -> FencResult<Self> {
        if key_bits < MIN_RSA_BITS || key_bits % 8 != 0 {
            return Err(FencError::config(format!(
                "invalid RSA key size {key_bits}; must be a multiple of 8 and at least {MIN_RSA_BITS}"
            )));
        }
        Ok(Self {
            algorithm: CipherAlgorithm::new(
                format!("RSA-{key_bits}"),
                CipherCategory::Asymmetric,
                key_bits,
                None,
            ),
        })
    }

    /// Largest payload `encrypt_data` accepts for this key size.
    pub fn max_payload(&self) -> usize {
        self.algorithm.key_len() - OAEP_OVERHEAD
    }

    /// Build key material from PEM text.
    ///
    /// A private half alone is enough: the public half is derived from it.
    /// An encrypted PKCS#8 private key needs `passphrase` so it can be checked.
    pub fn load_key(
        &self,
        public_pem: Option<&str>,
        private_pem: Option<&str>,
        passphrase: Option<&SecretString>,
    ) -> FencResult<KeyMaterial> {
        let (public, private) = match (public_pem, private_pem) {
            (None, None) => {
                return Err(FencError::input("either a public or a private key is required"))
            }
            (Some(pem), None) => (parse_public(pem)?, None),
            (public, Some(pem)) => {
                let private = parse_private(pem, passphrase)?;
                let derived = RsaPublicKey::from(&private);
                if let Some(public) = public {
                    if parse_public(public)? != derived {
                        return Err(FencError::input("public and private keys do not form a pair"));
                    }
                }
                (derived, Some(pem))
            }
        };

        let bits = public.size() * 8;
        if bits != self.algorithm.key_bits() as usize {
            return Err(FencError::input(format!(
                "{} expects a {}-bit key, got {bits} bits",
                self.algorithm,
                self.algorithm.key_bits()
            )));
        }

        let public_pem = match public_pem {
            Some(pem) => pem.to_string(),
            None => encode_public(&public)?,
        };
        Ok(KeyMaterial::key_pair(
            &self.algorithm,
            Some(public_pem),
            private.map(|p| Zeroizing::new(p.to_string())),
            private.map(is_encrypted_pem).unwrap_or(false),
        ))
    }

    fn public_key(&self, key: &KeyMaterial, params: &CipherParams) -> FencResult<RsaPublicKey> {
        match (&key.public_pem, &key.private_pem) {
            (Some(pem), _) => parse_public(pem),
            (None, Some(pem)) => {
                Ok(RsaPublicKey::from(&parse_private(pem, params.passphrase.as_ref())?))
            }
            (None, None) => Err(FencError::input(format!(
                "{} key material has no public key",
                self.algorithm
            ))),
        }
    }

    fn private_key(&self, key: &KeyMaterial, params: &CipherParams) -> FencResult<RsaPrivateKey> {
        let pem = key.private_pem.as_ref().ok_or_else(|| {
            FencError::input(format!("{} decryption requires the private key", self.algorithm))
        })?;
        parse_private(pem, params.passphrase.as_ref())
    }
}

impl Cipher for RsaCipher {
    fn algorithm(&self) -> &CipherAlgorithm {
        &self.algorithm
    }

    fn encrypt_data(
        &self,
        plaintext: &[u8],
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Vec<u8>> {
        let public = self.public_key(key, params)?;
        let limit = public.size().saturating_sub(OAEP_OVERHEAD);
        if plaintext.len() > limit {
            return Err(FencError::input(format!(
                "payload of {} bytes exceeds the {limit}-byte OAEP limit for {}; use file encryption",
                plaintext.len(),
                self.algorithm
            )));
        }
        public
            .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| FencError::input(format!("RSA encryption failed: {e}")))
    }

    fn decrypt_data(
        &self,
        ciphertext: &[u8],
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Vec<u8>> {
        let private = self.private_key(key, params)?;
        private
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|_| {
                FencError::Decryption("RSA-OAEP unwrap failed: wrong private key or corrupted data".into())
            })
    }

    fn generate_key(&self, params: &CipherParams) -> FencResult<KeyMaterial> {
        let bits = self.algorithm.key_bits() as usize;
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| FencError::config(format!("RSA-{bits} key generation failed: {e}")))?;
        let public_pem = encode_public(&RsaPublicKey::from(&private))?;

        let (private_pem, encrypted) = match &params.passphrase {
            Some(pass) => (
                private
                    .to_pkcs8_encrypted_pem(&mut rng, pass.expose_secret().as_bytes(), LineEnding::LF)
                    .map_err(|e| FencError::input(format!("private key encryption failed: {e}")))?,
                true,
            ),
            None => (
                private
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|e| FencError::input(format!("private key encoding failed: {e}")))?,
                false,
            ),
        };

        tracing::debug!(bits, encrypted, "generated RSA key pair");
        Ok(KeyMaterial::key_pair(
            &self.algorithm,
            Some(public_pem),
            Some(private_pem),
            encrypted,
        ))
    }

    fn encryptor(
        &self,
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Box<dyn ChunkTransform>> {
        let public = self.public_key(key, params)?;
        let mut rng = rand::thread_rng();
        let mut session = Zeroizing::new([0u8; SESSION_LEN]);
        rng.fill_bytes(&mut session[..]);

        let wrapped = public
            .encrypt(&mut rng, Oaep::new::<Sha256>(), &session[..])
            .map_err(|e| FencError::input(format!("session key wrapping failed: {e}")))?;
        let wrapped_len = u32::try_from(wrapped.len())
            .map_err(|_| FencError::input("wrapped session key too large"))?;

        let mut header = Vec::with_capacity(4 + wrapped.len());
        header.extend_from_slice(&wrapped_len.to_be_bytes());
        header.extend_from_slice(&wrapped);

        let (session_key, iv) = session.split_at(KEY_SIZE);
        Ok(Box::new(EnvelopeSealer {
            header: Some(header),
            body: AesStream::new(256, AesMode::Cbc, Direction::Encrypt, session_key, iv)?,
        }))
    }

    fn decryptor(
        &self,
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Box<dyn ChunkTransform>> {
        Ok(Box::new(EnvelopeOpener::Header {
            private: Box::new(self.private_key(key, params)?),
            buf: Vec::new(),
        }))
    }
}

struct EnvelopeSealer {
    header: Option<Vec<u8>>,
    body: AesStream,
}

impl ChunkTransform for EnvelopeSealer {
    fn update(&mut self, chunk: &[u8]) -> FencResult<Vec<u8>> {
        let mut out = self.header.take().unwrap_or_default();
        out.extend(self.body.process(chunk)?);
        Ok(out)
    }

    fn finish(self: Box<Self>) -> FencResult<Vec<u8>> {
        let EnvelopeSealer { header, body } = *self;
        let mut out = header.unwrap_or_default();
        out.extend(body.finalize()?);
        Ok(out)
    }
}

enum EnvelopeOpener {
    Header {
        private: Box<RsaPrivateKey>,
        buf: Vec<u8>,
    },
    Body(AesStream),
}

impl EnvelopeOpener {
    /// Try to complete the header; returns the body stream plus leftover ciphertext.
    fn unwrap_session(
        private: &RsaPrivateKey,
        buf: &[u8],
    ) -> FencResult<Option<(AesStream, usize)>> {
        let Some(len_bytes) = buf.get(..4) else {
            return Ok(None);
        };
        let mut be = [0u8; 4];
        be.copy_from_slice(len_bytes);
        let wrapped_len = u32::from_be_bytes(be) as usize;
        if wrapped_len != private.size() {
            return Err(FencError::Decryption(format!(
                "envelope holds a {wrapped_len}-byte session block, key expects {}",
                private.size()
            )));
        }
        let Some(wrapped) = buf.get(4..4 + wrapped_len) else {
            return Ok(None);
        };

        let session = Zeroizing::new(
            private
                .decrypt(Oaep::new::<Sha256>(), wrapped)
                .map_err(|_| {
                    FencError::Decryption("session key unwrap failed: wrong private key or corrupted data".into())
                })?,
        );
        if session.len() != SESSION_LEN {
            return Err(FencError::Decryption(format!(
                "session block is {} bytes, expected {SESSION_LEN}",
                session.len()
            )));
        }
        let (key, iv) = session.split_at(KEY_SIZE);
        let body = AesStream::new(256, AesMode::Cbc, Direction::Decrypt, key, iv)?;
        Ok(Some((body, 4 + wrapped_len)))
    }
}

impl ChunkTransform for EnvelopeOpener {
    fn update(&mut self, chunk: &[u8]) -> FencResult<Vec<u8>> {
        match self {
            EnvelopeOpener::Body(body) => body.process(chunk),
            EnvelopeOpener::Header { private, buf } => {
                buf.extend_from_slice(chunk);
                match Self::unwrap_session(private, buf)? {
                    None => Ok(Vec::new()),
                    Some((mut body, consumed)) => {
                        let out = body.process(&buf[consumed..])?;
                        *self = EnvelopeOpener::Body(body);
                        Ok(out)
                    }
                }
            }
        }
    }

    fn finish(self: Box<Self>) -> FencResult<Vec<u8>> {
        match *self {
            EnvelopeOpener::Body(body) => body.finalize(),
            EnvelopeOpener::Header { .. } => {
                Err(FencError::Decryption("envelope header is truncated".into()))
            }
        }
    }
}

fn encode_public(public: &RsaPublicKey) -> FencResult<String> {
    public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| FencError::input(format!("public key encoding failed: {e}")))
}

fn is_encrypted_pem(pem: &str) -> bool {
    pem.contains("BEGIN ENCRYPTED PRIVATE KEY")
}

fn parse_public(pem: &str) -> FencResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| FencError::input(format!("invalid RSA public key: {e}")))
}

fn parse_private(pem: &str, passphrase: Option<&SecretString>) -> FencResult<RsaPrivateKey> {
    if is_encrypted_pem(pem) {
        let pass = passphrase.ok_or_else(|| {
            FencError::input("RSA private key is passphrase-protected; a passphrase is required")
        })?;
        return RsaPrivateKey::from_pkcs8_encrypted_pem(pem, pass.expose_secret().as_bytes())
            .map_err(|_| {
                FencError::Decryption("cannot open RSA private key: wrong passphrase or corrupted key".into())
            });
    }
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| FencError::input(format!("invalid RSA private key: {e}")))
}
