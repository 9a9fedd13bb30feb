//! The cipher contract shared by every registered algorithm.

use secrecy::SecretString;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::AtomicBool;

use fenc_core::config::DEFAULT_CHUNK_SIZE;
use fenc_core::FencResult;

use crate::algorithm::CipherAlgorithm;
use crate::material::KeyMaterial;
use crate::stream;

/// Per-call options that are not part of the key material.
#[derive(Clone, Default)]
pub struct CipherParams {
    /// Overrides the IV stored in the key material (AES only)
    pub iv: Option<Vec<u8>>,
    /// Authenticated but unencrypted context (ChaCha20-Poly1305 only)
    pub associated_data: Option<Vec<u8>>,
    /// Passphrase protecting an RSA private key at rest
    pub passphrase: Option<SecretString>,
}

impl CipherParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_iv(mut self, iv: impl Into<Vec<u8>>) -> Self {
        self.iv = Some(iv.into());
        self
    }

    pub fn with_associated_data(mut self, aad: impl Into<Vec<u8>>) -> Self {
        self.associated_data = Some(aad.into());
        self
    }

    pub fn with_passphrase(mut self, passphrase: SecretString) -> Self {
        self.passphrase = Some(passphrase);
        self
    }

    pub(crate) fn aad(&self) -> &[u8] {
        self.associated_data.as_deref().unwrap_or_default()
    }
}

impl std::fmt::Debug for CipherParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherParams")
            .field("iv", &self.iv.as_ref().map(hex::encode))
            .field("associated_data", &self.associated_data.as_ref().map(|a| a.len()))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Progress callback: cumulative percentage of input consumed (0.0..=100.0)
pub type ProgressFn<'a> = &'a mut dyn FnMut(f64);

/// Chunking, progress and cancellation for streaming operations.
pub struct StreamOptions<'a> {
    /// Bytes read from the input per iteration
    pub chunk_size: usize,
    /// Invoked after every chunk
    pub progress: Option<ProgressFn<'a>>,
    /// Checked before every chunk; when set the operation stops with `Cancelled`
    pub cancel: Option<&'a AtomicBool>,
}

impl Default for StreamOptions<'_> {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress: None,
            cancel: None,
        }
    }
}

impl<'a> StreamOptions<'a> {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Stateful transform owned by exactly one streaming operation.
///
/// Chaining state (CBC IV, keystream position, frame counter) lives here and
/// is carried across `update` calls. `finish` consumes the transform, so
/// state can never be reused after the stream ends or is abandoned.
pub trait ChunkTransform: Send {
    fn update(&mut self, chunk: &[u8]) -> FencResult<Vec<u8>>;
    fn finish(self: Box<Self>) -> FencResult<Vec<u8>>;
}

/// The five-operation cipher contract.
///
/// Instances are `Send` but not `Sync`: build one instance per concurrent
/// operation.
pub trait Cipher: Send {
    fn algorithm(&self) -> &CipherAlgorithm;

    fn encrypt_data(
        &self,
        plaintext: &[u8],
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Vec<u8>>;

    /// Fails with `IntegrityError` (AEAD tag / CBC padding) or
    /// `DecryptionError` (RSA) rather than returning wrong plaintext.
    fn decrypt_data(
        &self,
        ciphertext: &[u8],
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Vec<u8>>;

    fn generate_key(&self, params: &CipherParams) -> FencResult<KeyMaterial>;

    fn encryptor(
        &self,
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Box<dyn ChunkTransform>>;

    fn decryptor(
        &self,
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Box<dyn ChunkTransform>>;

    /// Encrypt everything `reader` yields into `writer`. `total` is the input
    /// length used for progress, when known. Returns bytes written.
    fn encrypt_stream(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        total: Option<u64>,
        key: &KeyMaterial,
        params: &CipherParams,
        options: &mut StreamOptions<'_>,
    ) -> FencResult<u64> {
        let transform = self.encryptor(key, params)?;
        stream::pump(reader, writer, total, transform, options)
    }

    fn decrypt_stream(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        total: Option<u64>,
        key: &KeyMaterial,
        params: &CipherParams,
        options: &mut StreamOptions<'_>,
    ) -> FencResult<u64> {
        let transform = self.decryptor(key, params)?;
        stream::pump(reader, writer, total, transform, options)
    }

    fn encrypt_file(
        &self,
        input: &Path,
        output: &Path,
        key: &KeyMaterial,
        params: &CipherParams,
        options: &mut StreamOptions<'_>,
    ) -> FencResult<u64> {
        let transform = self.encryptor(key, params)?;
        let written = stream::transform_file(input, output, transform, options)?;
        tracing::debug!(
            algorithm = %self.algorithm(),
            input = %input.display(),
            output = %output.display(),
            written,
            "file encrypted"
        );
        Ok(written)
    }

    fn decrypt_file(
        &self,
        input: &Path,
        output: &Path,
        key: &KeyMaterial,
        params: &CipherParams,
        options: &mut StreamOptions<'_>,
    ) -> FencResult<u64> {
        let transform = self.decryptor(key, params)?;
        let written = stream::transform_file(input, output, transform, options)?;
        tracing::debug!(
            algorithm = %self.algorithm(),
            input = %input.display(),
            output = %output.display(),
            written,
            "file decrypted"
        );
        Ok(written)
    }
}
