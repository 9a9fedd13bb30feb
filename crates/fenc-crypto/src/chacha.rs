//! ChaCha20-Poly1305 AEAD.
//!
//! One-shot format (`encrypt_data`):
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! AAD = caller associated data (may be empty)
//! ```
//!
//! File format: the plaintext is cut into `FRAME_LEN` frames, each sealed in
//! the one-shot format with
//! ```text
//! AAD = caller associated data || frame_index (8 bytes, big-endian) || final (1 byte)
//! ```
//! The last frame (possibly empty) is the only one with `final = 1`, so
//! dropping, reordering or appending frames fails authentication.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use fenc_core::{FencError, FencResult};

use crate::algorithm::{CipherAlgorithm, CipherCategory};
use crate::cipher::{ChunkTransform, Cipher, CipherParams};
use crate::material::KeyMaterial;
use crate::{CHACHA_NONCE_SIZE, KEY_SIZE, TAG_SIZE};

pub const CHACHA_NAME: &str = "ChaCha20-Poly1305";

/// Plaintext bytes per sealed frame in the file format
pub const FRAME_LEN: usize = 4096;

const SEALED_FRAME_LEN: usize = CHACHA_NONCE_SIZE + FRAME_LEN + TAG_SIZE;
const OVERHEAD: usize = CHACHA_NONCE_SIZE + TAG_SIZE;

pub struct ChaChaCipher {
    algorithm: CipherAlgorithm,
}

impl ChaChaCipher {
    pub fn new() -> Self {
        Self {
            algorithm: CipherAlgorithm::new(CHACHA_NAME, CipherCategory::Aead, 256, None),
        }
    }

    fn aead(&self, key: &KeyMaterial) -> FencResult<ChaCha20Poly1305> {
        let secret = key.secret()?;
        if secret.len() != KEY_SIZE {
            return Err(FencError::input(format!(
                "key length mismatch: {CHACHA_NAME} requires a 256-bit key, got {} bits",
                secret.len() * 8
            )));
        }
        ChaCha20Poly1305::new_from_slice(secret)
            .map_err(|_| FencError::input("invalid ChaCha20-Poly1305 key"))
    }
}

impl Default for ChaChaCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl Cipher for ChaChaCipher {
    fn algorithm(&self) -> &CipherAlgorithm {
        &self.algorithm
    }

    fn encrypt_data(
        &self,
        plaintext: &[u8],
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Vec<u8>> {
        seal(&self.aead(key)?, plaintext, params.aad())
    }

    fn decrypt_data(
        &self,
        ciphertext: &[u8],
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Vec<u8>> {
        open(&self.aead(key)?, ciphertext, params.aad())
    }

    fn generate_key(&self, _params: &CipherParams) -> FencResult<KeyMaterial> {
        let mut key = vec![0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        Ok(KeyMaterial::symmetric(&self.algorithm, key, None))
    }

    fn encryptor(
        &self,
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Box<dyn ChunkTransform>> {
        Ok(Box::new(FrameSealer {
            frames: Framer::new(self.aead(key)?, params.aad()),
            buf: Zeroizing::new(Vec::with_capacity(FRAME_LEN * 2)),
        }))
    }

    fn decryptor(
        &self,
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Box<dyn ChunkTransform>> {
        Ok(Box::new(FrameOpener {
            frames: Framer::new(self.aead(key)?, params.aad()),
            buf: Vec::with_capacity(SEALED_FRAME_LEN * 2),
        }))
    }
}

fn seal(aead: &ChaCha20Poly1305, plaintext: &[u8], aad: &[u8]) -> FencResult<Vec<u8>> {
    let mut nonce_bytes = [0u8; CHACHA_NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = aead
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| FencError::input(format!("ChaCha20-Poly1305 encryption failed: {e}")))?;

    let mut result = Vec::with_capacity(CHACHA_NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

fn open(aead: &ChaCha20Poly1305, sealed: &[u8], aad: &[u8]) -> FencResult<Vec<u8>> {
    if sealed.len() < OVERHEAD {
        return Err(FencError::Integrity);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(CHACHA_NONCE_SIZE);
    aead.decrypt(Nonce::from_slice(nonce_bytes), Payload { msg: ciphertext, aad })
        .map_err(|_| FencError::Integrity)
}

/// Frame counter plus AAD construction shared by both directions.
struct Framer {
    aead: ChaCha20Poly1305,
    aad: Vec<u8>,
    prefix_len: usize,
    index: u64,
}

impl Framer {
    fn new(aead: ChaCha20Poly1305, user_aad: &[u8]) -> Self {
        let mut aad = Vec::with_capacity(user_aad.len() + 9);
        aad.extend_from_slice(user_aad);
        Self {
            aead,
            prefix_len: user_aad.len(),
            aad,
            index: 0,
        }
    }

    fn advance(&mut self, last: bool) -> FencResult<()> {
        self.aad.truncate(self.prefix_len);
        self.aad.extend_from_slice(&self.index.to_be_bytes());
        self.aad.push(u8::from(last));
        self.index = self
            .index
            .checked_add(1)
            .ok_or_else(|| FencError::input("frame counter overflow"))?;
        Ok(())
    }

    fn seal(&mut self, frame: &[u8], last: bool) -> FencResult<Vec<u8>> {
        self.advance(last)?;
        seal(&self.aead, frame, &self.aad)
    }

    fn open(&mut self, frame: &[u8], last: bool) -> FencResult<Vec<u8>> {
        self.advance(last)?;
        open(&self.aead, frame, &self.aad)
    }
}

struct FrameSealer {
    frames: Framer,
    buf: Zeroizing<Vec<u8>>,
}

impl ChunkTransform for FrameSealer {
    fn update(&mut self, chunk: &[u8]) -> FencResult<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        // A full frame stays buffered until more input proves it is not the last.
        while self.buf.len() > FRAME_LEN {
            out.extend(self.frames.seal(&self.buf[..FRAME_LEN], false)?);
            self.buf.drain(..FRAME_LEN);
        }
        Ok(out)
    }

    fn finish(mut self: Box<Self>) -> FencResult<Vec<u8>> {
        let tail = Zeroizing::new(std::mem::take(&mut *self.buf));
        self.frames.seal(&tail, true)
    }
}

struct FrameOpener {
    frames: Framer,
    buf: Vec<u8>,
}

impl ChunkTransform for FrameOpener {
    fn update(&mut self, chunk: &[u8]) -> FencResult<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while self.buf.len() > SEALED_FRAME_LEN {
            out.extend(self.frames.open(&self.buf[..SEALED_FRAME_LEN], false)?);
            self.buf.drain(..SEALED_FRAME_LEN);
        }
        Ok(out)
    }

    fn finish(mut self: Box<Self>) -> FencResult<Vec<u8>> {
        let tail = std::mem::take(&mut self.buf);
        self.frames.open(&tail, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::StreamOptions;
    use crate::stream::pump;
    use std::io::Cursor;

    fn setup() -> (ChaChaCipher, KeyMaterial) {
        let c = ChaChaCipher::new();
        let k = c.generate_key(&CipherParams::default()).unwrap();
        (c, k)
    }

    fn framed(c: &ChaChaCipher, k: &KeyMaterial, data: &[u8], chunk: usize) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();
        let mut opts = StreamOptions::default().with_chunk_size(chunk);
        c.encrypt_stream(&mut Cursor::new(data), &mut out, None, k, &CipherParams::default(), &mut opts)
            .unwrap();
        out
    }

    fn unframed(c: &ChaChaCipher, k: &KeyMaterial, data: &[u8]) -> FencResult<Vec<u8>> {
        let mut out: Vec<u8> = Vec::new();
        let t = c.decryptor(k, &CipherParams::default())?;
        pump(&mut Cursor::new(data), &mut out, None, t, &mut StreamOptions::default())?;
        Ok(out)
    }

    #[test]
    fn test_one_shot_layout() {
        let (c, k) = setup();
        let ct = c.encrypt_data(b"hello", &k, &CipherParams::default()).unwrap();
        assert_eq!(ct.len(), CHACHA_NONCE_SIZE + 5 + TAG_SIZE);
    }

    #[test]
    fn test_nonce_is_fresh() {
        let (c, k) = setup();
        let a = c.encrypt_data(b"same", &k, &CipherParams::default()).unwrap();
        let b = c.encrypt_data(b"same", &k, &CipherParams::default()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_associated_data_must_match() {
        let (c, k) = setup();
        let p = CipherParams::default().with_associated_data(b"header".to_vec());
        let ct = c.encrypt_data(b"body", &k, &p).unwrap();
        assert_eq!(c.decrypt_data(&ct, &k, &p).unwrap(), b"body");
        let err = c.decrypt_data(&ct, &k, &CipherParams::default()).unwrap_err();
        assert!(matches!(err, FencError::Integrity));
    }

    #[test]
    fn test_short_input_is_integrity_error() {
        let (c, k) = setup();
        let err = c.decrypt_data(&[0u8; 27], &k, &CipherParams::default()).unwrap_err();
        assert!(matches!(err, FencError::Integrity));
    }

    #[test]
    fn test_frames_independent_of_read_size() {
        let (c, k) = setup();
        let data = vec![3u8; FRAME_LEN * 2 + 100];
        for chunk in [1usize, 100, FRAME_LEN, FRAME_LEN * 3] {
            let ct = framed(&c, &k, &data, chunk);
            assert_eq!(ct.len(), data.len() + 3 * OVERHEAD);
            assert_eq!(unframed(&c, &k, &ct).unwrap(), data);
        }
    }

    #[test]
    fn test_exact_frame_multiple_has_no_empty_trailer() {
        let (c, k) = setup();
        let data = vec![1u8; FRAME_LEN * 2];
        let ct = framed(&c, &k, &data, 1000);
        assert_eq!(ct.len(), data.len() + 2 * OVERHEAD);
        assert_eq!(unframed(&c, &k, &ct).unwrap(), data);
    }

    #[test]
    fn test_empty_file_is_one_empty_frame() {
        let (c, k) = setup();
        let ct = framed(&c, &k, b"", 4096);
        assert_eq!(ct.len(), OVERHEAD);
        assert!(unframed(&c, &k, &ct).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_stream_detected() {
        let (c, k) = setup();
        let data = vec![9u8; FRAME_LEN * 2 + 1];
        let ct = framed(&c, &k, &data, 4096);
        // Drop the final frame: the new last frame was sealed with final = 0.
        let cut = &ct[..2 * SEALED_FRAME_LEN];
        assert!(matches!(unframed(&c, &k, cut), Err(FencError::Integrity)));
    }

    #[test]
    fn test_reordered_frames_detected() {
        let (c, k) = setup();
        let data: Vec<u8> = (0..FRAME_LEN * 3).map(|i| i as u8).collect();
        let ct = framed(&c, &k, &data, 4096);
        let mut swapped = Vec::new();
        swapped.extend_from_slice(&ct[SEALED_FRAME_LEN..2 * SEALED_FRAME_LEN]);
        swapped.extend_from_slice(&ct[..SEALED_FRAME_LEN]);
        swapped.extend_from_slice(&ct[2 * SEALED_FRAME_LEN..]);
        assert!(matches!(unframed(&c, &k, &swapped), Err(FencError::Integrity)));
    }
}
