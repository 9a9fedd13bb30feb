//! AES-128/192/256 in CBC, CFB, OFB and CTR modes.
//!
//! CBC pads with PKCS#7 exactly once, at the end of the stream. The other
//! modes run AES as a keystream and need no padding.
//!
//! None of these modes authenticate: a flipped ciphertext bit in CFB, OFB or
//! CTR yields silently corrupted plaintext, and CBC only notices when the
//! final padding block is hit.
//!
//! The IV is generated with the key and stored in its record, so every file
//! encrypted under one key starts from the same IV. For CTR and OFB that
//! repeats the keystream: XOR of two ciphertexts is the XOR of their
//! plaintexts. CBC and CFB leak whether two files share a prefix. Callers that
//! reuse a key across files should pass a fresh IV through
//! [`CipherParams::with_iv`] and keep it alongside the ciphertext, or use
//! ChaCha20-Poly1305, which draws a new nonce per file.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use rand::RngCore;
use subtle::{ConstantTimeEq, ConstantTimeGreater};

use fenc_core::{Direction, FencError, FencResult};

use crate::algorithm::{AesMode, CipherAlgorithm, CipherCategory};
use crate::cipher::{ChunkTransform, Cipher, CipherParams};
use crate::material::KeyMaterial;
use crate::IV_SIZE;

const BLOCK: usize = 16;

/// Expands `$body` once per AES key size with `$aes` bound to the block cipher type.
macro_rules! with_aes {
    ($bits:expr, $aes:ident => $body:expr) => {
        match $bits {
            128 => {
                type $aes = aes::Aes128;
                $body
            }
            192 => {
                type $aes = aes::Aes192;
                $body
            }
            256 => {
                type $aes = aes::Aes256;
                $body
            }
            other => Err(FencError::config(format!("unsupported AES key size: {other}"))),
        }
    };
}

/// One AES mode of operation at one key size.
pub struct AesCipher {
    algorithm: CipherAlgorithm,
}

impl AesCipher {
    pub fn new(key_bits: u32, mode: AesMode) -> FencResult<Self> {
        if !matches!(key_bits, 128 | 192 | 256) {
            return Err(FencError::config(format!(
                "invalid AES key size {key_bits}; expected 128, 192 or 256"
            )));
        }
        Ok(Self {
            algorithm: CipherAlgorithm::new(
                format!("AES-{key_bits}-{mode}"),
                CipherCategory::Symmetric,
                key_bits,
                Some(mode),
            ),
        })
    }

    pub fn mode(&self) -> AesMode {
        // Always set by `new`.
        self.algorithm.mode().unwrap_or(AesMode::Cbc)
    }

    fn stream(
        &self,
        key: &KeyMaterial,
        params: &CipherParams,
        direction: Direction,
    ) -> FencResult<AesStream> {
        let secret = key.secret()?;
        if secret.len() != self.algorithm.key_len() {
            return Err(FencError::input(format!(
                "key length mismatch: {} requires a {}-bit key, got {} bits",
                self.algorithm,
                self.algorithm.key_bits(),
                secret.len() * 8
            )));
        }
        let iv = params
            .iv
            .as_deref()
            .or(key.iv.as_deref())
            .ok_or_else(|| FencError::input(format!("{} requires an IV", self.algorithm)))?;

        AesStream::new(self.algorithm.key_bits(), self.mode(), direction, secret, iv)
    }
}

impl Cipher for AesCipher {
    fn algorithm(&self) -> &CipherAlgorithm {
        &self.algorithm
    }

    fn encrypt_data(
        &self,
        plaintext: &[u8],
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Vec<u8>> {
        let mut stream = self.stream(key, params, Direction::Encrypt)?;
        let mut out = stream.process(plaintext)?;
        out.extend(stream.finalize()?);
        Ok(out)
    }

    fn decrypt_data(
        &self,
        ciphertext: &[u8],
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Vec<u8>> {
        let mut stream = self.stream(key, params, Direction::Decrypt)?;
        let mut out = stream.process(ciphertext)?;
        out.extend(stream.finalize()?);
        Ok(out)
    }

    fn generate_key(&self, _params: &CipherParams) -> FencResult<KeyMaterial> {
        let mut rng = rand::thread_rng();
        let mut key = vec![0u8; self.algorithm.key_len()];
        rng.fill_bytes(&mut key);
        let mut iv = vec![0u8; IV_SIZE];
        rng.fill_bytes(&mut iv);
        Ok(KeyMaterial::symmetric(&self.algorithm, key, Some(iv)))
    }

    fn encryptor(
        &self,
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Box<dyn ChunkTransform>> {
        Ok(Box::new(self.stream(key, params, Direction::Encrypt)?))
    }

    fn decryptor(
        &self,
        key: &KeyMaterial,
        params: &CipherParams,
    ) -> FencResult<Box<dyn ChunkTransform>> {
        Ok(Box::new(self.stream(key, params, Direction::Decrypt)?))
    }
}

/// Streaming AES state for exactly one file operation.
///
/// Feeding a file through `process` in chunks of any size produces the same
/// bytes as a single one-shot call; the CBC chaining value and keystream
/// position carry over between calls.
pub struct AesStream {
    engine: Engine,
}

enum Engine {
    CbcEncrypt {
        block: Box<dyn BlockStep>,
        pending: Vec<u8>,
    },
    CbcDecrypt {
        block: Box<dyn BlockStep>,
        held: Vec<u8>,
    },
    Keystream(Box<dyn Keystream>),
}

impl AesStream {
    pub fn new(
        key_bits: u32,
        mode: AesMode,
        direction: Direction,
        key: &[u8],
        iv: &[u8],
    ) -> FencResult<Self> {
        if iv.len() != IV_SIZE {
            return Err(FencError::input(format!(
                "IV must be {IV_SIZE} bytes, got {}",
                iv.len()
            )));
        }

        let engine = with_aes!(key_bits, A => Ok::<Engine, FencError>(match (mode, direction) {
            (AesMode::Cbc, Direction::Encrypt) => Engine::CbcEncrypt {
                block: Box::new(Enc(init::<cbc::Encryptor<A>>(key, iv)?)),
                pending: Vec::with_capacity(BLOCK),
            },
            (AesMode::Cbc, Direction::Decrypt) => Engine::CbcDecrypt {
                block: Box::new(Dec(init::<cbc::Decryptor<A>>(key, iv)?)),
                held: Vec::with_capacity(BLOCK),
            },
            (AesMode::Cfb, Direction::Encrypt) => {
                Engine::Keystream(Box::new(CfbEnc(init::<cfb_mode::BufEncryptor<A>>(key, iv)?)))
            }
            (AesMode::Cfb, Direction::Decrypt) => {
                Engine::Keystream(Box::new(CfbDec(init::<cfb_mode::BufDecryptor<A>>(key, iv)?)))
            }
            (AesMode::Ofb, _) => Engine::Keystream(Box::new(Xor(init::<ofb::Ofb<A>>(key, iv)?))),
            (AesMode::Ctr, _) => {
                Engine::Keystream(Box::new(Xor(init::<ctr::Ctr128BE<A>>(key, iv)?)))
            }
        }))?;

        Ok(Self { engine })
    }

    /// Transform the next piece of the stream.
    pub fn process(&mut self, data: &[u8]) -> FencResult<Vec<u8>> {
        match &mut self.engine {
            Engine::CbcEncrypt { block, pending } => {
                pending.extend_from_slice(data);
                let ready = pending.len() - pending.len() % BLOCK;
                let mut out: Vec<u8> = pending.drain(..ready).collect();
                for b in out.chunks_exact_mut(BLOCK) {
                    block.step(b);
                }
                Ok(out)
            }
            Engine::CbcDecrypt { block, held } => {
                held.extend_from_slice(data);
                if held.len() <= BLOCK {
                    return Ok(Vec::new());
                }
                // Keep the last full block (or the misaligned tail) for `finalize`.
                let keep = match held.len() % BLOCK {
                    0 => BLOCK,
                    r => r,
                };
                let ready = held.len() - keep;
                let mut out: Vec<u8> = held.drain(..ready).collect();
                for b in out.chunks_exact_mut(BLOCK) {
                    block.step(b);
                }
                Ok(out)
            }
            Engine::Keystream(ks) => {
                let mut out = data.to_vec();
                ks.apply(&mut out);
                Ok(out)
            }
        }
    }

    /// Flush the stream: pad (CBC encrypt) or check and strip padding (CBC decrypt).
    pub fn finalize(self) -> FencResult<Vec<u8>> {
        match self.engine {
            Engine::CbcEncrypt { mut block, pending } => {
                let mut out = pkcs7_pad(&pending);
                for b in out.chunks_exact_mut(BLOCK) {
                    block.step(b);
                }
                Ok(out)
            }
            Engine::CbcDecrypt { mut block, mut held } => {
                if held.len() != BLOCK {
                    tracing::debug!(remaining = held.len(), "CBC ciphertext is not block aligned");
                    return Err(FencError::Integrity);
                }
                block.step(&mut held);
                let len = unpad(&held)?;
                held.truncate(len);
                Ok(held)
            }
            Engine::Keystream(_) => Ok(Vec::new()),
        }
    }
}

impl ChunkTransform for AesStream {
    fn update(&mut self, chunk: &[u8]) -> FencResult<Vec<u8>> {
        self.process(chunk)
    }

    fn finish(self: Box<Self>) -> FencResult<Vec<u8>> {
        (*self).finalize()
    }
}

fn init<T: KeyIvInit>(key: &[u8], iv: &[u8]) -> FencResult<T> {
    T::new_from_slices(key, iv).map_err(|_| FencError::input("invalid AES key or IV length"))
}

/// Single-block CBC step in either direction.
trait BlockStep: Send {
    fn step(&mut self, block: &mut [u8]);
}

struct Enc<T>(T);
struct Dec<T>(T);

impl<T: BlockEncryptMut + Send> BlockStep for Enc<T> {
    fn step(&mut self, block: &mut [u8]) {
        self.0.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

impl<T: BlockDecryptMut + Send> BlockStep for Dec<T> {
    fn step(&mut self, block: &mut [u8]) {
        self.0.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

/// In-place byte-granular transform (CFB, OFB, CTR).
trait Keystream: Send {
    fn apply(&mut self, data: &mut [u8]);
}

struct CfbEnc<C: BlockEncryptMut + BlockCipher>(cfb_mode::BufEncryptor<C>);
struct CfbDec<C: BlockEncryptMut + BlockCipher>(cfb_mode::BufDecryptor<C>);
struct Xor<S>(S);

impl<C: BlockEncryptMut + BlockCipher + Send> Keystream for CfbEnc<C> {
    fn apply(&mut self, data: &mut [u8]) {
        self.0.encrypt(data);
    }
}

impl<C: BlockEncryptMut + BlockCipher + Send> Keystream for CfbDec<C> {
    fn apply(&mut self, data: &mut [u8]) {
        self.0.decrypt(data);
    }
}

impl<S: StreamCipher + Send> Keystream for Xor<S> {
    fn apply(&mut self, data: &mut [u8]) {
        self.0.apply_keystream(data);
    }
}

/// PKCS#7 pad `tail` (shorter than one block) to a whole block.
fn pkcs7_pad(tail: &[u8]) -> Vec<u8> {
    let pad = BLOCK - tail.len() % BLOCK;
    let mut out = Vec::with_capacity(tail.len() + pad);
    out.extend_from_slice(tail);
    out.resize(tail.len() + pad, pad as u8);
    out
}

/// Length of the data in the final decrypted block, checked in constant time.
fn unpad(block: &[u8]) -> FencResult<usize> {
    let pad = block[BLOCK - 1];
    let mut valid = pad.ct_gt(&0) & !pad.ct_gt(&(BLOCK as u8));
    for (i, byte) in block.iter().enumerate() {
        let in_pad = !((BLOCK - i) as u8).ct_gt(&pad);
        valid &= !in_pad | byte.ct_eq(&pad);
    }
    if bool::from(valid) {
        Ok(BLOCK - pad as usize)
    } else {
        Err(FencError::Integrity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(bits: u32, mode: AesMode) -> (AesCipher, KeyMaterial) {
        let cipher = AesCipher::new(bits, mode).unwrap();
        let key = cipher.generate_key(&CipherParams::default()).unwrap();
        (cipher, key)
    }

    #[test]
    fn test_rejects_bad_key_size() {
        let err = AesCipher::new(512, AesMode::Cbc).err().unwrap();
        assert_eq!(err.kind(), fenc_core::ErrorKind::Configuration);
    }

    #[test]
    fn test_name_format() {
        let c = AesCipher::new(192, AesMode::Ofb).unwrap();
        assert_eq!(c.algorithm().name(), "AES-192-OFB");
    }

    #[test]
    fn test_generate_key_sizes() {
        for bits in [128, 192, 256] {
            let (_, key) = material(bits, AesMode::Ctr);
            assert_eq!(key.secret().unwrap().len() * 8, bits as usize);
            assert_eq!(key.iv.as_ref().unwrap().len(), IV_SIZE);
        }
    }

    #[test]
    fn test_cbc_padding_lengths() {
        let (cipher, key) = material(256, AesMode::Cbc);
        let p = CipherParams::default();
        assert_eq!(cipher.encrypt_data(b"", &key, &p).unwrap().len(), 16);
        assert_eq!(cipher.encrypt_data(&[0u8; 15], &key, &p).unwrap().len(), 16);
        assert_eq!(cipher.encrypt_data(&[0u8; 16], &key, &p).unwrap().len(), 32);
    }

    #[test]
    fn test_stream_modes_preserve_length() {
        for mode in [AesMode::Cfb, AesMode::Ofb, AesMode::Ctr] {
            let (cipher, key) = material(128, mode);
            let ct = cipher.encrypt_data(&[7u8; 37], &key, &CipherParams::default()).unwrap();
            assert_eq!(ct.len(), 37, "{mode}");
        }
    }

    #[test]
    fn test_all_modes_roundtrip() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 31) as u8).collect();
        for bits in [128, 192, 256] {
            for mode in AesMode::ALL {
                let (cipher, key) = material(bits, mode);
                let p = CipherParams::default();
                let ct = cipher.encrypt_data(&data, &key, &p).unwrap();
                assert_ne!(ct[..16], data[..16]);
                assert_eq!(cipher.decrypt_data(&ct, &key, &p).unwrap(), data);
            }
        }
    }

    #[test]
    fn test_chunked_equals_one_shot() {
        let data = vec![0x5Au8; 4099];
        for mode in AesMode::ALL {
            let (cipher, key) = material(256, mode);
            let p = CipherParams::default();
            let one_shot = cipher.encrypt_data(&data, &key, &p).unwrap();

            let mut stream = cipher.stream(&key, &p, Direction::Encrypt).unwrap();
            let mut chunked = Vec::new();
            for piece in data.chunks(7) {
                chunked.extend(stream.process(piece).unwrap());
            }
            chunked.extend(stream.finalize().unwrap());
            assert_eq!(chunked, one_shot, "{mode}");

            let mut stream = cipher.stream(&key, &p, Direction::Decrypt).unwrap();
            let mut plain = Vec::new();
            for piece in one_shot.chunks(13) {
                plain.extend(stream.process(piece).unwrap());
            }
            plain.extend(stream.finalize().unwrap());
            assert_eq!(plain, data, "{mode}");
        }
    }

    #[test]
    fn test_params_iv_overrides_key_iv() {
        let (cipher, key) = material(128, AesMode::Cbc);
        let other = CipherParams::default().with_iv(vec![9u8; 16]);
        let a = cipher.encrypt_data(b"same input", &key, &CipherParams::default()).unwrap();
        let b = cipher.encrypt_data(b"same input", &key, &other).unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt_data(&b, &key, &other).unwrap(), b"same input");
    }

    #[test]
    fn test_missing_iv_is_input_error() {
        let (cipher, mut key) = material(128, AesMode::Ctr);
        key.iv = None;
        let err = cipher.encrypt_data(b"x", &key, &CipherParams::default()).unwrap_err();
        assert_eq!(err.kind(), fenc_core::ErrorKind::Input);
    }

    #[test]
    fn test_wrong_key_length_is_input_error() {
        let (cipher, _) = material(256, AesMode::Cbc);
        let (_, short) = material(128, AesMode::Cbc);
        let err = cipher.encrypt_data(b"x", &short, &CipherParams::default()).unwrap_err();
        assert_eq!(err.kind(), fenc_core::ErrorKind::Input);
    }

    #[test]
    fn test_misaligned_cbc_is_integrity_error() {
        let (cipher, key) = material(256, AesMode::Cbc);
        let mut ct = cipher.encrypt_data(b"hello", &key, &CipherParams::default()).unwrap();
        ct.pop();
        let err = cipher.decrypt_data(&ct, &key, &CipherParams::default()).unwrap_err();
        assert!(matches!(err, FencError::Integrity));
    }

    #[test]
    fn test_unpad_checks_every_padding_byte() {
        let mut block = [0u8; 16];
        block[12..].copy_from_slice(&[4, 4, 4, 4]);
        assert_eq!(unpad(&block).unwrap(), 12);
        block[13] = 3;
        assert!(unpad(&block).is_err());
        assert!(unpad(&[0u8; 16]).is_err());
        assert!(unpad(&[17u8; 16]).is_err());
        assert_eq!(unpad(&[16u8; 16]).unwrap(), 0);
    }

    #[test]
    fn test_stored_iv_repeats_keystream_unless_overridden() {
        let (cipher, key) = material(128, AesMode::Ctr);
        let a = [0x11u8; 32];
        let b = [0x22u8; 32];
        let default = CipherParams::default();
        let ca = cipher.encrypt_data(&a, &key, &default).unwrap();
        let cb = cipher.encrypt_data(&b, &key, &default).unwrap();
        let xor_ct: Vec<u8> = ca.iter().zip(&cb).map(|(x, y)| x ^ y).collect();
        assert_eq!(xor_ct, vec![0x11 ^ 0x22; 32]);

        let fresh = CipherParams::default().with_iv([7u8; IV_SIZE]);
        let cb_fresh = cipher.encrypt_data(&b, &key, &fresh).unwrap();
        assert_ne!(cb_fresh, cb);
        assert_eq!(cipher.decrypt_data(&cb_fresh, &key, &fresh).unwrap(), b);
    }
}
