//! Streaming digests: MD5, SHA-1, SHA-2, SHA-3, BLAKE2 and BLAKE3.

use digest::DynDigest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use subtle::ConstantTimeEq;

use fenc_core::{FencError, FencResult};

use crate::cipher::StreamOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Sha3_256,
    Sha3_384,
    Sha3_512,
    Blake2b,
    Blake2s,
    Blake3,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 11] = [
        HashAlgorithm::Md5,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
        HashAlgorithm::Sha3_256,
        HashAlgorithm::Sha3_384,
        HashAlgorithm::Sha3_512,
        HashAlgorithm::Blake2b,
        HashAlgorithm::Blake2s,
        HashAlgorithm::Blake3,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha384 => "SHA384",
            HashAlgorithm::Sha512 => "SHA512",
            HashAlgorithm::Sha3_256 => "SHA3-256",
            HashAlgorithm::Sha3_384 => "SHA3-384",
            HashAlgorithm::Sha3_512 => "SHA3-512",
            HashAlgorithm::Blake2b => "BLAKE2b",
            HashAlgorithm::Blake2s => "BLAKE2s",
            HashAlgorithm::Blake3 => "BLAKE3",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5 (128-bit, broken; checksums only)",
            HashAlgorithm::Sha1 => "SHA-1 (160-bit, collision-prone)",
            HashAlgorithm::Sha256 => "SHA-256 (256-bit)",
            HashAlgorithm::Sha384 => "SHA-384 (384-bit)",
            HashAlgorithm::Sha512 => "SHA-512 (512-bit)",
            HashAlgorithm::Sha3_256 => "SHA3-256 (256-bit Keccak)",
            HashAlgorithm::Sha3_384 => "SHA3-384 (384-bit Keccak)",
            HashAlgorithm::Sha3_512 => "SHA3-512 (512-bit Keccak)",
            HashAlgorithm::Blake2b => "BLAKE2b (512-bit)",
            HashAlgorithm::Blake2s => "BLAKE2s (256-bit)",
            HashAlgorithm::Blake3 => "BLAKE3 (256-bit)",
        }
    }

    /// Digest length in bytes
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 | HashAlgorithm::Sha3_256 => 32,
            HashAlgorithm::Blake2s | HashAlgorithm::Blake3 => 32,
            HashAlgorithm::Sha384 | HashAlgorithm::Sha3_384 => 48,
            HashAlgorithm::Sha512 | HashAlgorithm::Sha3_512 | HashAlgorithm::Blake2b => 64,
        }
    }

    pub fn hasher(&self) -> StreamHasher {
        let digest: Box<dyn DynDigest + Send> = match self {
            HashAlgorithm::Md5 => Box::<md5::Md5>::default(),
            HashAlgorithm::Sha1 => Box::<sha1::Sha1>::default(),
            HashAlgorithm::Sha256 => Box::<sha2::Sha256>::default(),
            HashAlgorithm::Sha384 => Box::<sha2::Sha384>::default(),
            HashAlgorithm::Sha512 => Box::<sha2::Sha512>::default(),
            HashAlgorithm::Sha3_256 => Box::<sha3::Sha3_256>::default(),
            HashAlgorithm::Sha3_384 => Box::<sha3::Sha3_384>::default(),
            HashAlgorithm::Sha3_512 => Box::<sha3::Sha3_512>::default(),
            HashAlgorithm::Blake2b => Box::<blake2::Blake2b512>::default(),
            HashAlgorithm::Blake2s => Box::<blake2::Blake2s256>::default(),
            HashAlgorithm::Blake3 => return StreamHasher::Blake3(Box::default()),
        };
        StreamHasher::Digest(digest)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = FencError;

    /// Case-insensitive; `-` and `_` are ignored, so `sha-256` and `SHA3_512` parse.
    fn from_str(s: &str) -> FencResult<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .map(|c| c.to_ascii_uppercase())
            .collect();
        HashAlgorithm::ALL
            .into_iter()
            .find(|a| a.name().replace('-', "").eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| FencError::UnsupportedAlgorithm(format!("hash {s}")))
    }
}

/// Incremental hasher over any supported algorithm.
pub enum StreamHasher {
    Digest(Box<dyn DynDigest + Send>),
    Blake3(Box<blake3::Hasher>),
}

impl StreamHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Digest(d) => d.update(data),
            StreamHasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            StreamHasher::Digest(d) => d.finalize().into_vec(),
            StreamHasher::Blake3(h) => h.finalize().as_bytes().to_vec(),
        }
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.finalize())
    }
}

/// `Write` adapter that hashes everything written to it.
pub struct DigestSink {
    hasher: StreamHasher,
    written: u64,
}

impl DigestSink {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            hasher: algorithm.hasher(),
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finalize_hex(self) -> String {
        self.hasher.finalize_hex()
    }
}

impl Write for DigestSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.hasher.update(buf);
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Lowercase hex digest of `data`.
pub fn hash_data(data: &[u8], algorithm: HashAlgorithm) -> String {
    let mut hasher = algorithm.hasher();
    hasher.update(data);
    hasher.finalize_hex()
}

/// Hash a reader chunk by chunk, reporting progress against `total`.
pub fn hash_reader(
    reader: &mut dyn Read,
    total: Option<u64>,
    algorithm: HashAlgorithm,
    options: &mut StreamOptions<'_>,
) -> FencResult<String> {
    if options.chunk_size == 0 {
        return Err(FencError::input("chunk size must be greater than zero"));
    }
    let mut hasher = algorithm.hasher();
    let mut buf = vec![0u8; options.chunk_size];
    let mut consumed: u64 = 0;

    loop {
        if options.cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            return Err(FencError::Cancelled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buf[..n]);
        consumed += n as u64;
        if let (Some(progress), Some(total)) = (options.progress.as_deref_mut(), total) {
            if total > 0 {
                progress((consumed as f64 / total as f64 * 100.0).min(100.0));
            }
        }
    }

    if let Some(progress) = options.progress.as_deref_mut() {
        progress(100.0);
    }
    Ok(hasher.finalize_hex())
}

pub fn hash_file(
    path: &Path,
    algorithm: HashAlgorithm,
    options: &mut StreamOptions<'_>,
) -> FencResult<String> {
    let file = File::open(path)
        .map_err(|e| FencError::storage(format!("open {}: {e}", path.display())))?;
    let total = file.metadata().map(|m| m.len()).ok();
    let digest = hash_reader(&mut BufReader::new(file), total, algorithm, options)?;
    tracing::debug!(path = %path.display(), %algorithm, "hashed file");
    Ok(digest)
}

/// Compare a file's digest against `expected_hex`, ignoring case and surrounding whitespace.
pub fn verify_file_hash(path: &Path, expected_hex: &str, algorithm: HashAlgorithm) -> FencResult<bool> {
    let actual = hash_file(path, algorithm, &mut StreamOptions::default())?;
    let expected = expected_hex.trim().to_ascii_lowercase();
    Ok(actual.as_bytes().ct_eq(expected.as_bytes()).into())
}
