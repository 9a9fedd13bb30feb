//! Algorithm descriptors: identity, category, key size and mode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use fenc_core::{FencError, FencResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherCategory {
    Symmetric,
    Asymmetric,
    Aead,
}

impl fmt::Display for CipherCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CipherCategory::Symmetric => "symmetric",
            CipherCategory::Asymmetric => "asymmetric",
            CipherCategory::Aead => "aead",
        })
    }
}

/// AES mode of operation.
///
/// None of these modes authenticate the ciphertext. Tampering with a CFB,
/// OFB or CTR stream goes undetected; use ChaCha20-Poly1305 when integrity
/// matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AesMode {
    Cbc,
    Cfb,
    Ofb,
    Ctr,
}

impl AesMode {
    pub const ALL: [AesMode; 4] = [AesMode::Cbc, AesMode::Cfb, AesMode::Ofb, AesMode::Ctr];

    pub fn as_str(&self) -> &'static str {
        match self {
            AesMode::Cbc => "CBC",
            AesMode::Cfb => "CFB",
            AesMode::Ofb => "OFB",
            AesMode::Ctr => "CTR",
        }
    }
}

impl fmt::Display for AesMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AesMode {
    type Err = FencError;

    fn from_str(s: &str) -> FencResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CBC" => Ok(AesMode::Cbc),
            "CFB" => Ok(AesMode::Cfb),
            "OFB" => Ok(AesMode::Ofb),
            "CTR" => Ok(AesMode::Ctr),
            other => Err(FencError::config(format!("unknown AES mode: {other}"))),
        }
    }
}

/// Immutable description of a cipher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherAlgorithm {
    name: String,
    category: CipherCategory,
    key_bits: u32,
    mode: Option<AesMode>,
}

impl CipherAlgorithm {
    pub fn new(
        name: impl Into<String>,
        category: CipherCategory,
        key_bits: u32,
        mode: Option<AesMode>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            key_bits,
            mode,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> CipherCategory {
        self.category
    }

    pub fn key_bits(&self) -> u32 {
        self.key_bits
    }

    /// Secret length in bytes for symmetric and AEAD ciphers.
    pub fn key_len(&self) -> usize {
        (self.key_bits / 8) as usize
    }

    pub fn mode(&self) -> Option<AesMode> {
        self.mode
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
