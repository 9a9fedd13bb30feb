//! JSON form of a key record as persisted on disk.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use fenc_core::{FencError, FencResult};
use fenc_crypto::KeyMaterial;

/// Key material flattened for storage. Binary and PEM fields are base64.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct StoredKeyRecord {
    pub name: String,
    pub algorithm: String,
    pub created_at: u64,
    pub key_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_pem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_pem: Option<String>,
    #[serde(default)]
    pub private_key_encrypted: bool,
}

impl StoredKeyRecord {
    pub fn from_material(name: &str, material: &KeyMaterial) -> Self {
        Self {
            name: name.to_string(),
            algorithm: material.algorithm.clone(),
            created_at: material.created_at,
            key_size: material.key_size,
            mode: material.mode.clone(),
            key: material.key.as_ref().map(|k| B64.encode(k.as_slice())),
            iv: material.iv.as_ref().map(|iv| B64.encode(iv)),
            public_pem: material.public_pem.as_ref().map(|p| B64.encode(p)),
            private_pem: material.private_pem.as_ref().map(|p| B64.encode(p.as_bytes())),
            private_key_encrypted: material.private_key_encrypted,
        }
    }

    pub fn to_material(&self) -> FencResult<KeyMaterial> {
        Ok(KeyMaterial {
            algorithm: self.algorithm.clone(),
            created_at: self.created_at,
            key_size: self.key_size,
            mode: self.mode.clone(),
            key: decode(self.key.as_deref(), "key")?.map(Zeroizing::new),
            iv: decode(self.iv.as_deref(), "iv")?,
            public_pem: decode_text(self.public_pem.as_deref(), "public_pem")?,
            private_pem: decode_text(self.private_pem.as_deref(), "private_pem")?.map(Zeroizing::new),
            private_key_encrypted: self.private_key_encrypted,
        })
    }

    pub fn to_json(&self) -> FencResult<Zeroizing<Vec<u8>>> {
        serde_json::to_vec_pretty(self)
            .map(Zeroizing::new)
            .map_err(|e| FencError::storage(format!("serializing key record: {e}")))
    }

    pub fn from_json(bytes: &[u8]) -> FencResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| FencError::storage(format!("malformed key record: {e}")))
    }
}

fn decode(field: Option<&str>, what: &str) -> FencResult<Option<Vec<u8>>> {
    field
        .map(|s| {
            B64.decode(s)
                .map_err(|e| FencError::storage(format!("key record field '{what}' is not base64: {e}")))
        })
        .transpose()
}

fn decode_text(field: Option<&str>, what: &str) -> FencResult<Option<String>> {
    decode(field, what)?
        .map(|bytes| {
            String::from_utf8(bytes)
                .map_err(|_| FencError::storage(format!("key record field '{what}' is not UTF-8")))
        })
        .transpose()
}
