use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FencError, FencResult};

/// Default plaintext read size for streaming file operations.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default PBKDF2-HMAC-SHA256 iteration count for password-protected keys.
pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;

/// Top-level configuration (loaded from fenc.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FencConfig {
    pub keys: KeysConfig,
    pub encryption: EncryptionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Key record directory (default: ~/.file_encrypter/keys)
    pub dir: PathBuf,
    /// PBKDF2 iterations for newly protected keys. Stored per record, so
    /// raising it never breaks existing files.
    pub kdf_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Algorithm used when neither a key nor `--algorithm` names one
    pub default_algorithm: String,
    /// Read size for streaming file operations, in bytes
    pub chunk_size: usize,
    /// Decrypt the output in memory after encrypting and compare digests
    pub verify_after_encryption: bool,
    /// Overwrite the original before unlinking when delete-original is requested
    pub secure_delete_original: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.file_encrypter/keys"),
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            default_algorithm: "AES-256-CBC".into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            verify_after_encryption: true,
            secure_delete_original: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl FencConfig {
    /// Load from a TOML file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> FencResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| FencError::config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FencResult<()> {
        if self.encryption.chunk_size == 0 {
            return Err(FencError::config("encryption.chunk_size must be > 0"));
        }
        if self.keys.kdf_iterations == 0 {
            return Err(FencError::config("keys.kdf_iterations must be > 0"));
        }
        Ok(())
    }

    /// Key directory with `~/` expanded.
    pub fn keys_dir(&self) -> PathBuf {
        expand_tilde(&self.keys.dir)
    }
}

/// Expand a leading `~/` to `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        return PathBuf::from(home).join(rest);
    }
    path.to_path_buf()
}
