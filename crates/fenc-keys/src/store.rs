//! Durable key storage with optional password protection.
//!
//! Record file `<dir>/<name>.key`, either the JSON record as UTF-8 or:
//! ```text
//! [10 bytes: "ENCRYPTED:"][16 bytes: salt][4 bytes: PBKDF2 iterations, big-endian]
//! [24 bytes: XChaCha20 nonce][ciphertext][16 bytes: Poly1305 tag]
//! AAD = the first 30 bytes (magic || salt || iterations)
//! ```

use secrecy::SecretString;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fenc_core::config::DEFAULT_KDF_ITERATIONS;
use fenc_core::{FencConfig, FencError, FencResult};
use fenc_crypto::{derive_wrapping_key, generate_salt, wrap, CipherRegistry, KeyMaterial, SALT_SIZE};

use crate::record::StoredKeyRecord;

/// Marker that opens a password-protected record
pub const MAGIC: &[u8; 10] = b"ENCRYPTED:";

/// File extension of key records
pub const KEY_EXTENSION: &str = "key";

const HEADER_LEN: usize = MAGIC.len() + SALT_SIZE + 4;

/// Listing entry; never carries secret bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyInfo {
    pub name: String,
    /// `None` for password-protected or unreadable records
    pub algorithm: Option<String>,
    pub is_password_protected: bool,
    pub path: PathBuf,
}

pub struct KeyManager {
    dir: PathBuf,
    registry: Arc<CipherRegistry>,
    kdf_iterations: u32,
}

impl KeyManager {
    pub fn new(dir: impl Into<PathBuf>, registry: Arc<CipherRegistry>) -> Self {
        Self {
            dir: dir.into(),
            registry,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }

    pub fn from_config(config: &FencConfig, registry: Arc<CipherRegistry>) -> Self {
        Self::new(config.keys_dir(), registry).with_kdf_iterations(config.keys.kdf_iterations)
    }

    /// PBKDF2 iteration count for newly saved records. Existing records keep
    /// the count stored in their header.
    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn registry(&self) -> &CipherRegistry {
        &self.registry
    }

    pub fn path_for(&self, name: &str) -> FencResult<PathBuf> {
        let name = sanitize_name(name)?;
        Ok(self.dir.join(format!("{name}.{KEY_EXTENSION}")))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Persist `material` under `name`, replacing any existing record.
    pub fn save(
        &self,
        material: &KeyMaterial,
        name: &str,
        password: Option<&SecretString>,
    ) -> FencResult<PathBuf> {
        let (name, path, contents) = self.encode(material, name, password)?;
        write_atomic(&self.dir, &path, &contents)?;
        tracing::info!(
            key = %name,
            algorithm = %material.algorithm,
            protected = password.is_some(),
            "key saved"
        );
        Ok(path)
    }

    /// Persist `material` under `name` only if no record exists there yet.
    ///
    /// Returns `KeyExists` when the name is taken; the existing record is
    /// left untouched.
    pub fn save_new(
        &self,
        material: &KeyMaterial,
        name: &str,
        password: Option<&SecretString>,
    ) -> FencResult<PathBuf> {
        let (name, path, contents) = self.encode(material, name, password)?;
        write_exclusive(&self.dir, &path, &contents)?;
        tracing::info!(
            key = %name,
            algorithm = %material.algorithm,
            protected = password.is_some(),
            "key created"
        );
        Ok(path)
    }

    fn encode(
        &self,
        material: &KeyMaterial,
        name: &str,
        password: Option<&SecretString>,
    ) -> FencResult<(String, PathBuf, Vec<u8>)> {
        let algorithm = self.registry.describe(&material.algorithm)?;
        material.validate(&algorithm)?;

        let name = sanitize_name(name)?;
        let path = self.path_for(&name)?;
        let json = StoredKeyRecord::from_material(&name, material).to_json()?;

        let contents = match password {
            Some(password) => self.protect(&json, password)?,
            None => json.to_vec(),
        };
        Ok((name, path, contents))
    }

    /// Read and validate the record stored under `name`.
    pub fn load(&self, name: &str, password: Option<&SecretString>) -> FencResult<KeyMaterial> {
        let name = sanitize_name(name)?;
        let path = self.path_for(&name)?;
        let contents = match fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FencError::KeyNotFound(name))
            }
            Err(e) => {
                return Err(FencError::storage(format!("reading {}: {e}", path.display())))
            }
        };

        let record = if contents.starts_with(MAGIC) {
            let password = password.ok_or_else(|| FencError::PasswordRequired(name.clone()))?;
            let json = unprotect(&contents, password)?;
            StoredKeyRecord::from_json(&json)?
        } else {
            if password.is_some() {
                tracing::debug!(key = %name, "password supplied for an unprotected key; ignoring");
            }
            StoredKeyRecord::from_json(&contents)?
        };

        let material = record.to_material()?;
        let algorithm = self.registry.describe(&material.algorithm)?;
        material.validate(&algorithm).map_err(|e| {
            FencError::storage(format!("key record '{name}' is inconsistent: {e}"))
        })?;

        tracing::debug!(key = %name, algorithm = %material.algorithm, "key loaded");
        Ok(material)
    }

    /// Every record in the key directory, sorted by name. Reads no passwords.
    pub fn list(&self) -> FencResult<Vec<KeyInfo>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(FencError::storage(format!("listing {}: {e}", self.dir.display())))
            }
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(KEY_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };

            let contents = match fs::read(&path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable key record");
                    continue;
                }
            };

            let info = if contents.starts_with(MAGIC) {
                KeyInfo {
                    name,
                    algorithm: None,
                    is_password_protected: true,
                    path,
                }
            } else {
                let algorithm = match StoredKeyRecord::from_json(&contents) {
                    Ok(record) => Some(record.algorithm.clone()),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "malformed key record");
                        None
                    }
                };
                KeyInfo {
                    name,
                    algorithm,
                    is_password_protected: false,
                    path,
                }
            };
            keys.push(info);
        }

        keys.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(keys)
    }

    /// Remove the record for `name`. Returns `false` if there was none.
    pub fn delete(&self, name: &str) -> FencResult<bool> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "key deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FencError::storage(format!("deleting {}: {e}", path.display()))),
        }
    }

    fn protect(&self, json: &[u8], password: &SecretString) -> FencResult<Vec<u8>> {
        let salt = generate_salt();
        let key = derive_wrapping_key(password, &salt, self.kdf_iterations)?;

        let mut out = Vec::with_capacity(HEADER_LEN + json.len() + 64);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&salt);
        out.extend_from_slice(&self.kdf_iterations.to_be_bytes());
        let sealed = wrap::seal(&key, json, &out)?;
        out.extend_from_slice(&sealed);
        Ok(out)
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("dir", &self.dir)
            .field("kdf_iterations", &self.kdf_iterations)
            .finish()
    }
}

fn unprotect(contents: &[u8], password: &SecretString) -> FencResult<zeroize::Zeroizing<Vec<u8>>> {
    if contents.len() < HEADER_LEN {
        return Err(FencError::storage("protected key record is truncated"));
    }
    let (header, token) = contents.split_at(HEADER_LEN);

    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&header[MAGIC.len()..MAGIC.len() + SALT_SIZE]);
    let mut iterations = [0u8; 4];
    iterations.copy_from_slice(&header[MAGIC.len() + SALT_SIZE..]);
    let iterations = u32::from_be_bytes(iterations);
    if iterations == 0 {
        return Err(FencError::storage("protected key record has a zero iteration count"));
    }

    let key = derive_wrapping_key(password, &salt, iterations)?;
    wrap::open(&key, token, header).map_err(|_| FencError::WrongPassword)
}

/// Replace path separators, whitespace and control characters with `_`.
///
/// Empty names and names made only of dots are rejected.
pub fn sanitize_name(name: &str) -> FencResult<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if matches!(c, '/' | '\\' | ':') || c.is_whitespace() || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return Err(FencError::input(format!("invalid key name: {name:?}")));
    }
    Ok(cleaned)
}

fn owner_only(options: &mut fs::OpenOptions) -> &mut fs::OpenOptions {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

fn create_key_dir(dir: &Path) -> FencResult<()> {
    fs::create_dir_all(dir)
        .map_err(|e| FencError::storage(format!("creating key dir {}: {e}", dir.display())))
}

/// Write via a temp file and rename; the record is readable by the owner only.
fn write_atomic(dir: &Path, path: &Path, contents: &[u8]) -> FencResult<()> {
    create_key_dir(dir)?;

    let tmp = path.with_extension("tmp");
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    let result = owner_only(&mut options).open(&tmp).and_then(|mut f| {
        f.write_all(contents)?;
        f.sync_all()
    });
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(FencError::storage(format!("writing {}: {e}", tmp.display())));
    }

    fs::rename(&tmp, path)
        .map_err(|e| FencError::storage(format!("renaming key record {}: {e}", path.display())))
}

/// Create the record with `O_EXCL` semantics so concurrent writers of the
/// same name cannot replace each other.
fn write_exclusive(dir: &Path, path: &Path, contents: &[u8]) -> FencResult<()> {
    create_key_dir(dir)?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    let mut file = match owner_only(&mut options).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let name = path.file_stem().map(|s| s.to_string_lossy().into_owned());
            return Err(FencError::KeyExists(name.unwrap_or_default()));
        }
        Err(e) => return Err(FencError::storage(format!("creating {}: {e}", path.display()))),
    };

    if let Err(e) = file.write_all(contents).and_then(|_| file.sync_all()) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(FencError::storage(format!("writing {}: {e}", path.display())));
    }
    Ok(())
}
