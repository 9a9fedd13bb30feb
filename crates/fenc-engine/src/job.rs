//! File jobs: turn `{paths, algorithm, key, output dir, delete-original}` into
//! one `FileOutcome` per path.
//!
//! A failing file never aborts the batch. Output is written to a staging file
//! next to its destination and renamed into place only after success, so a
//! failed run never truncates or removes a file that was already there.

use secrecy::SecretString;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use fenc_core::{Direction, FencError, FencResult, FileOutcome, JobProgress};
use fenc_crypto::{
    hash_file, Cipher, CipherCategory, CipherParams, DigestSink, HashAlgorithm, KeyMaterial,
    StreamOptions,
};
use fenc_keys::sanitize_name;

use crate::context::FencContext;
use crate::fsutil::{
    commit_staged, decrypted_output_path, discard_partial, encrypted_output_path, secure_delete,
    staging_path,
};

/// Prefix of keys generated for a file when the job names none
pub const TEMP_KEY_PREFIX: &str = "temp_";

/// Suffixed names tried for a generated key before giving up
const MAX_TEMP_KEY_ATTEMPTS: u32 = 1000;

/// Digest used to compare source and round-tripped output
const VERIFY_HASH: HashAlgorithm = HashAlgorithm::Blake3;

#[derive(Debug)]
pub struct FileJob {
    pub direction: Direction,
    pub paths: Vec<PathBuf>,
    /// Algorithm for generated keys; must match the key's when both are given
    pub algorithm: Option<String>,
    pub key_name: Option<String>,
    /// Password of a protected key record
    pub key_password: Option<SecretString>,
    /// Passphrase of an encrypted RSA private key
    pub pem_passphrase: Option<SecretString>,
    pub output_dir: Option<PathBuf>,
    pub delete_original: bool,
}

impl FileJob {
    pub fn new(direction: Direction, paths: Vec<PathBuf>) -> Self {
        Self {
            direction,
            paths,
            algorithm: None,
            key_name: None,
            key_password: None,
            pem_passphrase: None,
            output_dir: None,
            delete_original: false,
        }
    }

    pub fn encrypt(paths: Vec<PathBuf>) -> Self {
        Self::new(Direction::Encrypt, paths)
    }

    pub fn decrypt(paths: Vec<PathBuf>) -> Self {
        Self::new(Direction::Decrypt, paths)
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }

    pub fn with_key(mut self, name: impl Into<String>, password: Option<SecretString>) -> Self {
        self.key_name = Some(name.into());
        self.key_password = password;
        self
    }

    pub fn with_pem_passphrase(mut self, passphrase: SecretString) -> Self {
        self.pem_passphrase = Some(passphrase);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_delete_original(mut self, delete: bool) -> Self {
        self.delete_original = delete;
        self
    }

    fn params(&self) -> CipherParams {
        match &self.pem_passphrase {
            Some(p) => CipherParams::default().with_passphrase(p.clone()),
            None => CipherParams::default(),
        }
    }
}

/// Run every path of `job`, reporting per-file progress. Files after a
/// cancellation are reported as cancelled without being touched.
pub fn run_job<F>(
    ctx: &FencContext,
    job: &FileJob,
    cancel: Option<&AtomicBool>,
    mut progress: F,
) -> Vec<FileOutcome>
where
    F: FnMut(JobProgress),
{
    let mut outcomes = Vec::with_capacity(job.paths.len());
    for path in &job.paths {
        let result = if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            Err(FencError::Cancelled)
        } else {
            process_file(ctx, job, path, cancel, &mut progress)
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    direction = ?job.direction,
                    error = %e,
                    "file job failed"
                );
                FileOutcome::failed(path.clone(), &e)
            }
        };
        outcomes.push(outcome);
    }

    let failed = outcomes.iter().filter(|o| !o.success).count();
    tracing::info!(
        direction = ?job.direction,
        files = outcomes.len(),
        failed,
        "job finished"
    );
    outcomes
}

/// Encrypt or decrypt a single file according to `job`.
pub fn process_file(
    ctx: &FencContext,
    job: &FileJob,
    path: &Path,
    cancel: Option<&AtomicBool>,
    progress: &mut dyn FnMut(JobProgress),
) -> FencResult<FileOutcome> {
    if !path.is_file() {
        return Err(FencError::input(format!("not a file: {}", path.display())));
    }
    match job.direction {
        Direction::Encrypt => encrypt_one(ctx, job, path, cancel, progress),
        Direction::Decrypt => decrypt_one(ctx, job, path, cancel, progress),
    }
}

fn encrypt_one(
    ctx: &FencContext,
    job: &FileJob,
    path: &Path,
    cancel: Option<&AtomicBool>,
    progress: &mut dyn FnMut(JobProgress),
) -> FencResult<FileOutcome> {
    let params = job.params();
    let (material, key_name, generated) = match &job.key_name {
        Some(name) => {
            let material = ctx.keys().load(name, job.key_password.as_ref())?;
            if let Some(algorithm) = &job.algorithm {
                if !algorithm.eq_ignore_ascii_case(&material.algorithm) {
                    return Err(FencError::input(format!(
                        "key '{name}' is for {}, not {algorithm}",
                        material.algorithm
                    )));
                }
            }
            (material, name.clone(), false)
        }
        None => {
            let algorithm = job
                .algorithm
                .as_deref()
                .unwrap_or(&ctx.config().encryption.default_algorithm);
            let material = ctx.cipher(algorithm)?.generate_key(&params)?;
            let name = save_generated_key(ctx, path, &material, job.key_password.as_ref())?;
            tracing::info!(key = %name, algorithm = %material.algorithm, "generated key for file");
            (material, name, true)
        }
    };

    let cipher = ctx.cipher(&material.algorithm)?;
    let output = encrypted_output_path(path, job.output_dir.as_deref())?;
    ensure_distinct(path, &output)?;
    create_parent(&output)?;
    let staged = staging_path(&output)?;

    let result = with_options(ctx, path, "encrypting", cancel, &mut *progress, |options| {
        cipher.encrypt_file(path, &staged, &material, &params, options)
    })
    .and_then(|_| {
        if !ctx.config().encryption.verify_after_encryption
            || !can_verify(&cipher, &material, &params)
        {
            return Ok(());
        }
        progress(JobProgress {
            path: path.to_path_buf(),
            percent: 100.0,
            status: "verifying".into(),
        });
        verify_roundtrip(ctx, &cipher, path, &staged, &material, &params, cancel)
    })
    .and_then(|_| commit_staged(&staged, &output));
    if let Err(e) = result {
        discard_partial(&staged);
        if generated {
            forget_generated_key(ctx, &key_name);
        }
        return Err(e);
    }

    let mut message = format!("encrypted with {} using key '{key_name}'", material.algorithm);
    if generated {
        message.push_str(" (generated)");
    }
    if job.delete_original {
        message.push_str(&remove_original(ctx, path));
    }
    tracing::info!(input = %path.display(), output = %output.display(), key = %key_name, "file encrypted");
    Ok(FileOutcome::ok(path.to_path_buf(), output, message).with_key_name(key_name))
}

fn decrypt_one(
    ctx: &FencContext,
    job: &FileJob,
    path: &Path,
    cancel: Option<&AtomicBool>,
    progress: &mut dyn FnMut(JobProgress),
) -> FencResult<FileOutcome> {
    let name = job
        .key_name
        .as_deref()
        .ok_or_else(|| FencError::input("decryption requires a key name"))?;
    let material = ctx.keys().load(name, job.key_password.as_ref())?;
    let cipher = ctx.cipher(&material.algorithm)?;
    let params = job.params();

    let output = decrypted_output_path(path, job.output_dir.as_deref())?;
    ensure_distinct(path, &output)?;
    create_parent(&output)?;
    let staged = staging_path(&output)?;

    let result = with_options(ctx, path, "decrypting", cancel, progress, |options| {
        cipher.decrypt_file(path, &staged, &material, &params, options)
    })
    .and_then(|_| commit_staged(&staged, &output));
    if let Err(e) = result {
        discard_partial(&staged);
        return Err(e);
    }

    let mut message = format!("decrypted with {} using key '{name}'", material.algorithm);
    if job.delete_original {
        message.push_str(&remove_original(ctx, path));
    }
    tracing::info!(input = %path.display(), output = %output.display(), key = %name, "file decrypted");
    Ok(FileOutcome::ok(path.to_path_buf(), output, message).with_key_name(name))
}

/// Run `op` with stream options that forward progress as `JobProgress`.
fn with_options<T>(
    ctx: &FencContext,
    path: &Path,
    status: &str,
    cancel: Option<&AtomicBool>,
    progress: &mut dyn FnMut(JobProgress),
    op: impl FnOnce(&mut StreamOptions<'_>) -> FencResult<T>,
) -> FencResult<T> {
    let mut report = |percent: f64| {
        progress(JobProgress {
            path: path.to_path_buf(),
            percent,
            status: status.to_string(),
        })
    };
    let mut options = StreamOptions::default()
        .with_chunk_size(ctx.config().encryption.chunk_size)
        .with_progress(&mut report);
    if let Some(cancel) = cancel {
        options = options.with_cancel(cancel);
    }
    op(&mut options)
}

/// Decrypt `output` in memory and compare its digest with the source.
fn verify_roundtrip(
    ctx: &FencContext,
    cipher: &dyn Cipher,
    source: &Path,
    output: &Path,
    material: &KeyMaterial,
    params: &CipherParams,
    cancel: Option<&AtomicBool>,
) -> FencResult<()> {
    let mut options = StreamOptions::default().with_chunk_size(ctx.config().encryption.chunk_size);
    if let Some(cancel) = cancel {
        options = options.with_cancel(cancel);
    }

    let source_len = std::fs::metadata(source)
        .map_err(|e| FencError::storage(format!("stat {}: {e}", source.display())))?
        .len();
    let expected = hash_file(source, VERIFY_HASH, &mut options)?;

    let file = File::open(output)
        .map_err(|e| FencError::storage(format!("open {}: {e}", output.display())))?;
    let mut sink = DigestSink::new(VERIFY_HASH);
    cipher.decrypt_stream(&mut BufReader::new(file), &mut sink, None, material, params, &mut options)?;

    let restored_len = sink.written();
    if restored_len != source_len || sink.finalize_hex() != expected {
        tracing::warn!(
            path = %source.display(),
            source_len,
            restored_len,
            "post-encryption verification mismatch"
        );
        return Err(FencError::Integrity);
    }
    tracing::debug!(path = %source.display(), "post-encryption verification passed");
    Ok(())
}

/// A public-only RSA key, or an encrypted private half without its
/// passphrase, cannot decrypt what it just produced.
fn can_verify(cipher: &dyn Cipher, material: &KeyMaterial, params: &CipherParams) -> bool {
    if cipher.algorithm().category() != CipherCategory::Asymmetric {
        return true;
    }
    material.has_private_half() && (!material.private_key_encrypted || params.passphrase.is_some())
}

/// Remove the input after success; failures become a note on the outcome.
fn remove_original(ctx: &FencContext, path: &Path) -> String {
    let result = if ctx.config().encryption.secure_delete_original {
        secure_delete(path)
    } else {
        std::fs::remove_file(path).map_err(FencError::from)
    };
    match result {
        Ok(()) => "; original deleted".into(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not delete original");
            format!("; original kept: {e}")
        }
    }
}

fn temp_key_name(path: &Path) -> FencResult<String> {
    let file = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FencError::input(format!("not a file path: {}", path.display())))?;
    Ok(format!("{TEMP_KEY_PREFIX}{file}"))
}

/// Store a generated key under the first free `temp_<file>[_N]` name.
///
/// Existing records are never replaced: they may be the only key for an
/// earlier ciphertext of a same-named file.
fn save_generated_key(
    ctx: &FencContext,
    path: &Path,
    material: &KeyMaterial,
    password: Option<&SecretString>,
) -> FencResult<String> {
    let base = sanitize_name(&temp_key_name(path)?)?;
    for attempt in 1..=MAX_TEMP_KEY_ATTEMPTS {
        let name = match attempt {
            1 => base.clone(),
            n => format!("{base}_{n}"),
        };
        match ctx.keys().save_new(material, &name, password) {
            Ok(_) => return Ok(name),
            Err(FencError::KeyExists(_)) => {
                tracing::debug!(key = %name, "generated key name taken");
            }
            Err(e) => return Err(e),
        }
    }
    Err(FencError::storage(format!(
        "no free key name for {base} after {MAX_TEMP_KEY_ATTEMPTS} attempts"
    )))
}

/// Drop a key generated for a file whose encryption did not complete.
fn forget_generated_key(ctx: &FencContext, name: &str) {
    if let Err(e) = ctx.keys().delete(name) {
        tracing::warn!(key = %name, error = %e, "could not remove unused generated key");
    }
}

fn ensure_distinct(input: &Path, output: &Path) -> FencResult<()> {
    if input == output {
        return Err(FencError::input(format!(
            "output would overwrite input: {}",
            input.display()
        )));
    }
    Ok(())
}

fn create_parent(output: &Path) -> FencResult<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| FencError::storage(format!("creating {}: {e}", parent.display())))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_key_name() {
        assert_eq!(temp_key_name(Path::new("/a/b/report.pdf")).unwrap(), "temp_report.pdf");
    }

    #[test]
    fn test_ensure_distinct() {
        assert!(ensure_distinct(Path::new("/a"), Path::new("/a")).is_err());
        assert!(ensure_distinct(Path::new("/a"), Path::new("/a.enc")).is_ok());
    }

    #[test]
    fn test_builder() {
        let job = FileJob::encrypt(vec!["x".into()])
            .with_algorithm("AES-128-CBC")
            .with_output_dir("/out")
            .with_delete_original(true);
        assert_eq!(job.direction, Direction::Encrypt);
        assert_eq!(job.algorithm.as_deref(), Some("AES-128-CBC"));
        assert!(job.delete_original);
        assert!(job.params().passphrase.is_none());
    }
}
