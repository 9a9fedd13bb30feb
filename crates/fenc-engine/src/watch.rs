//! Entry point for a directory-watch collaborator.
//!
//! The watcher itself lives outside this crate; it hands events here and gets
//! back the outcome of auto-processing the file, if any.

use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use fenc_core::{Direction, FencResult, FileOutcome, JobProgress, WatchEvent, WatchEventType};

use crate::context::FencContext;
use crate::fsutil::{is_staging, ENCRYPTED_SUFFIX};
use crate::job::{process_file, FileJob};

/// Preselected key and algorithm applied to every watched file
#[derive(Debug, Clone, Deserialize)]
pub struct AutoProcessPreset {
    pub direction: Direction,
    pub key_name: String,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(skip)]
    pub key_password: Option<SecretString>,
}

impl AutoProcessPreset {
    pub fn new(direction: Direction, key_name: impl Into<String>) -> Self {
        Self {
            direction,
            key_name: key_name.into(),
            algorithm: None,
            output_dir: None,
            key_password: None,
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_key_password(mut self, password: SecretString) -> Self {
        self.key_password = Some(password);
        self
    }

    fn job(&self, path: &Path) -> FileJob {
        let mut job = FileJob::new(self.direction, vec![path.to_path_buf()])
            .with_key(self.key_name.clone(), self.key_password.clone());
        job.algorithm = self.algorithm.clone();
        job.output_dir = self.output_dir.clone();
        job
    }

    /// Whether `path` is something this preset should touch.
    ///
    /// Encrypting skips files that already carry `.enc` (including this
    /// preset's own outputs); decrypting only takes `.enc` files. In-flight
    /// job output is never accepted.
    pub fn accepts(&self, path: &Path) -> bool {
        if is_staging(path) {
            return false;
        }
        let is_encrypted = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(ENCRYPTED_SUFFIX));
        match self.direction {
            Direction::Encrypt => !is_encrypted,
            Direction::Decrypt => is_encrypted,
        }
    }
}

/// Auto-process the file behind `event`.
///
/// Deletions, directories and files the preset does not accept yield
/// `Ok(None)`.
pub fn handle_watch_event(
    ctx: &FencContext,
    event: &WatchEvent,
    preset: &AutoProcessPreset,
    cancel: Option<&AtomicBool>,
) -> FencResult<Option<FileOutcome>> {
    let path = &event.file_path;
    if event.event_type == WatchEventType::Deleted || !path.is_file() || !preset.accepts(path) {
        tracing::debug!(path = %path.display(), event = ?event.event_type, "watch event ignored");
        return Ok(None);
    }

    tracing::info!(
        path = %path.display(),
        event = ?event.event_type,
        direction = ?preset.direction,
        key = %preset.key_name,
        "auto-processing"
    );
    let job = preset.job(path);
    let mut quiet = |_: JobProgress| {};
    process_file(ctx, &job, path, cancel, &mut quiet).map(Some)
}
