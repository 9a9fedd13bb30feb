use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ErrorKind, FencError};

/// Which way a file job transforms its input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Structured per-file result handed back to the presentation layer.
///
/// One bad file never aborts a batch; each file gets its own outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub output: Option<PathBuf>,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    /// Key the file was processed with, including generated ones
    #[serde(default)]
    pub key_name: Option<String>,
    pub message: String,
}

impl FileOutcome {
    pub fn ok(path: PathBuf, output: PathBuf, message: impl Into<String>) -> Self {
        Self {
            path,
            output: Some(output),
            success: true,
            error_kind: None,
            key_name: None,
            message: message.into(),
        }
    }

    pub fn with_key_name(mut self, name: impl Into<String>) -> Self {
        self.key_name = Some(name.into());
        self
    }

    pub fn failed(path: PathBuf, err: &FencError) -> Self {
        Self {
            path,
            output: None,
            success: false,
            error_kind: Some(err.kind()),
            key_name: None,
            message: err.to_string(),
        }
    }
}

/// Progress update for a single file: cumulative percentage plus status text
#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    pub path: PathBuf,
    pub percent: f64,
    pub status: String,
}

/// Filesystem event kinds a directory watcher reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventType {
    Created,
    Modified,
    Moved,
    Deleted,
}

/// Event delivered by a directory-watch collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub file_path: PathBuf,
}
