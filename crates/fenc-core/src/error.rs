use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type FencResult<T> = Result<T, FencError>;

/// Coarse failure category reported to callers alongside the message.
///
/// `Integrity` and `WrongPassword` are deliberately undifferentiated: callers
/// learn that authentication failed, never which check tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Input,
    Integrity,
    UnsupportedAlgorithm,
    Storage,
    WrongPassword,
    Decryption,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Input => "input",
            ErrorKind::Integrity => "integrity",
            ErrorKind::UnsupportedAlgorithm => "unsupported_algorithm",
            ErrorKind::Storage => "storage",
            ErrorKind::WrongPassword => "wrong_password",
            ErrorKind::Decryption => "decryption",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum FencError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid input: {0}")]
    Input(String),

    #[error("integrity check failed: wrong key or corrupted data")]
    Integrity,

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("key already exists: {0}")]
    KeyExists(String),

    #[error("key '{0}' is password protected; a password is required")]
    PasswordRequired(String),

    #[error("wrong password or corrupted key record")]
    WrongPassword,

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FencError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FencError::Configuration(_) => ErrorKind::Configuration,
            FencError::Input(_) | FencError::PasswordRequired(_) | FencError::KeyExists(_) => {
                ErrorKind::Input
            }
            FencError::Integrity => ErrorKind::Integrity,
            FencError::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            FencError::Storage(_) | FencError::KeyNotFound(_) | FencError::Io(_) => {
                ErrorKind::Storage
            }
            FencError::WrongPassword => ErrorKind::WrongPassword,
            FencError::Decryption(_) => ErrorKind::Decryption,
            FencError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn input(msg: impl Into<String>) -> Self {
        FencError::Input(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        FencError::Configuration(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        FencError::Storage(msg.into())
    }
}
