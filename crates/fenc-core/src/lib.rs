//! fenc-core: shared types, configuration schema, and the error taxonomy
//! every other fenc crate reports through.

pub mod config;
pub mod error;
pub mod types;

pub use config::FencConfig;
pub use error::{ErrorKind, FencError, FencResult};
pub use types::{Direction, FileOutcome, JobProgress, WatchEvent, WatchEventType};
