//! fenc-engine: file jobs on top of the cipher engine and key manager
//!
//! A `FencContext` carries configuration, the cipher registry and the key
//! manager explicitly; nothing here is a process-wide singleton. Jobs return
//! one `FileOutcome` per path and never abort a batch on a single failure.

pub mod context;
pub mod fsutil;
pub mod job;
pub mod watch;

pub use context::FencContext;
pub use fsutil::{decrypted_output_path, encrypted_output_path, secure_delete};
pub use job::{process_file, run_job, FileJob, TEMP_KEY_PREFIX};
pub use watch::{handle_watch_event, AutoProcessPreset};
