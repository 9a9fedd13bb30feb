//! fenc-keys: the key manager
//!
//! Records live as `<keys_dir>/<name>.key`. Unprotected records are plain
//! JSON; protected records are wrapped with a PBKDF2-derived key whose salt
//! and iteration count sit in the record header, so a record stays readable
//! after the default iteration count changes.

pub mod record;
pub mod store;

pub use record::StoredKeyRecord;
pub use store::{sanitize_name, KeyInfo, KeyManager, KEY_EXTENSION, MAGIC};
