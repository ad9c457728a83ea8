//! Key/value persistence for the extension's stores.
//!
//! Each store keeps its whole state under a single key and replaces it
//! with one `set` call, so a reader only ever sees the old value or the
//! new one.

mod backend;
mod file;
mod memory;

pub use backend::{StorageBackend, ACCOUNTS_KEY, ALLOWANCES_KEY, SETTINGS_KEY};
pub use file::FileStorage;
pub use memory::MemoryStorage;
