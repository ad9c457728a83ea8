use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub const ACCOUNTS_KEY: &str = "accounts";
pub const SETTINGS_KEY: &str = "settings";
pub const ALLOWANCES_KEY: &str = "allowances";

/// Async key/value store holding JSON values.
///
/// Implementations must make `set` atomic per key: a concurrent `get`
/// returns either the complete previous value or the complete new one.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Returns `Ok(None)` when nothing is stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Returns `Ok(())` even if the key does not exist.
    async fn remove(&self, key: &str) -> Result<()>;
}
