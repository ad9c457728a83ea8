//! Per-origin permission records.
//!
//! Allowances are independent of accounts. Only bulk reset and access
//! bookkeeping live here; granting and revoking individual permissions is
//! handled by whoever owns the prompt flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{LnVaultError, Result};
use crate::storage::{StorageBackend, ALLOWANCES_KEY};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allowance {
    pub origin: String,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    pub last_accessed: DateTime<Utc>,
}

/// Persisted form: origin -> record.
pub type AllowanceMap = BTreeMap<String, Allowance>;

pub struct AllowanceRegistry {
    storage: Arc<dyn StorageBackend>,
    allowances: RwLock<Option<AllowanceMap>>,
}

impl AllowanceRegistry {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            allowances: RwLock::new(None),
        }
    }

    pub async fn load(&self) -> Result<AllowanceMap> {
        let mut guard = self.allowances.write().await;

        let allowances: AllowanceMap = match self.storage.get(ALLOWANCES_KEY).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| LnVaultError::Storage(format!("Allowances corrupted: {}", e)))?,
            None => AllowanceMap::new(),
        };

        if let Some((key, record)) = allowances.iter().find(|(k, a)| **k != a.origin) {
            return Err(LnVaultError::Storage(format!(
                "Allowance stored under {:?} belongs to {:?}",
                key, record.origin
            )));
        }

        debug!("Loaded {} allowances", allowances.len());
        *guard = Some(allowances.clone());
        Ok(allowances)
    }

    /// Remove every origin record. Safe to call when already empty.
    pub async fn reset(&self) -> Result<()> {
        let mut guard = self.allowances.write().await;
        self.storage.remove(ALLOWANCES_KEY).await?;
        *guard = Some(AllowanceMap::new());
        info!("Allowances reset");
        Ok(())
    }

    pub async fn allowances(&self) -> Result<AllowanceMap> {
        self.allowances
            .read()
            .await
            .clone()
            .ok_or(LnVaultError::NotLoaded)
    }

    pub async fn get(&self, origin: &str) -> Result<Option<Allowance>> {
        let guard = self.allowances.read().await;
        let allowances = guard.as_ref().ok_or(LnVaultError::NotLoaded)?;
        Ok(allowances.get(origin).cloned())
    }

    pub async fn len(&self) -> Result<usize> {
        let guard = self.allowances.read().await;
        Ok(guard.as_ref().ok_or(LnVaultError::NotLoaded)?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Record a use of `origin` at time `at`.
    ///
    /// `last_accessed` never moves backwards: an `at` older than the stored
    /// value leaves the record unchanged.
    pub async fn record_access(&self, origin: &str, at: DateTime<Utc>) -> Result<Allowance> {
        let mut guard = self.allowances.write().await;
        let allowances = guard.as_mut().ok_or(LnVaultError::NotLoaded)?;

        let current = allowances
            .get(origin)
            .ok_or_else(|| LnVaultError::NotFound(format!("No allowance for {}", origin)))?;
        if at <= current.last_accessed {
            return Ok(current.clone());
        }

        let mut updated = allowances.clone();
        if let Some(record) = updated.get_mut(origin) {
            record.last_accessed = at;
        }
        self.storage
            .set(ALLOWANCES_KEY, serde_json::to_value(&updated)?)
            .await?;

        *allowances = updated;
        allowances
            .get(origin)
            .cloned()
            .ok_or_else(|| LnVaultError::NotFound(format!("No allowance for {}", origin)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    async fn seeded() -> (Arc<MemoryStorage>, AllowanceRegistry) {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .insert_raw(
                ALLOWANCES_KEY,
                json!({
                    "https://shop.example": {
                        "origin": "https://shop.example",
                        "permissions": ["makeInvoice", "sendPayment"],
                        "lastAccessed": ts(0),
                    }
                }),
            )
            .await;
        let registry = AllowanceRegistry::new(storage.clone());
        (storage, registry)
    }

    #[tokio::test]
    async fn test_load_empty() {
        let registry = AllowanceRegistry::new(Arc::new(MemoryStorage::new()));
        assert!(registry.load().await.unwrap().is_empty());
        assert!(registry.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_load_records() {
        let (_, registry) = seeded().await;
        let allowances = registry.load().await.unwrap();

        let record = &allowances["https://shop.example"];
        assert!(record.permissions.contains("sendPayment"));
        assert_eq!(record.last_accessed, ts(0));
    }

    #[tokio::test]
    async fn test_reset_idempotent() {
        let (storage, registry) = seeded().await;
        registry.load().await.unwrap();

        registry.reset().await.unwrap();
        registry.reset().await.unwrap();

        assert!(registry.is_empty().await.unwrap());
        assert!(storage.get(ALLOWANCES_KEY).await.unwrap().is_none());
        assert!(registry.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_access_monotonic() {
        let (_, registry) = seeded().await;
        registry.load().await.unwrap();

        let later = ts(0) + Duration::seconds(60);
        let updated = registry
            .record_access("https://shop.example", later)
            .await
            .unwrap();
        assert_eq!(updated.last_accessed, later);

        let stale = registry
            .record_access("https://shop.example", ts(10))
            .await
            .unwrap();
        assert_eq!(stale.last_accessed, later);

        // Survives a reload
        let reloaded = registry.load().await.unwrap();
        assert_eq!(reloaded["https://shop.example"].last_accessed, later);
    }

    #[tokio::test]
    async fn test_record_access_unknown_origin() {
        let (_, registry) = seeded().await;
        registry.load().await.unwrap();

        let err = registry
            .record_access("https://unknown.example", ts(5))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_mismatched_origin_is_corrupt() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .insert_raw(
                ALLOWANCES_KEY,
                json!({"a.example": {"origin": "b.example", "lastAccessed": ts(0)}}),
            )
            .await;

        let err = AllowanceRegistry::new(storage).load().await.unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
    }
}
