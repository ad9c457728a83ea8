//! Settings store: the encryption salt plus free-form preferences.
//!
//! Each installation generates a unique 16-byte salt on first load. The
//! salt feeds key derivation for every account config, so it must stay
//! fixed once accounts exist: replacing it without re-encrypting every
//! account makes all stored configs permanently undecryptable. No salt
//! rotation is offered for that reason.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{LnVaultError, Result};
use crate::storage::{StorageBackend, ACCOUNTS_KEY, SETTINGS_KEY};

/// Salt size in bytes (128 bits)
const SALT_SIZE: usize = 16;

const SALT_FIELD: &str = "salt";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub salt: String,
    #[serde(flatten)]
    pub preferences: Map<String, Value>,
}

fn generate_salt() -> String {
    let mut salt = [0u8; SALT_SIZE];
    rand::rng().fill_bytes(&mut salt);
    hex::encode(salt)
}

pub struct SettingsStore {
    storage: Arc<dyn StorageBackend>,
    settings: RwLock<Option<Settings>>,
}

impl SettingsStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            settings: RwLock::new(None),
        }
    }

    /// Load settings, creating and persisting a salt on first run.
    ///
    /// A missing salt next to stored accounts is a `Storage` error: a fresh
    /// salt would orphan every existing config.
    pub async fn load(&self) -> Result<Settings> {
        let mut guard = self.settings.write().await;

        let mut settings = match self.storage.get(SETTINGS_KEY).await? {
            Some(value) => serde_json::from_value::<Settings>(value)
                .map_err(|e| LnVaultError::Storage(format!("Settings corrupted: {}", e)))?,
            None => Settings {
                salt: String::new(),
                preferences: Map::new(),
            },
        };

        if settings.salt.is_empty() {
            if self.has_stored_accounts().await? {
                warn!("Settings have no salt but accounts exist");
                return Err(LnVaultError::Storage(
                    "Salt missing while encrypted accounts exist".into(),
                ));
            }
            info!("Initializing settings with a new salt");
            settings.salt = generate_salt();
            self.storage
                .set(SETTINGS_KEY, serde_json::to_value(&settings)?)
                .await?;
        }

        debug!("Loaded settings with {} preferences", settings.preferences.len());
        *guard = Some(settings.clone());
        Ok(settings)
    }

    async fn has_stored_accounts(&self) -> Result<bool> {
        Ok(self
            .storage
            .get(ACCOUNTS_KEY)
            .await?
            .as_ref()
            .and_then(|v| v.get("accounts"))
            .and_then(Value::as_array)
            .is_some_and(|accounts| !accounts.is_empty()))
    }

    pub async fn settings(&self) -> Result<Settings> {
        self.settings.read().await.clone().ok_or(LnVaultError::NotLoaded)
    }

    pub async fn salt(&self) -> Result<String> {
        self.settings
            .read()
            .await
            .as_ref()
            .map(|s| s.salt.clone())
            .ok_or(LnVaultError::NotLoaded)
    }

    pub async fn preferences(&self) -> Result<Map<String, Value>> {
        Ok(self.settings().await?.preferences)
    }

    pub async fn preference(&self, key: &str) -> Result<Option<Value>> {
        let guard = self.settings.read().await;
        let settings = guard.as_ref().ok_or(LnVaultError::NotLoaded)?;
        Ok(settings.preferences.get(key).cloned())
    }

    /// Set a single preference and persist the whole settings record.
    pub async fn set_preference(&self, key: &str, value: Value) -> Result<()> {
        if key == SALT_FIELD {
            return Err(LnVaultError::Validation(
                "The salt is not a preference".into(),
            ));
        }

        let mut guard = self.settings.write().await;
        let settings = guard.as_mut().ok_or(LnVaultError::NotLoaded)?;

        let mut updated = settings.clone();
        updated.preferences.insert(key.to_string(), value);
        self.storage
            .set(SETTINGS_KEY, serde_json::to_value(&updated)?)
            .await?;

        *settings = updated;
        debug!("Stored preference {:?}", key);
        Ok(())
    }
}
