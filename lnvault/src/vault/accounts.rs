//! AccountVault - ordered collection of encrypted connector accounts.
//!
//! The vault stores what it is given: account configs arrive already
//! encrypted (see [`crate::vault::Session::encrypt_config`]) and the vault
//! never handles passwords or keys.
//!
//! Writes are serialized by a per-instance lock. Each writer re-reads the
//! persisted collection after acquiring it and replaces the whole
//! collection with a single storage write, so overlapping saves cannot
//! lose each other's accounts.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connector::ConnectorType;
use crate::error::{LnVaultError, Result};
use crate::storage::{StorageBackend, ACCOUNTS_KEY};

/// Ciphertext of a connector config, hex-encoded when persisted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedConfig(#[serde(with = "hex")] Vec<u8>);

impl EncryptedConfig {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for EncryptedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptedConfig({} bytes)", self.0.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Empty until the vault assigns one on first save.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub connector: ConnectorType,
    pub config: EncryptedConfig,
}

impl Account {
    pub fn new(name: impl Into<String>, connector: ConnectorType, config: EncryptedConfig) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            connector,
            config,
        }
    }

    /// Build an account from loosely typed input, e.g. a form submission.
    pub fn from_parts(name: &str, connector: &str, config: EncryptedConfig) -> Result<Self> {
        let connector = connector.parse::<ConnectorType>()?;
        Ok(Self::new(name, connector, config))
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LnVaultError::Validation("Account name is required".into()));
        }
        if self.config.is_empty() {
            return Err(LnVaultError::Validation(
                "Account config must be encrypted before saving".into(),
            ));
        }
        Ok(())
    }
}

/// Everything the vault persists under the `accounts` key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountsSnapshot {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub current_account_id: Option<String>,
}

impl AccountsSnapshot {
    pub fn contains(&self, id: &str) -> bool {
        self.accounts.iter().any(|a| a.id == id)
    }

    pub fn current_account(&self) -> Option<&Account> {
        let id = self.current_account_id.as_deref()?;
        self.accounts.iter().find(|a| a.id == id)
    }

    fn check_integrity(&self) -> Result<()> {
        for (i, account) in self.accounts.iter().enumerate() {
            if account.id.is_empty() {
                return Err(LnVaultError::Storage(format!(
                    "Account at position {} has no id",
                    i
                )));
            }
            if self.accounts[..i].iter().any(|a| a.id == account.id) {
                return Err(LnVaultError::Storage(format!(
                    "Duplicate account id {}",
                    account.id
                )));
            }
        }

        if let Some(id) = &self.current_account_id {
            if !self.contains(id) {
                return Err(LnVaultError::Storage(format!(
                    "Current account {} does not exist",
                    id
                )));
            }
        }
        Ok(())
    }
}

pub struct AccountVault {
    storage: Arc<dyn StorageBackend>,
    snapshot: RwLock<Option<AccountsSnapshot>>,
    write_lock: Mutex<()>,
}

impl AccountVault {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            snapshot: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_persisted(&self) -> Result<AccountsSnapshot> {
        let snapshot = match self.storage.get(ACCOUNTS_KEY).await? {
            Some(value) => serde_json::from_value::<AccountsSnapshot>(value)
                .map_err(|e| LnVaultError::Storage(format!("Accounts corrupted: {}", e)))?,
            None => AccountsSnapshot::default(),
        };
        snapshot.check_integrity()?;
        Ok(snapshot)
    }

    /// Persist `snapshot` and publish it to readers. Caller holds `write_lock`.
    async fn commit(&self, snapshot: AccountsSnapshot) -> Result<AccountsSnapshot> {
        self.storage
            .set(ACCOUNTS_KEY, serde_json::to_value(&snapshot)?)
            .await?;
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Load the persisted accounts and current-account pointer.
    pub async fn load(&self) -> Result<AccountsSnapshot> {
        let _write = self.write_lock.lock().await;
        let snapshot = self.read_persisted().await?;

        debug!("Loaded {} accounts", snapshot.accounts.len());
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Append a new account or replace an existing one wholesale.
    ///
    /// With `is_new` a fresh id is assigned and the account is appended;
    /// the first account saved into an empty pointer becomes current.
    /// Otherwise the entry with the same id is replaced, and a missing id
    /// is a `NotFound` error.
    pub async fn set_account(&self, mut account: Account, is_new: bool) -> Result<Account> {
        account.validate()?;

        let _write = self.write_lock.lock().await;
        let mut snapshot = self.read_persisted().await?;

        if is_new {
            account.id = Uuid::new_v4().to_string();
            snapshot.accounts.push(account.clone());
            if snapshot.current_account_id.is_none() {
                snapshot.current_account_id = Some(account.id.clone());
            }
            info!("Adding {} account {}", account.connector, account.id);
        } else {
            let existing = snapshot
                .accounts
                .iter_mut()
                .find(|a| a.id == account.id)
                .ok_or_else(|| LnVaultError::NotFound(format!("Account {}", account.id)))?;
            *existing = account.clone();
            info!("Updated {} account {}", account.connector, account.id);
        }

        self.commit(snapshot).await?;
        Ok(account)
    }

    pub async fn set_current_account(&self, id: &str) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let mut snapshot = self.read_persisted().await?;

        if !snapshot.contains(id) {
            warn!("Refusing to select unknown account {}", id);
            return Err(LnVaultError::NotFound(format!("Account {}", id)));
        }

        snapshot.current_account_id = Some(id.to_string());
        self.commit(snapshot).await?;
        debug!("Current account is now {}", id);
        Ok(())
    }

    /// Clear every account and the current-account pointer.
    pub async fn reset(&self) -> Result<()> {
        let _write = self.write_lock.lock().await;
        self.commit(AccountsSnapshot::default()).await?;
        info!("Accounts reset");
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<AccountsSnapshot> {
        self.snapshot
            .read()
            .await
            .clone()
            .ok_or(LnVaultError::NotLoaded)
    }

    pub async fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.snapshot().await?.accounts)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Account>> {
        let guard = self.snapshot.read().await;
        let snapshot = guard.as_ref().ok_or(LnVaultError::NotLoaded)?;
        Ok(snapshot.accounts.iter().find(|a| a.id == id).cloned())
    }

    pub async fn current_account_id(&self) -> Result<Option<String>> {
        Ok(self.snapshot().await?.current_account_id)
    }

    pub async fn current_account(&self) -> Result<Option<Account>> {
        let guard = self.snapshot.read().await;
        let snapshot = guard.as_ref().ok_or(LnVaultError::NotLoaded)?;
        Ok(snapshot.current_account().cloned())
    }

    pub async fn len(&self) -> Result<usize> {
        let guard = self.snapshot.read().await;
        Ok(guard.as_ref().ok_or(LnVaultError::NotLoaded)?.accounts.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
