//! ExtensionState - the options-page session.
//!
//! Owns one instance of every store plus the session gate. Nothing here is
//! global: the embedding UI constructs one `ExtensionState` per extension
//! context and drops it (and with it the derived key) when the context
//! ends.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::allowances::{AllowanceMap, AllowanceRegistry};
use crate::config::VaultConfig;
use crate::connector::ConnectorConfig;
use crate::error::{LnVaultError, Result};
use crate::security::CredentialCodec;
use crate::settings::{Settings, SettingsStore};
use crate::storage::{FileStorage, MemoryStorage, StorageBackend};
use crate::vault::{
    spawn_background, Account, AccountVault, AccountsSnapshot, BackgroundChannel, Session,
    SessionGate, SessionState,
};

/// Result of a coordinated load of all three stores.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedState {
    pub settings: Settings,
    pub accounts: AccountsSnapshot,
    pub allowances: AllowanceMap,
}

pub struct ExtensionState {
    settings: Arc<SettingsStore>,
    accounts: Arc<AccountVault>,
    allowances: Arc<AllowanceRegistry>,
    gate: SessionGate,
    loaded: AtomicBool,
}

impl ExtensionState {
    /// Assemble a state from explicit collaborators.
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        background: Arc<dyn BackgroundChannel>,
        config: &VaultConfig,
    ) -> Self {
        let codec = CredentialCodec::new(config.kdf);
        Self {
            settings: Arc::new(SettingsStore::new(storage.clone())),
            accounts: Arc::new(AccountVault::new(storage.clone())),
            allowances: Arc::new(AllowanceRegistry::new(storage)),
            gate: SessionGate::new(background, codec, config.unlock_timeout()),
            loaded: AtomicBool::new(false),
        }
    }

    /// Build storage from `config` and start an in-process background
    /// service over it.
    pub async fn open(config: &VaultConfig) -> Result<Self> {
        let storage: Arc<dyn StorageBackend> = match &config.data_dir {
            Some(dir) => Arc::new(FileStorage::open(dir).await?),
            None => {
                debug!("No data directory configured, using memory storage");
                Arc::new(MemoryStorage::new())
            }
        };

        let background = spawn_background(storage.clone(), CredentialCodec::new(config.kdf));
        Ok(Self::new(storage, Arc::new(background), config))
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn accounts(&self) -> &AccountVault {
        &self.accounts
    }

    pub fn allowances(&self) -> &AllowanceRegistry {
        &self.allowances
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    pub fn session_state(&self) -> SessionState {
        self.gate.state()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.is_loaded() {
            Ok(())
        } else {
            Err(LnVaultError::NotLoaded)
        }
    }

    /// Load settings, accounts and allowances concurrently.
    ///
    /// Resolves only once all three have loaded; the first failure fails
    /// the whole load.
    pub async fn load(&self) -> Result<LoadedState> {
        let (settings, accounts, allowances) = futures::try_join!(
            self.settings.load(),
            self.accounts.load(),
            self.allowances.load(),
        )?;

        self.loaded.store(true, Ordering::SeqCst);
        info!(
            "Loaded {} accounts and {} allowances",
            accounts.accounts.len(),
            allowances.len()
        );

        Ok(LoadedState {
            settings,
            accounts,
            allowances,
        })
    }

    /// Ask for the password. See [`SessionGate::request_unlock`].
    pub async fn unlock(&self, password: &str) -> Result<Arc<Session>> {
        self.ensure_loaded()?;
        self.gate
            .request_unlock(password, &self.accounts, &self.settings)
            .await
    }

    pub fn lock(&self) {
        self.gate.lock();
    }

    /// Encrypt `config` with the session key and save it as a new account.
    pub async fn save_account(&self, name: &str, config: ConnectorConfig) -> Result<Account> {
        self.ensure_loaded()?;
        let session = self.gate.session()?;

        let encrypted = session.encrypt_config(&config)?;
        let account = self
            .accounts
            .set_account(Account::new(name, config.connector_type(), encrypted), true)
            .await?;

        self.load().await?;
        Ok(account)
    }

    /// Replace the name and config of an existing account.
    pub async fn update_account(
        &self,
        id: &str,
        name: &str,
        config: ConnectorConfig,
    ) -> Result<Account> {
        self.ensure_loaded()?;
        let session = self.gate.session()?;

        let mut account = Account::new(name, config.connector_type(), session.encrypt_config(&config)?);
        account.id = id.to_string();
        let account = self.accounts.set_account(account, false).await?;

        self.load().await?;
        Ok(account)
    }

    /// Decrypt the stored config of account `id`.
    pub async fn account_config(&self, id: &str) -> Result<ConnectorConfig> {
        self.ensure_loaded()?;
        let session = self.gate.session()?;

        let account = self
            .accounts
            .get(id)
            .await?
            .ok_or_else(|| LnVaultError::NotFound(format!("Account {}", id)))?;
        session.decrypt_config(&account)
    }

    pub async fn set_current_account(&self, id: &str) -> Result<()> {
        self.ensure_loaded()?;
        self.accounts.set_current_account(id).await
    }

    pub async fn reset_accounts(&self) -> Result<()> {
        self.ensure_loaded()?;
        self.accounts.reset().await
    }

    pub async fn reset_allowances(&self) -> Result<()> {
        self.ensure_loaded()?;
        self.allowances.reset().await
    }
}
