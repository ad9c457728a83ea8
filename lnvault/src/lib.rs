//! Encrypted credential vault for a multi-connector Lightning browser
//! extension.
//!
//! The crate stores per-account connector configs encrypted at rest, gates
//! access to them behind a password checked by the privileged background
//! process, and keeps per-origin allowance records alongside.
//!
//! ```no_run
//! use lnvault::{ConnectorConfig, ExtensionState, LndConfig, VaultConfig};
//!
//! # async fn run() -> lnvault::Result<()> {
//! let state = ExtensionState::open(&VaultConfig::from_env()).await?;
//! state.load().await?;
//! state.unlock("correct horse").await?;
//! state
//!     .save_account(
//!         "Home node",
//!         ConnectorConfig::Lnd(LndConfig {
//!             macaroon: "0201036c6e64".into(),
//!             url: "https://localhost:8080".into(),
//!         }),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod allowances;
pub mod config;
pub mod connector;
pub mod error;
pub mod logging;
pub mod security;
pub mod settings;
pub mod state;
pub mod storage;
pub mod vault;

pub use allowances::{Allowance, AllowanceMap, AllowanceRegistry};
pub use config::{KdfParams, VaultConfig};
pub use connector::{
    ConnectorConfig, ConnectorType, LnBitsConfig, LndConfig, LndHubConfig, LNBITS_DEFAULT_URL,
};
pub use error::{LnVaultError, Result};
pub use security::{CredentialCodec, DerivedKey};
pub use settings::{Settings, SettingsStore};
pub use state::{ExtensionState, LoadedState};
pub use storage::{FileStorage, MemoryStorage, StorageBackend};
pub use vault::{
    Account, AccountVault, AccountsSnapshot, BackgroundChannel, BackgroundHandle,
    BackgroundRequest, BackgroundResponse, BackgroundService, EncryptedConfig, Session,
    SessionGate, SessionState,
};
