//! Runtime configuration for the vault.
//!
//! A JSON file supplies defaults, then `LNVAULT_*` environment variables
//! override them. Missing files load as defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{LnVaultError, Result};

pub const ENV_DATA_DIR: &str = "LNVAULT_DATA_DIR";
pub const ENV_UNLOCK_TIMEOUT_MS: &str = "LNVAULT_UNLOCK_TIMEOUT_MS";

/// Argon2id cost parameters.
///
/// Defaults balance brute-force resistance against unlock latency:
/// - Memory: 64 MB
/// - Time: 3 iterations
/// - Parallelism: 4 lanes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Minimal Argon2 cost. Only for tests.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VaultConfig {
    /// Directory for `FileStorage`. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub unlock_timeout_ms: u64,
    pub kdf: KdfParams,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            unlock_timeout_ms: 30_000,
            kdf: KdfParams::default(),
        }
    }
}

impl VaultConfig {
    /// Read a JSON config file, falling back to defaults when it is absent,
    /// then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|e| {
                LnVaultError::Validation(format!("Invalid config file {:?}: {}", path, e))
            })?
        } else {
            debug!("No config at {:?}, using defaults", path);
            Self::default()
        };

        config.apply_env();
        Ok(config)
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            if !dir.is_empty() {
                self.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Ok(raw) = std::env::var(ENV_UNLOCK_TIMEOUT_MS) {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => self.unlock_timeout_ms = ms,
                _ => warn!("Ignoring invalid {}={:?}", ENV_UNLOCK_TIMEOUT_MS, raw),
            }
        }
    }

    pub fn unlock_timeout(&self) -> Duration {
        Duration::from_millis(self.unlock_timeout_ms)
    }
}
