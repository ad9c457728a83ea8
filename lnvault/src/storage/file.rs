//! JSON-file storage: one `<key>.json` per key inside a data directory.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::backend::StorageBackend;
use crate::error::{LnVaultError, Result};

#[derive(Debug, Clone)]
pub struct FileStorage {
    data_dir: PathBuf,
}

impl FileStorage {
    /// Open (and create if needed) a storage directory.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            tokio::fs::set_permissions(&data_dir, perms).await?;
        }

        debug!("Opened file storage at {:?}", data_dir);
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(LnVaultError::Validation(format!(
                "Invalid storage key: {:?}",
                key
            )));
        }
        Ok(self.data_dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key)?;

        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LnVaultError::Storage(format!(
                    "Failed to read {:?}: {}",
                    path, e
                )))
            }
        };

        let value = serde_json::from_slice(&content)
            .map_err(|e| LnVaultError::Storage(format!("Corrupt {:?}: {}", path, e)))?;
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let path = self.path_for(key)?;
        let content = serde_json::to_vec_pretty(&value)?;

        // Write atomically (write to temp file, then rename)
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&temp_path, perms).await?;
        }

        tokio::fs::rename(&temp_path, &path).await?;
        debug!("Wrote {} bytes to {:?}", content.len(), path);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();

        assert!(storage.get("settings").await.unwrap().is_none());

        storage.set("settings", json!({"salt": "abc"})).await.unwrap();
        assert_eq!(
            storage.get("settings").await.unwrap(),
            Some(json!({"salt": "abc"}))
        );

        storage.remove("settings").await.unwrap();
        storage.remove("settings").await.unwrap();
        assert!(storage.get("settings").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FileStorage::open(dir.path()).await.unwrap();
            storage.set("accounts", json!({"accounts": []})).await.unwrap();
        }

        let storage = FileStorage::open(dir.path()).await.unwrap();
        assert_eq!(
            storage.get("accounts").await.unwrap(),
            Some(json!({"accounts": []}))
        );
        assert!(!dir.path().join("accounts.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("accounts.json"), b"{not json").unwrap();

        let err = storage.get("accounts").await.unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();

        let err = storage.get("../escape").await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(storage.set("", json!(null)).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        storage.set("settings", json!({})).await.unwrap();

        let mode = std::fs::metadata(dir.path().join("settings.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
