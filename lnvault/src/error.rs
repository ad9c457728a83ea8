//! Error types for vault, session and store operations.
//!
//! Every fallible operation in the crate returns [`LnVaultError`]. Variants
//! carry only non-secret context: passwords, derived keys and decrypted
//! connector configs never end up in an error message.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LnVaultError {
    /// Unknown connector type or a malformed account/preference payload.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Wrong password, either on decrypt or during the unlock handshake.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Reference to an account id or allowance origin that does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Persisted state is unreadable or corrupt, or the backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Cipher or key-derivation misconfiguration.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Decrypted data was requested while the session gate is locked.
    #[error("Vault is locked")]
    Locked,

    /// A mutation was issued before the stores finished loading.
    #[error("Stores not loaded")]
    NotLoaded,

    #[error("Unlock already in progress")]
    UnlockInProgress,

    #[error("Unlock timed out after {0} ms")]
    UnlockTimeout(u64),

    /// The background process could not be reached or dropped the reply.
    #[error("Background process error: {0}")]
    Background(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LnVaultError {
    /// Stable machine-readable code for the UI layer.
    pub fn code(&self) -> &'static str {
        match self {
            LnVaultError::Validation(_) => "VALIDATION_ERROR",
            LnVaultError::Auth(_) => "AUTH_ERROR",
            LnVaultError::NotFound(_) => "NOT_FOUND",
            LnVaultError::Storage(_) => "STORAGE_ERROR",
            LnVaultError::Encryption(_) => "ENCRYPTION_ERROR",
            LnVaultError::Locked => "LOCKED",
            LnVaultError::NotLoaded => "NOT_LOADED",
            LnVaultError::UnlockInProgress => "UNLOCK_IN_PROGRESS",
            LnVaultError::UnlockTimeout(_) => "UNLOCK_TIMEOUT",
            LnVaultError::Background(_) => "BACKGROUND_ERROR",
            LnVaultError::Serialization(_) => "SERIALIZATION_ERROR",
            LnVaultError::Io(_) => "IO_ERROR",
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, LnVaultError::Auth(_))
    }
}

impl serde::Serialize for LnVaultError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("LnVaultError", 2)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

pub type Result<T> = std::result::Result<T, LnVaultError>;
