//! Encrypted account vault and the session gate in front of it.
//!
//! Connector configs are encrypted with a key derived from the user's
//! password and the installation salt via Argon2id. The vault itself only
//! ever sees ciphertext; the gate hands out a [`Session`] carrying the key
//! once the background process has accepted the password.

pub mod accounts;
pub mod auth;
pub mod background;
pub mod session;

pub use accounts::{Account, AccountVault, AccountsSnapshot, EncryptedConfig};
pub use auth::{
    BackgroundChannel, BackgroundRequest, BackgroundResponse, SessionState, INVALID_PASSWORD,
};
pub use background::{spawn_background, BackgroundHandle, BackgroundService};
pub use session::{Session, SessionGate};
