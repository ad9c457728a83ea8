//! In-process stand-in for the extension's privileged background process.
//!
//! The service owns its own view of the stores (separate instances over
//! the same storage) and answers unlock requests by checking the password
//! against what is persisted, never against anything the UI holds.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::accounts::AccountVault;
use super::auth::{BackgroundChannel, BackgroundRequest, BackgroundResponse};
use crate::error::{LnVaultError, Result};
use crate::security::CredentialCodec;
use crate::settings::SettingsStore;
use crate::storage::StorageBackend;

/// Buffered requests before senders wait.
const REQUEST_BUFFER: usize = 16;

struct Envelope {
    request: BackgroundRequest,
    reply: oneshot::Sender<BackgroundResponse>,
}

pub struct BackgroundService {
    vault: AccountVault,
    settings: SettingsStore,
    codec: CredentialCodec,
}

impl BackgroundService {
    pub fn new(vault: AccountVault, settings: SettingsStore, codec: CredentialCodec) -> Self {
        Self {
            vault,
            settings,
            codec,
        }
    }

    /// Start the service loop and return the UI-side handle.
    ///
    /// The loop exits once every handle has been dropped.
    pub fn spawn(self) -> BackgroundHandle {
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
        tokio::spawn(self.run(rx));
        BackgroundHandle { tx }
    }

    async fn run(self, mut rx: mpsc::Receiver<Envelope>) {
        info!("Background service started");
        while let Some(envelope) = rx.recv().await {
            let response = self.handle(envelope.request).await;
            if envelope.reply.send(response).is_err() {
                debug!("Requester went away before the reply");
            }
        }
        info!("Background service stopped");
    }

    pub async fn handle(&self, request: BackgroundRequest) -> BackgroundResponse {
        match request {
            BackgroundRequest::Unlock { password } => match self.verify_password(&password).await {
                Ok(()) => BackgroundResponse::Ok,
                Err(e) if e.is_auth() => BackgroundResponse::invalid_password(),
                Err(e) => {
                    warn!("Unlock verification failed: {}", e);
                    BackgroundResponse::Error {
                        reason: e.code().to_lowercase(),
                    }
                }
            },
        }
    }

    /// Check `password` by decrypting a persisted account config.
    ///
    /// Prefers the current account; any account works since all of them
    /// are encrypted under the same password and salt.
    async fn verify_password(&self, password: &str) -> Result<()> {
        let salt = self.settings.load().await?.salt;
        let snapshot = self.vault.load().await?;

        let account = match snapshot
            .current_account()
            .or_else(|| snapshot.accounts.first())
        {
            Some(account) => account,
            None => return Ok(()),
        };

        let key = self.codec.derive_key_async(password, &salt).await?;
        CredentialCodec::decrypt_with_key(&key, account.config.as_bytes())?;
        debug!("Password verified against account {}", account.id);
        Ok(())
    }
}

/// UI-side end of the channel to [`BackgroundService`].
#[derive(Clone)]
pub struct BackgroundHandle {
    tx: mpsc::Sender<Envelope>,
}

#[async_trait]
impl BackgroundChannel for BackgroundHandle {
    async fn request(&self, request: BackgroundRequest) -> Result<BackgroundResponse> {
        debug!("Sending {} request to background", request.action());
        let (reply, response) = oneshot::channel();

        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| LnVaultError::Background("background process is not running".into()))?;

        response
            .await
            .map_err(|_| LnVaultError::Background("background process dropped the request".into()))
    }
}

impl std::fmt::Debug for BackgroundHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Wire a background service over `storage` and return its handle.
pub fn spawn_background(
    storage: Arc<dyn StorageBackend>,
    codec: CredentialCodec,
) -> BackgroundHandle {
    BackgroundService::new(
        AccountVault::new(storage.clone()),
        SettingsStore::new(storage),
        codec,
    )
    .spawn()
}
