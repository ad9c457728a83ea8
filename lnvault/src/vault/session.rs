//! SessionGate - the unlock handshake in front of decrypted account data.
//!
//! A successful unlock yields a [`Session`] holding the derived key. Every
//! encrypt/decrypt of a connector config goes through that value; nothing
//! keeps the password around once the key is derived.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::accounts::{Account, AccountVault, EncryptedConfig};
use super::auth::{
    BackgroundChannel, BackgroundRequest, BackgroundResponse, SessionState, INVALID_PASSWORD,
};
use crate::connector::ConnectorConfig;
use crate::error::{LnVaultError, Result};
use crate::security::{CredentialCodec, DerivedKey};
use crate::settings::SettingsStore;

/// An unlocked session. Dropping it discards the key.
pub struct Session {
    key: DerivedKey,
    salt: String,
}

impl Session {
    pub fn new(key: DerivedKey, salt: impl Into<String>) -> Self {
        Self {
            key,
            salt: salt.into(),
        }
    }

    /// Salt the key was derived with.
    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// Validate and encrypt a connector config for storage.
    pub fn encrypt_config(&self, config: &ConnectorConfig) -> Result<EncryptedConfig> {
        config.validate()?;
        let plaintext = config.to_plaintext()?;
        let ciphertext = CredentialCodec::encrypt_with_key(&self.key, &plaintext)?;
        Ok(EncryptedConfig::from_bytes(ciphertext))
    }

    pub fn decrypt_config(&self, account: &Account) -> Result<ConnectorConfig> {
        let plaintext = Zeroizing::new(CredentialCodec::decrypt_with_key(
            &self.key,
            account.config.as_bytes(),
        )?);
        ConnectorConfig::from_plaintext(account.connector, &plaintext)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Default)]
struct GateInner {
    state: SessionState,
    session: Option<Arc<Session>>,
}

impl GateInner {
    /// End a failed unlock. A session that was live before the attempt
    /// stays in place.
    fn settle_failure(&mut self, state: SessionState) {
        self.state = if self.session.is_some() {
            SessionState::Unlocked
        } else {
            state
        };
    }
}

pub struct SessionGate {
    channel: Arc<dyn BackgroundChannel>,
    codec: CredentialCodec,
    timeout: Duration,
    inner: Mutex<GateInner>,
}

/// Moves the gate to `Failed` if an unlock future is dropped mid-flight.
struct UnlockingGuard<'a> {
    gate: &'a SessionGate,
    armed: bool,
}

impl Drop for UnlockingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Unlock abandoned before completion");
            self.gate.inner().settle_failure(SessionState::Failed);
        }
    }
}

impl SessionGate {
    pub fn new(channel: Arc<dyn BackgroundChannel>, codec: CredentialCodec, timeout: Duration) -> Self {
        Self {
            channel,
            codec,
            timeout,
            inner: Mutex::new(GateInner::default()),
        }
    }

    // Critical sections never panic, so a poisoned lock still holds valid state.
    fn inner(&self) -> MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.inner().state
    }

    pub fn is_unlocked(&self) -> bool {
        self.state() == SessionState::Unlocked
    }

    /// The active session, or `Locked` if there is none.
    pub fn session(&self) -> Result<Arc<Session>> {
        self.inner().session.clone().ok_or(LnVaultError::Locked)
    }

    /// Discard the derived key and return to `Locked`.
    pub fn lock(&self) {
        let mut inner = self.inner();
        inner.session = None;
        inner.state = SessionState::Locked;
        info!("Session locked");
    }

    /// Run the unlock handshake.
    ///
    /// With no persisted accounts there is nothing to protect and the
    /// unlock is granted without asking the background process. Otherwise
    /// the background process decides; a wrong password is returned as
    /// [`LnVaultError::Auth`] and leaves the gate `Locked`. The caller is
    /// expected to re-prompt; nothing is retried here.
    ///
    /// A failed attempt from `Unlocked` keeps the existing session.
    pub async fn request_unlock(
        &self,
        password: &str,
        vault: &AccountVault,
        settings: &SettingsStore,
    ) -> Result<Arc<Session>> {
        {
            let mut inner = self.inner();
            if inner.state == SessionState::Unlocking {
                return Err(LnVaultError::UnlockInProgress);
            }
            debug!("Session {} -> Unlocking", inner.state);
            inner.state = SessionState::Unlocking;
        }

        let mut guard = UnlockingGuard {
            gate: self,
            armed: true,
        };
        let result = self.handshake(password, vault, settings).await;
        guard.armed = false;

        let mut inner = self.inner();
        match result {
            Ok(session) => {
                inner.session = Some(session.clone());
                inner.state = SessionState::Unlocked;
                info!("Session unlocked");
                Ok(session)
            }
            Err(e @ LnVaultError::Auth(_)) => {
                inner.settle_failure(SessionState::Locked);
                warn!("Unlock rejected");
                Err(e)
            }
            Err(e) => {
                inner.settle_failure(SessionState::Failed);
                warn!("Unlock failed: {}", e);
                Err(e)
            }
        }
    }

    async fn handshake(
        &self,
        password: &str,
        vault: &AccountVault,
        settings: &SettingsStore,
    ) -> Result<Arc<Session>> {
        let salt = settings.salt().await?;

        // Another context may have saved accounts since this one loaded.
        if vault.load().await?.accounts.is_empty() {
            info!("No accounts yet, unlock granted without verification");
        } else {
            let request = BackgroundRequest::unlock(password);
            let response = tokio::time::timeout(self.timeout, self.channel.request(request))
                .await
                .map_err(|_| {
                    LnVaultError::UnlockTimeout(
                        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    )
                })??;

            match response {
                BackgroundResponse::Ok => debug!("Background accepted the password"),
                BackgroundResponse::Error { reason } if reason == INVALID_PASSWORD => {
                    return Err(LnVaultError::Auth(reason))
                }
                BackgroundResponse::Error { reason } => {
                    return Err(LnVaultError::Background(reason))
                }
            }
        }

        let key = self.codec.derive_key_async(password, &salt).await?;
        Ok(Arc::new(Session::new(key, salt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorType, LndConfig};
    use crate::security::test_codec;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Background stub answering every request with a fixed response.
    struct StubChannel {
        response: Option<BackgroundResponse>,
        calls: AtomicUsize,
    }

    impl StubChannel {
        fn answering(response: BackgroundResponse) -> Arc<Self> {
            Arc::new(Self {
                response: Some(response),
                calls: AtomicUsize::new(0),
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                response: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl BackgroundChannel for StubChannel {
        async fn request(&self, _request: BackgroundRequest) -> Result<BackgroundResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Some(response) => Ok(response.clone()),
                None => std::future::pending().await,
            }
        }
    }

    /// Save an LND account encrypted under `password` through `vault`.
    async fn add_account(vault: &AccountVault, salt: &str, password: &str) {
        let key = test_codec().derive_key(password, salt).unwrap();
        let config = ConnectorConfig::Lnd(LndConfig {
            macaroon: "m".into(),
            url: "u".into(),
        });
        let encrypted = Session::new(key, salt).encrypt_config(&config).unwrap();
        vault
            .set_account(Account::new("A", ConnectorType::Lnd, encrypted), true)
            .await
            .unwrap();
    }

    async fn shared_stores(storage: &Arc<MemoryStorage>) -> (AccountVault, SettingsStore) {
        let settings = SettingsStore::new(storage.clone());
        settings.load().await.unwrap();
        let vault = AccountVault::new(storage.clone());
        vault.load().await.unwrap();
        (vault, settings)
    }

    async fn stores(with_account: bool) -> (AccountVault, SettingsStore) {
        let storage = Arc::new(MemoryStorage::new());
        let (vault, settings) = shared_stores(&storage).await;
        if with_account {
            add_account(&vault, &settings.salt().await.unwrap(), "p").await;
        }
        (vault, settings)
    }

    fn gate(channel: Arc<dyn BackgroundChannel>) -> SessionGate {
        SessionGate::new(channel, test_codec(), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_starts_locked() {
        let gate = gate(StubChannel::answering(BackgroundResponse::Ok));
        assert_eq!(gate.state(), SessionState::Locked);
        assert!(matches!(gate.session(), Err(LnVaultError::Locked)));
    }

    #[tokio::test]
    async fn test_no_accounts_unlocks_without_background() {
        let channel = StubChannel::answering(BackgroundResponse::invalid_password());
        let gate = gate(channel.clone());
        let (vault, settings) = stores(false).await;

        gate.request_unlock("anything", &vault, &settings).await.unwrap();
        assert!(gate.is_unlocked());
        assert_eq!(channel.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ack_unlocks_and_key_decrypts() {
        let gate = gate(StubChannel::answering(BackgroundResponse::Ok));
        let (vault, settings) = stores(true).await;

        let session = gate.request_unlock("p", &vault, &settings).await.unwrap();
        assert_eq!(gate.state(), SessionState::Unlocked);

        let account = vault.current_account().await.unwrap().unwrap();
        match session.decrypt_config(&account).unwrap() {
            ConnectorConfig::Lnd(c) => assert_eq!(c.macaroon, "m"),
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nack_leaves_gate_locked() {
        let gate = gate(StubChannel::answering(BackgroundResponse::invalid_password()));
        let (vault, settings) = stores(true).await;

        let err = gate.request_unlock("wrong", &vault, &settings).await.unwrap_err();
        assert!(err.is_auth());
        assert!(err.to_string().contains(INVALID_PASSWORD));
        assert_eq!(gate.state(), SessionState::Locked);
        assert!(gate.session().is_err());
    }

    #[tokio::test]
    async fn test_accounts_saved_elsewhere_require_verification() {
        let storage = Arc::new(MemoryStorage::new());
        let (vault, settings) = shared_stores(&storage).await;
        assert!(vault.is_empty().await.unwrap());

        // Another context saves an account after this one loaded.
        let (other, _) = shared_stores(&storage).await;
        add_account(&other, &settings.salt().await.unwrap(), "p").await;

        let channel = StubChannel::answering(BackgroundResponse::invalid_password());
        let gate = gate(channel.clone());
        let err = gate.request_unlock("q", &vault, &settings).await.unwrap_err();

        assert!(err.is_auth());
        assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gate.state(), SessionState::Locked);
    }

    #[tokio::test]
    async fn test_background_failure_is_not_auth() {
        let gate = gate(StubChannel::answering(BackgroundResponse::Error {
            reason: "storage_error".into(),
        }));
        let (vault, settings) = stores(true).await;

        let err = gate.request_unlock("p", &vault, &settings).await.unwrap_err();
        assert!(!err.is_auth());
        assert_eq!(err.code(), "BACKGROUND_ERROR");
        assert_eq!(gate.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_failed_reunlock_keeps_session() {
        let storage = Arc::new(MemoryStorage::new());
        let (vault, settings) = shared_stores(&storage).await;
        let gate = gate(StubChannel::answering(BackgroundResponse::invalid_password()));

        let session = gate.request_unlock("p", &vault, &settings).await.unwrap();
        add_account(&vault, &settings.salt().await.unwrap(), "p").await;

        let err = gate.request_unlock("typo", &vault, &settings).await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(gate.state(), SessionState::Unlocked);
        assert!(Arc::ptr_eq(&gate.session().unwrap(), &session));
    }

    #[tokio::test]
    async fn test_timeout_fails_then_retry() {
        let gate = gate(StubChannel::hanging());
        let (vault, settings) = stores(true).await;

        let err = gate.request_unlock("p", &vault, &settings).await.unwrap_err();
        assert!(matches!(err, LnVaultError::UnlockTimeout(100)));
        assert_eq!(gate.state(), SessionState::Failed);

        // Failed -> Unlocking is allowed; it times out again.
        let err = gate.request_unlock("p", &vault, &settings).await.unwrap_err();
        assert_eq!(err.code(), "UNLOCK_TIMEOUT");
    }

    #[tokio::test]
    async fn test_concurrent_unlock_rejected() {
        let gate = Arc::new(gate(StubChannel::hanging()));
        let (vault, settings) = stores(true).await;
        let (vault, settings) = (Arc::new(vault), Arc::new(settings));

        let first = {
            let (gate, vault, settings) = (gate.clone(), vault.clone(), settings.clone());
            tokio::spawn(async move { gate.request_unlock("p", &vault, &settings).await })
        };
        while gate.state() != SessionState::Unlocking {
            tokio::task::yield_now().await;
        }

        let err = gate.request_unlock("p", &vault, &settings).await.unwrap_err();
        assert!(matches!(err, LnVaultError::UnlockInProgress));
        assert!(first.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_abandoned_unlock_marks_failed() {
        let gate = gate(StubChannel::hanging());
        let (vault, settings) = stores(true).await;

        let attempt = gate.request_unlock("p", &vault, &settings);
        let _ = tokio::time::timeout(Duration::from_millis(10), attempt).await;
        assert_eq!(gate.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_lock_discards_session() {
        let gate = gate(StubChannel::answering(BackgroundResponse::Ok));
        let (vault, settings) = stores(false).await;

        gate.request_unlock("p", &vault, &settings).await.unwrap();
        gate.lock();
        assert_eq!(gate.state(), SessionState::Locked);
        assert!(matches!(gate.session(), Err(LnVaultError::Locked)));
    }

    #[tokio::test]
    async fn test_session_rejects_invalid_config() {
        let session = Session::new(test_codec().derive_key("p", "s").unwrap(), "s");
        let err = session
            .encrypt_config(&ConnectorConfig::Lnd(LndConfig {
                macaroon: String::new(),
                url: "u".into(),
            }))
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
