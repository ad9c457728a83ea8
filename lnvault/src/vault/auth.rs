//! Session state and the unlock message exchanged with the background
//! process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Reason reported by the background process for a rejected password.
pub const INVALID_PASSWORD: &str = "invalid password";

/// State of the session gate.
///
/// - `Locked` → `Unlocking` (unlock requested)
/// - `Unlocking` → `Unlocked` (background acknowledged the password)
/// - `Unlocking` → `Locked` (background rejected the password)
/// - `Unlocking` → `Failed` (no answer in time, or the channel broke)
/// - `Failed` → `Unlocking` (retry)
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SessionState {
    #[default]
    Locked,
    Unlocking,
    Unlocked,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked => write!(f, "Locked"),
            Self::Unlocking => write!(f, "Unlocking"),
            Self::Unlocked => write!(f, "Unlocked"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Message from the UI to the background process.
///
/// Wire form: `{"action": "unlock", "password": "..."}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum BackgroundRequest {
    Unlock { password: String },
}

impl BackgroundRequest {
    pub fn unlock(password: impl Into<String>) -> Self {
        Self::Unlock {
            password: password.into(),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::Unlock { .. } => "unlock",
        }
    }
}

impl std::fmt::Debug for BackgroundRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlock { .. } => f
                .debug_struct("Unlock")
                .field("password", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Reply from the background process.
///
/// Wire form: `{"status": "ok"}` or `{"status": "error", "reason": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BackgroundResponse {
    Ok,
    Error { reason: String },
}

impl BackgroundResponse {
    pub fn invalid_password() -> Self {
        Self::Error {
            reason: INVALID_PASSWORD.to_string(),
        }
    }
}

/// Transport to the privileged background process.
#[async_trait]
pub trait BackgroundChannel: Send + Sync {
    async fn request(&self, request: BackgroundRequest) -> Result<BackgroundResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unlock_request_wire_format() {
        let value = serde_json::to_value(BackgroundRequest::unlock("p")).unwrap();
        assert_eq!(value, json!({"action": "unlock", "password": "p"}));

        let parsed: BackgroundRequest =
            serde_json::from_value(json!({"action": "unlock", "password": "x"})).unwrap();
        assert_eq!(parsed, BackgroundRequest::unlock("x"));
        assert_eq!(parsed.action(), "unlock");
    }

    #[test]
    fn test_response_wire_format() {
        assert_eq!(
            serde_json::to_value(BackgroundResponse::Ok).unwrap(),
            json!({"status": "ok"})
        );
        assert_eq!(
            serde_json::to_value(BackgroundResponse::invalid_password()).unwrap(),
            json!({"status": "error", "reason": "invalid password"})
        );
    }

    #[test]
    fn test_request_debug_redacts_password() {
        let printed = format!("{:?}", BackgroundRequest::unlock("hunter2"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_default_state() {
        assert_eq!(SessionState::default(), SessionState::Locked);
        assert_eq!(SessionState::Failed.to_string(), "Failed");
    }
}
