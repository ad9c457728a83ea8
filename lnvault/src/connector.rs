//! Connector types and their plaintext credential schemas.
//!
//! The persisted account only stores the connector discriminant and an
//! encrypted blob. The blob decrypts to the JSON form of one of the
//! [`ConnectorConfig`] variants, selected by that discriminant.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use zeroize::Zeroizing;

use crate::error::{LnVaultError, Result};

/// Fixed endpoint used for LNbits accounts when none is supplied.
pub const LNBITS_DEFAULT_URL: &str = "https://lnbits.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorType {
    Lnd,
    Lndhub,
    Lnbits,
    Native,
}

impl ConnectorType {
    pub const ALL: [ConnectorType; 4] = [
        ConnectorType::Lnd,
        ConnectorType::Lndhub,
        ConnectorType::Lnbits,
        ConnectorType::Native,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lnd => "lnd",
            Self::Lndhub => "lndhub",
            Self::Lnbits => "lnbits",
            Self::Native => "native",
        }
    }
}

impl std::fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorType {
    type Err = LnVaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| LnVaultError::Validation(format!("Unknown connector type: {:?}", s)))
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LndConfig {
    pub macaroon: String,
    pub url: String,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LndHubConfig {
    pub login: String,
    pub password: String,
    pub url: String,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnBitsConfig {
    pub adminkey: String,
    pub readkey: String,
    #[serde(default = "default_lnbits_url")]
    pub url: String,
}

fn default_lnbits_url() -> String {
    LNBITS_DEFAULT_URL.to_string()
}

impl LnBitsConfig {
    pub fn new(adminkey: impl Into<String>, readkey: impl Into<String>) -> Self {
        Self {
            adminkey: adminkey.into(),
            readkey: readkey.into(),
            url: default_lnbits_url(),
        }
    }
}

/// Plaintext credentials of one account, keyed by connector type.
#[derive(Clone, PartialEq, Eq)]
pub enum ConnectorConfig {
    Lnd(LndConfig),
    LndHub(LndHubConfig),
    LnBits(LnBitsConfig),
    Native,
}

impl ConnectorConfig {
    pub fn connector_type(&self) -> ConnectorType {
        match self {
            Self::Lnd(_) => ConnectorType::Lnd,
            Self::LndHub(_) => ConnectorType::Lndhub,
            Self::LnBits(_) => ConnectorType::Lnbits,
            Self::Native => ConnectorType::Native,
        }
    }

    /// Reject configs with empty required fields.
    pub fn validate(&self) -> Result<()> {
        let required: Vec<(&str, &str)> = match self {
            Self::Lnd(c) => vec![("macaroon", c.macaroon.as_str()), ("url", c.url.as_str())],
            Self::LndHub(c) => vec![
                ("login", c.login.as_str()),
                ("password", c.password.as_str()),
                ("url", c.url.as_str()),
            ],
            Self::LnBits(c) => vec![
                ("adminkey", c.adminkey.as_str()),
                ("readkey", c.readkey.as_str()),
                ("url", c.url.as_str()),
            ],
            Self::Native => Vec::new(),
        };

        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(LnVaultError::Validation(format!(
                "{} config is missing {}",
                self.connector_type(),
                field
            )));
        }
        Ok(())
    }

    /// Serialize to the JSON bytes that get encrypted.
    pub fn to_plaintext(&self) -> Result<Zeroizing<Vec<u8>>> {
        let bytes = match self {
            Self::Lnd(c) => serde_json::to_vec(c)?,
            Self::LndHub(c) => serde_json::to_vec(c)?,
            Self::LnBits(c) => serde_json::to_vec(c)?,
            Self::Native => serde_json::to_vec(&serde_json::Map::new())?,
        };
        Ok(Zeroizing::new(bytes))
    }

    /// Parse decrypted bytes according to `connector`.
    ///
    /// A shape mismatch is a validation failure; the bytes already passed
    /// authentication, so they are not corrupt ciphertext.
    pub fn from_plaintext(connector: ConnectorType, bytes: &[u8]) -> Result<Self> {
        let invalid =
            |e: serde_json::Error| LnVaultError::Validation(format!("Malformed {} config: {}", connector, e));

        let config = match connector {
            ConnectorType::Lnd => Self::Lnd(serde_json::from_slice(bytes).map_err(invalid)?),
            ConnectorType::Lndhub => Self::LndHub(serde_json::from_slice(bytes).map_err(invalid)?),
            ConnectorType::Lnbits => Self::LnBits(serde_json::from_slice(bytes).map_err(invalid)?),
            ConnectorType::Native => {
                let _: serde_json::Map<String, serde_json::Value> =
                    serde_json::from_slice(bytes).map_err(invalid)?;
                Self::Native
            }
        };
        Ok(config)
    }
}

impl std::fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print credentials; URLs and logins are not secret.
        match self {
            Self::Lnd(c) => f
                .debug_struct("Lnd")
                .field("macaroon", &"[REDACTED]")
                .field("url", &c.url)
                .finish(),
            Self::LndHub(c) => f
                .debug_struct("LndHub")
                .field("login", &c.login)
                .field("password", &"[REDACTED]")
                .field("url", &c.url)
                .finish(),
            Self::LnBits(c) => f
                .debug_struct("LnBits")
                .field("adminkey", &"[REDACTED]")
                .field("readkey", &"[REDACTED]")
                .field("url", &c.url)
                .finish(),
            Self::Native => f.write_str("Native"),
        }
    }
}
