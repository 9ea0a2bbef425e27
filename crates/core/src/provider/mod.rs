//! Wallet provider abstraction
//!
//! Browser wallets inject a loosely-typed API object into the page. Here that
//! object is a [`ProviderHandle`]: connect/disconnect plus an event stream.
//! Responses are raw JSON and are checked field by field before use.

pub mod memory;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::validate_public_key;
use crate::{WalletError, WalletResult};

/// EIP-1193 style "user rejected the request" code used by Solana wallets
pub const USER_REJECTED_CODE: i64 = 4001;

/// Options for `ProviderHandle::connect`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOptions {
    /// Only succeed if the origin was previously approved; never prompt
    pub only_if_trusted: bool,
}

impl ConnectOptions {
    pub fn interactive() -> Self {
        Self {
            only_if_trusted: false,
        }
    }

    pub fn trusted_only() -> Self {
        Self {
            only_if_trusted: true,
        }
    }
}

/// Error as reported by the wallet itself
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code:?})")]
pub struct ProviderError {
    pub code: Option<i64>,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn rejected() -> Self {
        Self::new(Some(USER_REJECTED_CODE), "User rejected the request.")
    }

    pub fn is_rejection(&self) -> bool {
        self.code == Some(USER_REJECTED_CODE) || self.message.to_lowercase().contains("rejected")
    }
}

/// Events a wallet pushes on its own
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Connect(Option<Value>),
    Disconnect,
    /// `None` means the wallet no longer exposes an account
    AccountChanged(Option<Value>),
}

/// An injected wallet API
#[async_trait]
pub trait ProviderHandle: Send + Sync {
    /// Ask the wallet for its public key; the response shape is wallet-defined
    async fn connect(&self, options: ConnectOptions) -> Result<Value, ProviderError>;

    async fn disconnect(&self) -> Result<(), ProviderError>;

    /// Subscribe to wallet-originated events. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;

    /// Brand flag check (`isPhantom`, `isSolflare`, ...). Shared namespaces
    /// like `window.solana` can be claimed by several wallets.
    fn identifies_as(&self, _wallet_id: &str) -> bool {
        true
    }
}

/// Pull a validated base58 public key out of a connect response or event payload.
///
/// Accepts a bare string, `{ "publicKey": "<base58>" }`, or
/// `{ "publicKey": { "base58": "<base58>" } }`.
pub fn extract_public_key(value: &Value) -> WalletResult<String> {
    let candidate = match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => match map.get("publicKey") {
            Some(Value::String(s)) => Some(s.as_str()),
            Some(Value::Object(inner)) => inner.get("base58").and_then(Value::as_str),
            _ => None,
        },
        _ => None,
    };

    match candidate {
        Some(key) => validate_public_key(key),
        None => Err(WalletError::InvalidPublicKey(
            "no public key returned from wallet".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: &str = "So11111111111111111111111111111111111111112";

    #[test]
    fn test_extract_public_key_shapes() {
        assert_eq!(extract_public_key(&json!(KEY)).unwrap(), KEY);
        assert_eq!(extract_public_key(&json!({ "publicKey": KEY })).unwrap(), KEY);
        assert_eq!(
            extract_public_key(&json!({ "publicKey": { "base58": KEY } })).unwrap(),
            KEY
        );
    }

    #[test]
    fn test_extract_public_key_rejects_garbage() {
        assert!(extract_public_key(&json!({})).is_err());
        assert!(extract_public_key(&json!(null)).is_err());
        assert!(extract_public_key(&json!({ "publicKey": 42 })).is_err());
        assert!(extract_public_key(&json!({ "publicKey": "not-a-key" })).is_err());
    }

    #[test]
    fn test_rejection_detection() {
        assert!(ProviderError::rejected().is_rejection());
        assert!(ProviderError::new(None, "Request rejected").is_rejection());
        assert!(!ProviderError::new(Some(-32603), "Internal error").is_rejection());
    }
}
