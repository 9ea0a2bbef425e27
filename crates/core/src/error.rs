//! Error types for the wallet connection lifecycle
//!
//! Every failure is recoverable: the worst outcome of any error is a
//! disconnected but usable dashboard. Errors carry a severity and a flag
//! telling the caller whether a user-facing notification is warranted.

use thiserror::Error;

/// Main error type for wallet operations
#[derive(Error, Debug)]
pub enum WalletError {
    // ── Connection Errors ───────────────────────────────────────────
    #[error("Wallet '{wallet_id}' is not installed or not detected")]
    ProviderUnavailable { wallet_id: String },

    #[error("Connection to '{wallet_id}' rejected by user (code {code:?})")]
    UserRejected { wallet_id: String, code: Option<i64> },

    #[error("Wallet did not respond within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("A connection attempt is already in progress")]
    AlreadyInProgress,

    #[error("Already connected to '{wallet_id}'; disconnect first")]
    AlreadyConnected { wallet_id: String },

    #[error("No wallet connected")]
    NotConnected,

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Wallet provider error: {0}")]
    Provider(String),

    // ── Persistence Errors ──────────────────────────────────────────
    #[error("Stored session is stale or malformed: {0}")]
    StaleSession(String),

    #[error("Refusing to persist incomplete session: {0}")]
    InvalidSession(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // ── Feed Errors ─────────────────────────────────────────────────
    #[error("Balance fetch failed: {0}")]
    BalanceFetch(String),

    #[error("Price fetch failed: {0}")]
    PriceFetch(String),

    #[error("HTTP request error: {0}")]
    Http(String),

    // ── Infrastructure Errors ───────────────────────────────────────
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ── Severity & Classification ───────────────────────────────────────

/// Error severity level for logging and notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Transient issue, will retry automatically
    Warning,
    /// Operational error, surfaced to the user
    Error,
}

impl WalletError {
    /// Returns true if this error is retryable (transient network/timeout issues)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WalletError::Timeout { .. }
                | WalletError::Http(_)
                | WalletError::BalanceFetch(_)
                | WalletError::PriceFetch(_)
        )
    }

    /// Returns true if the user should see a transient notification.
    ///
    /// Stale sessions are an expected startup path and stay silent.
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            WalletError::StaleSession(_) | WalletError::NotConnected
        )
    }

    /// Returns severity level for logging and notifications
    pub fn severity(&self) -> ErrorSeverity {
        if self.is_retryable() {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Error
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for WalletError {
    fn from(e: reqwest::Error) -> Self {
        WalletError::Http(e.to_string())
    }
}

/// Result type alias for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;

// ── Retry Logic ─────────────────────────────────────────────────────

/// Retry a fallible async operation with exponential backoff.
///
/// Only retries errors where `WalletError::is_retryable()` returns true.
/// Non-retryable errors are returned immediately.
///
/// # Example
/// ```no_run
/// use sniper_wallet_core::error::retry_with_backoff;
/// use std::time::Duration;
/// let result = retry_with_backoff(|| async { Ok(42u64) }, 3, Duration::from_millis(500));
/// ```
pub async fn retry_with_backoff<F, Fut, T>(
    mut f: F,
    max_attempts: u32,
    base_delay: std::time::Duration,
) -> WalletResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = WalletResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt + 1 >= max_attempts => {
                return Err(e);
            }
            Err(e) => {
                attempt += 1;
                let delay = base_delay * 2u32.pow(attempt - 1);
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    next_retry_ms = delay.as_millis() as u64,
                    "Retryable error, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
