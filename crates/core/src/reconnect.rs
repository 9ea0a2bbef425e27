//! Startup reconnect
//!
//! Restores the previous session without prompting the user. Every failure
//! path is silent: the persisted record is dropped and the session stays
//! `Disconnected`.

use crate::provider::ConnectOptions;
use crate::session::WalletSession;
use crate::types::Session;

/// Result of a startup reconnect attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Nothing persisted, or the record was stale
    NoSession,
    /// The persisted wallet is no longer installed
    ProviderMissing { wallet_id: String },
    /// The wallet refused a trust-only connect, timed out, or answered badly
    Rejected { wallet_id: String },
    Restored(Session),
    /// A session is already active or being established
    Busy,
}

impl ReconnectOutcome {
    pub fn is_restored(&self) -> bool {
        matches!(self, ReconnectOutcome::Restored(_))
    }
}

impl WalletSession {
    /// Try to restore the persisted session with a trust-only connect.
    pub async fn reconnect(&self) -> ReconnectOutcome {
        let persisted = match self.sessions().load().await {
            Ok(Some(session)) => session,
            Ok(None) => return ReconnectOutcome::NoSession,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read persisted session");
                return ReconnectOutcome::NoSession;
            }
        };
        let wallet_id = persisted.wallet_id.clone();

        // Extensions can inject after startup, so give the wallet a moment
        if !self.wait_for_provider(&wallet_id).await {
            tracing::info!(wallet = %wallet_id, "Persisted wallet not installed, dropping session");
            self.forget().await;
            return ReconnectOutcome::ProviderMissing { wallet_id };
        }

        if self.begin_connect().await.is_err() {
            tracing::debug!(wallet = %wallet_id, "Skipping reconnect, session busy");
            return ReconnectOutcome::Busy;
        }

        let restored = match self
            .establish(&wallet_id, ConnectOptions::trusted_only())
            .await
        {
            Ok((handle, public_key)) => {
                self.finish_connect(&wallet_id, public_key, handle, true)
                    .await
            }
            Err(e) => Err(e),
        };

        match restored {
            Ok(session) => {
                tracing::info!(wallet = %wallet_id, key = %session.short_key(), "🔁 Session restored");
                ReconnectOutcome::Restored(session)
            }
            Err(e) => {
                self.abort_connect().await;
                tracing::info!(wallet = %wallet_id, reason = %e, "Silent reconnect failed");
                self.forget().await;
                ReconnectOutcome::Rejected { wallet_id }
            }
        }
    }

    async fn forget(&self) {
        if let Err(e) = self.sessions().clear().await {
            tracing::warn!(error = %e, "Failed to clear persisted session");
        }
    }
}
