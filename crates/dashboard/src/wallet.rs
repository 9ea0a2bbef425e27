//! Environment-provided wallet
//!
//! There is no browser here, so the "installed extension" is a key taken from
//! the environment and exposed through an in-memory provider under the chosen
//! wallet's namespace.

use std::env;
use std::sync::Arc;

use anyhow::{bail, Result};
use sniper_wallet_core::provider::memory::{MemoryProvider, MemoryScope};
use sniper_wallet_core::provider::registry::WalletRegistry;
use sniper_wallet_core::validate_public_key;
use tracing::{info, warn};

/// Wallet settings read from `WALLET_*` variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvWallet {
    pub public_key: Option<String>,
    pub wallet_id: String,
    /// Origin counts as previously approved, so silent reconnect works
    pub trusted: bool,
    /// Connect on startup when nothing was restored
    pub autoconnect: bool,
}

impl EnvWallet {
    pub fn from_env() -> Self {
        let flag = |name: &str, default: bool| {
            env::var(name)
                .map(|v| v == "true" || v == "1")
                .unwrap_or(default)
        };

        Self {
            public_key: env::var("WALLET_PUBKEY").ok().filter(|k| !k.trim().is_empty()),
            wallet_id: env::var("WALLET_PROVIDER").unwrap_or_else(|_| "phantom".to_string()),
            trusted: flag("WALLET_TRUSTED", true),
            autoconnect: flag("WALLET_AUTOCONNECT", false),
        }
    }

    /// Build the injected scope. Without a key nothing is installed.
    pub fn scope(&self, registry: &WalletRegistry) -> Result<Arc<MemoryScope>> {
        let scope = Arc::new(MemoryScope::new());

        let Some(key) = &self.public_key else {
            warn!("WALLET_PUBKEY not set. No wallet will be detected.");
            return Ok(scope);
        };
        let key = validate_public_key(key)?;

        let Some(descriptor) = registry.descriptor(&self.wallet_id) else {
            let known: Vec<_> = registry.wallets().iter().map(|w| w.id).collect();
            bail!(
                "Unknown WALLET_PROVIDER {:?} (expected one of {})",
                self.wallet_id,
                known.join(", ")
            );
        };
        let Some(namespace) = descriptor.namespaces.first() else {
            bail!("Wallet {} has no namespace to inject into", descriptor.id);
        };

        let mut provider = MemoryProvider::new(key.clone()).claiming(&[descriptor.id]);
        if self.trusted {
            provider = provider.trusted();
        }
        scope.inject(namespace, provider.shared());

        info!(
            "👛 {} wallet available at {} ({})",
            descriptor.display_name,
            namespace,
            sniper_wallet_core::shorten_key(&key)
        );
        Ok(scope)
    }
}
