//! Supported wallets and detection
//!
//! Detection looks each wallet's namespaces up in the injected scope, in
//! declaration order, and the first namespace that resolves to a provider
//! claiming the wallet wins.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::ProviderHandle;

/// The global scope wallet extensions inject into
pub trait InjectedScope: Send + Sync {
    fn resolve(&self, namespace: &str) -> Option<Arc<dyn ProviderHandle>>;
}

/// Static description of a supported wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    /// Lookup paths, most specific first
    pub namespaces: &'static [&'static str],
    pub install_url: &'static str,
}

pub const PHANTOM: WalletDescriptor = WalletDescriptor {
    id: "phantom",
    display_name: "Phantom",
    namespaces: &["phantom.solana", "solana"],
    install_url: "https://phantom.app/download",
};

pub const SOLFLARE: WalletDescriptor = WalletDescriptor {
    id: "solflare",
    display_name: "Solflare",
    namespaces: &["solflare"],
    install_url: "https://solflare.com/download",
};

pub const BACKPACK: WalletDescriptor = WalletDescriptor {
    id: "backpack",
    display_name: "Backpack",
    namespaces: &["backpack.xnft.solana", "backpack"],
    install_url: "https://www.backpack.app/download",
};

pub const GLOW: WalletDescriptor = WalletDescriptor {
    id: "glow",
    display_name: "Glow",
    namespaces: &["glow"],
    install_url: "https://glow.app/download",
};

/// How long reconnect waits for a late-injected wallet
pub const DEFAULT_PROVIDER_WAIT: Duration = Duration::from_secs(5);

/// Gap between injection probes while waiting
pub const PROVIDER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Detection result for one wallet
#[derive(Clone)]
pub struct DetectedWallet {
    pub descriptor: WalletDescriptor,
    pub installed: bool,
    pub handle: Option<Arc<dyn ProviderHandle>>,
}

impl fmt::Debug for DetectedWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectedWallet")
            .field("id", &self.descriptor.id)
            .field("installed", &self.installed)
            .finish()
    }
}

/// Ordered list of supported wallets
#[derive(Debug, Clone)]
pub struct WalletRegistry {
    wallets: Vec<WalletDescriptor>,
}

impl WalletRegistry {
    pub fn with_wallets(wallets: Vec<WalletDescriptor>) -> Self {
        Self { wallets }
    }

    pub fn wallets(&self) -> &[WalletDescriptor] {
        &self.wallets
    }

    pub fn descriptor(&self, wallet_id: &str) -> Option<&WalletDescriptor> {
        self.wallets.iter().find(|w| w.id == wallet_id)
    }

    /// Probe every supported wallet. Never fails; missing wallets come back
    /// with `installed: false`.
    pub fn detect_all(&self, scope: &dyn InjectedScope) -> Vec<DetectedWallet> {
        let detected: Vec<DetectedWallet> = self
            .wallets
            .iter()
            .map(|descriptor| Self::probe(descriptor, scope))
            .collect();

        tracing::info!(
            installed = detected.iter().filter(|w| w.installed).count(),
            supported = detected.len(),
            "Wallet detection complete"
        );
        detected
    }

    /// Probe one wallet by id; unknown ids yield `None`
    pub fn detect(&self, wallet_id: &str, scope: &dyn InjectedScope) -> Option<DetectedWallet> {
        self.descriptor(wallet_id)
            .map(|descriptor| Self::probe(descriptor, scope))
    }

    /// Re-probe one wallet every [`PROVIDER_POLL_INTERVAL`] until it is
    /// installed or `timeout` runs out. Unknown ids return `None` at once.
    pub async fn wait_for(
        &self,
        wallet_id: &str,
        scope: &dyn InjectedScope,
        timeout: Duration,
    ) -> Option<DetectedWallet> {
        let descriptor = self.descriptor(wallet_id)?;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut interval = tokio::time::interval(PROVIDER_POLL_INTERVAL);

        loop {
            interval.tick().await;
            let detected = Self::probe(descriptor, scope);
            if detected.installed {
                return Some(detected);
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::debug!(
                    wallet = wallet_id,
                    waited_ms = timeout.as_millis() as u64,
                    "Wallet never injected"
                );
                return Some(detected);
            }
        }
    }

    fn probe(descriptor: &WalletDescriptor, scope: &dyn InjectedScope) -> DetectedWallet {
        let handle = descriptor.namespaces.iter().find_map(|ns| {
            scope
                .resolve(ns)
                .filter(|handle| handle.identifies_as(descriptor.id))
        });

        tracing::debug!(
            wallet = descriptor.id,
            installed = handle.is_some(),
            "Probed wallet"
        );

        DetectedWallet {
            descriptor: *descriptor,
            installed: handle.is_some(),
            handle,
        }
    }
}

impl Default for WalletRegistry {
    fn default() -> Self {
        Self::with_wallets(vec![PHANTOM, SOLFLARE, BACKPACK, GLOW])
    }
}
