//! In-process wallet provider and injected scope
//!
//! `MemoryProvider` behaves like a browser wallet extension: it remembers
//! whether the origin was approved, answers trust-only connects accordingly
//! and pushes `disconnect`/`accountChanged` events. The dashboard uses it to
//! expose a key from the environment; tests script it to reject, fail or hang.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use super::registry::InjectedScope;
use super::{ConnectOptions, ProviderError, ProviderEvent, ProviderHandle, USER_REJECTED_CODE};

/// How the wallet answers the next connect call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    Approve,
    Reject,
    Fail(String),
    /// Never answers
    Hang,
}

pub struct MemoryProvider {
    public_key: RwLock<Option<String>>,
    behavior: RwLock<ConnectBehavior>,
    claims: Option<Vec<String>>,
    latency: Duration,
    trusted: AtomicBool,
    connected: AtomicBool,
    connect_calls: AtomicU32,
    disconnect_calls: AtomicU32,
    events: broadcast::Sender<ProviderEvent>,
}

impl MemoryProvider {
    pub fn new(public_key: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            public_key: RwLock::new(Some(public_key.into())),
            behavior: RwLock::new(ConnectBehavior::Approve),
            claims: None,
            latency: Duration::ZERO,
            trusted: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            connect_calls: AtomicU32::new(0),
            disconnect_calls: AtomicU32::new(0),
            events,
        }
    }

    /// Only identify as the given wallets (brand flags)
    pub fn claiming(mut self, wallet_ids: &[&str]) -> Self {
        self.claims = Some(wallet_ids.iter().map(|id| id.to_string()).collect());
        self
    }

    /// Origin already approved, so trust-only connects succeed
    pub fn trusted(self) -> Self {
        self.trusted.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_behavior(self, behavior: ConnectBehavior) -> Self {
        self.set_behavior(behavior);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *self.behavior.write().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    /// `None` makes connect answer without a key
    pub fn set_public_key(&self, public_key: Option<String>) {
        *self.public_key.write().unwrap_or_else(PoisonError::into_inner) = public_key;
    }

    pub fn revoke_trust(&self) {
        self.trusted.store(false, Ordering::SeqCst);
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Push an event to subscribers; returns how many received it
    pub fn emit(&self, event: ProviderEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    /// Simulate the user switching accounts inside the wallet
    pub fn switch_account(&self, public_key: Option<&str>) -> usize {
        self.set_public_key(public_key.map(str::to_string));
        self.emit(ProviderEvent::AccountChanged(public_key.map(|k| json!(k))))
    }

    /// Simulate the wallet dropping the connection on its own
    pub fn drop_connection(&self) -> usize {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(ProviderEvent::Disconnect)
    }

    fn behavior(&self) -> ConnectBehavior {
        self.behavior
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn response(&self) -> Value {
        match self
            .public_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
        {
            Some(key) => json!({ "publicKey": key }),
            None => json!({}),
        }
    }
}

#[async_trait]
impl ProviderHandle for MemoryProvider {
    async fn connect(&self, options: ConnectOptions) -> Result<Value, ProviderError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.behavior() {
            ConnectBehavior::Hang => std::future::pending().await,
            ConnectBehavior::Reject => Err(ProviderError::rejected()),
            ConnectBehavior::Fail(message) => Err(ProviderError::new(Some(-32603), message)),
            ConnectBehavior::Approve => {
                if options.only_if_trusted && !self.is_trusted() {
                    return Err(ProviderError::new(
                        Some(USER_REJECTED_CODE),
                        "Origin not trusted",
                    ));
                }
                self.trusted.store(true, Ordering::SeqCst);
                self.connected.store(true, Ordering::SeqCst);
                let response = self.response();
                self.emit(ProviderEvent::Connect(Some(response.clone())));
                Ok(response)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), ProviderError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.emit(ProviderEvent::Disconnect);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    fn identifies_as(&self, wallet_id: &str) -> bool {
        match &self.claims {
            Some(claims) => claims.iter().any(|c| c == wallet_id),
            None => true,
        }
    }
}

/// Namespace table standing in for the page's global scope
#[derive(Default)]
pub struct MemoryScope {
    providers: RwLock<HashMap<String, Arc<dyn ProviderHandle>>>,
}

impl MemoryScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, namespace: &str, provider: Arc<dyn ProviderHandle>) {
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace.to_string(), provider);
    }

    /// Simulate the extension being removed
    pub fn remove(&self, namespace: &str) -> bool {
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(namespace)
            .is_some()
    }
}

impl InjectedScope for MemoryScope {
    fn resolve(&self, namespace: &str) -> Option<Arc<dyn ProviderHandle>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "So11111111111111111111111111111111111111112";

    #[tokio::test]
    async fn test_untrusted_origin_refuses_silent_connect() {
        let provider = MemoryProvider::new(KEY);
        let err = provider
            .connect(ConnectOptions::trusted_only())
            .await
            .unwrap_err();
        assert!(err.is_rejection());

        provider.connect(ConnectOptions::interactive()).await.unwrap();
        assert!(provider.is_trusted());
        assert!(provider.connect(ConnectOptions::trusted_only()).await.is_ok());
        assert_eq!(provider.connect_calls(), 3);
    }

    #[tokio::test]
    async fn test_account_switch_emits_event() {
        let provider = MemoryProvider::new(KEY);
        let mut rx = provider.subscribe();
        assert_eq!(provider.switch_account(None), 1);
        assert_eq!(rx.recv().await.unwrap(), ProviderEvent::AccountChanged(None));
    }

    #[test]
    fn test_scope_resolve_and_remove() {
        let scope = MemoryScope::new();
        scope.inject("glow", MemoryProvider::new(KEY).shared());
        assert!(scope.resolve("glow").is_some());
        assert!(scope.remove("glow"));
        assert!(scope.resolve("glow").is_none());
    }
}
