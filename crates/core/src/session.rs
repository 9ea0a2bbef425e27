//! Connection session state machine
//!
//! `Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected`.
//!
//! One `WalletSession` owns the only session object. Explicit calls
//! (`connect`, `disconnect`) and wallet-originated events (`disconnect`,
//! `accountChanged`) all end up in [`WalletSession::apply`], so a session torn
//! down by the wallet looks exactly like one torn down by the user.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::events::{DisconnectOrigin, EventBus, NoticeLevel, WalletEvent};
use crate::persistence::SessionStore;
use crate::provider::registry::{
    DetectedWallet, InjectedScope, WalletRegistry, DEFAULT_PROVIDER_WAIT,
};
use crate::provider::{extract_public_key, ConnectOptions, ProviderEvent, ProviderHandle};
use crate::types::{ConnectionState, Session};
use crate::{WalletError, WalletResult};

/// Default bound on a wallet connect call
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Single entry point for every state change
enum Transition {
    Established {
        wallet_id: String,
        public_key: String,
        handle: Arc<dyn ProviderHandle>,
        restored: bool,
    },
    AccountChanged {
        public_key: String,
    },
    Released {
        origin: DisconnectOrigin,
    },
}

struct Active {
    session: Session,
    handle: Arc<dyn ProviderHandle>,
    generation: u64,
    listener: Option<JoinHandle<()>>,
}

struct SessionState {
    phase: ConnectionState,
    active: Option<Active>,
    generation: u64,
}

struct Inner {
    registry: WalletRegistry,
    scope: Arc<dyn InjectedScope>,
    sessions: SessionStore,
    bus: Arc<EventBus>,
    connect_timeout: Duration,
    provider_wait: Duration,
    state: Mutex<SessionState>,
    phase_tx: watch::Sender<ConnectionState>,
    session_tx: watch::Sender<Option<Session>>,
}

/// Builder for [`WalletSession`]
pub struct WalletSessionBuilder {
    registry: WalletRegistry,
    scope: Arc<dyn InjectedScope>,
    sessions: SessionStore,
    bus: Arc<EventBus>,
    connect_timeout: Duration,
    provider_wait: Duration,
}

impl WalletSessionBuilder {
    pub fn registry(mut self, registry: WalletRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// How long a startup reconnect waits for the wallet to inject itself
    pub fn provider_wait(mut self, wait: Duration) -> Self {
        self.provider_wait = wait;
        self
    }

    pub fn build(self) -> WalletSession {
        let (phase_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (session_tx, _) = watch::channel(None);
        WalletSession {
            inner: Arc::new(Inner {
                registry: self.registry,
                scope: self.scope,
                sessions: self.sessions,
                bus: self.bus,
                connect_timeout: self.connect_timeout,
                provider_wait: self.provider_wait,
                state: Mutex::new(SessionState {
                    phase: ConnectionState::Disconnected,
                    active: None,
                    generation: 0,
                }),
                phase_tx,
                session_tx,
            }),
        }
    }
}

/// The page's one wallet connection. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WalletSession {
    inner: Arc<Inner>,
}

impl WalletSession {
    pub fn builder(scope: Arc<dyn InjectedScope>, sessions: SessionStore) -> WalletSessionBuilder {
        WalletSessionBuilder {
            registry: WalletRegistry::default(),
            scope,
            sessions,
            bus: Arc::new(EventBus::default()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            provider_wait: DEFAULT_PROVIDER_WAIT,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.phase_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.phase_tx.subscribe()
    }

    /// The active session, if any
    pub fn current(&self) -> Option<Session> {
        self.inner.session_tx.borrow().clone()
    }

    pub fn watch_session(&self) -> watch::Receiver<Option<Session>> {
        self.inner.session_tx.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.inner.bus.subscribe()
    }

    pub fn registry(&self) -> &WalletRegistry {
        &self.inner.registry
    }

    pub(crate) fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    /// Which supported wallets are installed right now
    pub fn detect_all(&self) -> Vec<DetectedWallet> {
        self.inner.registry.detect_all(self.inner.scope.as_ref())
    }

    /// Wait up to the configured bound for `wallet_id` to be injected
    pub(crate) async fn wait_for_provider(&self, wallet_id: &str) -> bool {
        self.inner
            .registry
            .wait_for(wallet_id, self.inner.scope.as_ref(), self.inner.provider_wait)
            .await
            .map_or(false, |w| w.installed)
    }

    /// Connect to `wallet_id`, prompting the user through the wallet.
    pub async fn connect(&self, wallet_id: &str) -> WalletResult<Session> {
        self.begin_connect().await?;
        tracing::info!(wallet = wallet_id, "Connecting wallet");

        let outcome = match self.establish(wallet_id, ConnectOptions::interactive()).await {
            Ok((handle, public_key)) => {
                self.finish_connect(wallet_id, public_key, handle, false)
                    .await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(session) => {
                self.notify(
                    NoticeLevel::Success,
                    format!("Connected to {} wallet", self.display_name(wallet_id)),
                );
                Ok(session)
            }
            Err(e) => {
                self.abort_connect().await;
                tracing::warn!(wallet = wallet_id, error = %e, "Wallet connection failed");
                if e.is_user_facing() {
                    self.notify(e.severity().into(), self.failure_message(&e));
                }
                Err(e)
            }
        }
    }

    /// End the session. Calling while already disconnected is a no-op.
    pub async fn disconnect(&self) -> WalletResult<()> {
        let mut st = self.inner.state.lock().await;
        match st.phase {
            ConnectionState::Disconnected => Ok(()),
            ConnectionState::Connecting | ConnectionState::Disconnecting => {
                Err(WalletError::AlreadyInProgress)
            }
            ConnectionState::Connected => self
                .apply(
                    &mut st,
                    Transition::Released {
                        origin: DisconnectOrigin::User,
                    },
                )
                .await
                .map(|_| ()),
        }
    }

    // ── Shared connect steps (also used by the reconnect flow) ─────────

    /// Claim the `Connecting` phase or fail fast
    pub(crate) async fn begin_connect(&self) -> WalletResult<()> {
        let mut st = self.inner.state.lock().await;
        match st.phase {
            ConnectionState::Connecting | ConnectionState::Disconnecting => {
                Err(WalletError::AlreadyInProgress)
            }
            ConnectionState::Connected => Err(WalletError::AlreadyConnected {
                wallet_id: st
                    .active
                    .as_ref()
                    .map(|a| a.session.wallet_id.clone())
                    .unwrap_or_default(),
            }),
            ConnectionState::Disconnected => {
                self.set_phase(&mut st, ConnectionState::Connecting);
                Ok(())
            }
        }
    }

    /// Resolve the wallet and ask it for a key, bounded by the connect timeout
    pub(crate) async fn establish(
        &self,
        wallet_id: &str,
        options: ConnectOptions,
    ) -> WalletResult<(Arc<dyn ProviderHandle>, String)> {
        let handle = self
            .inner
            .registry
            .detect(wallet_id, self.inner.scope.as_ref())
            .and_then(|w| w.handle)
            .ok_or_else(|| WalletError::ProviderUnavailable {
                wallet_id: wallet_id.to_string(),
            })?;

        let timeout = self.inner.connect_timeout;
        let response = tokio::time::timeout(timeout, handle.connect(options))
            .await
            .map_err(|_| WalletError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| {
                if e.is_rejection() {
                    WalletError::UserRejected {
                        wallet_id: wallet_id.to_string(),
                        code: e.code,
                    }
                } else {
                    WalletError::Provider(e.to_string())
                }
            })?;

        let public_key = extract_public_key(&response)?;
        Ok((handle, public_key))
    }

    pub(crate) async fn finish_connect(
        &self,
        wallet_id: &str,
        public_key: String,
        handle: Arc<dyn ProviderHandle>,
        restored: bool,
    ) -> WalletResult<Session> {
        let mut st = self.inner.state.lock().await;
        let session = self
            .apply(
                &mut st,
                Transition::Established {
                    wallet_id: wallet_id.to_string(),
                    public_key,
                    handle,
                    restored,
                },
            )
            .await?;
        session.ok_or(WalletError::NotConnected)
    }

    /// Return to `Disconnected` after a failed attempt
    pub(crate) async fn abort_connect(&self) {
        let mut st = self.inner.state.lock().await;
        if st.phase == ConnectionState::Connecting {
            self.set_phase(&mut st, ConnectionState::Disconnected);
        }
    }

    // ── Transitions ────────────────────────────────────────────────────

    async fn apply(
        &self,
        st: &mut SessionState,
        transition: Transition,
    ) -> WalletResult<Option<Session>> {
        match transition {
            Transition::Established {
                wallet_id,
                public_key,
                handle,
                restored,
            } => {
                if st.phase != ConnectionState::Connecting {
                    return Err(WalletError::AlreadyInProgress);
                }
                let session = Session::new(&wallet_id, &public_key, self.inner.sessions.now_ms());
                if let Err(e) = self.inner.sessions.save(&session).await {
                    tracing::warn!(error = %e, "Failed to persist session");
                }

                st.generation += 1;
                let listener = self.spawn_listener(&handle, st.generation);
                st.active = Some(Active {
                    session: session.clone(),
                    handle,
                    generation: st.generation,
                    listener: Some(listener),
                });
                self.set_phase(st, ConnectionState::Connected);
                self.inner.session_tx.send_replace(Some(session.clone()));

                tracing::info!(
                    wallet = %wallet_id,
                    key = %session.short_key(),
                    restored,
                    "Wallet connected"
                );
                self.inner.bus.publish(WalletEvent::Connected {
                    wallet_id,
                    public_key,
                    restored,
                });
                Ok(Some(session))
            }

            Transition::AccountChanged { public_key } => {
                let now = self.inner.sessions.now_ms();
                let Some(active) = st.active.as_mut() else {
                    return Ok(None);
                };
                if active.session.public_key == public_key {
                    return Ok(Some(active.session.clone()));
                }
                active.session.public_key = public_key.clone();
                active.session.connected_at_ms = now;
                let session = active.session.clone();

                if let Err(e) = self.inner.sessions.save(&session).await {
                    tracing::warn!(error = %e, "Failed to persist account change");
                }
                self.inner.session_tx.send_replace(Some(session.clone()));

                tracing::info!(wallet = %session.wallet_id, key = %session.short_key(), "Wallet account changed");
                self.inner.bus.publish(WalletEvent::AccountChanged {
                    wallet_id: session.wallet_id.clone(),
                    public_key,
                });
                Ok(Some(session))
            }

            Transition::Released { origin } => {
                let Some(mut active) = st.active.take() else {
                    self.set_phase(st, ConnectionState::Disconnected);
                    return Ok(None);
                };
                self.set_phase(st, ConnectionState::Disconnecting);

                if origin == DisconnectOrigin::User {
                    // Listener is parked on the lock we hold, so aborting is safe
                    if let Some(listener) = active.listener.take() {
                        listener.abort();
                    }
                    let timeout = self.inner.connect_timeout;
                    match tokio::time::timeout(timeout, active.handle.disconnect()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::warn!(error = %e, "Wallet disconnect call failed"),
                        Err(_) => tracing::warn!("Wallet disconnect call timed out"),
                    }
                }

                if let Err(e) = self.inner.sessions.clear().await {
                    tracing::warn!(error = %e, "Failed to clear persisted session");
                }
                self.set_phase(st, ConnectionState::Disconnected);
                self.inner.session_tx.send_replace(None);

                tracing::info!(wallet = %active.session.wallet_id, ?origin, "Wallet disconnected");
                self.inner.bus.publish(WalletEvent::Disconnected {
                    wallet_id: active.session.wallet_id.clone(),
                    origin,
                });
                self.notify(NoticeLevel::Info, "Wallet disconnected");
                Ok(None)
            }
        }
    }

    /// Feed wallet events into `apply`. Returns false once the session is gone.
    async fn on_provider_event(&self, generation: u64, event: ProviderEvent) -> bool {
        let mut st = self.inner.state.lock().await;
        let current = st.active.as_ref().map(|a| a.generation);
        if current != Some(generation) || st.phase != ConnectionState::Connected {
            tracing::debug!(generation, "Ignoring event from a stale wallet connection");
            return false;
        }

        let transition = match event {
            ProviderEvent::Connect(_) => return true,
            ProviderEvent::Disconnect | ProviderEvent::AccountChanged(None) => {
                Transition::Released {
                    origin: DisconnectOrigin::Provider,
                }
            }
            ProviderEvent::AccountChanged(Some(value)) => match extract_public_key(&value) {
                Ok(public_key) => Transition::AccountChanged { public_key },
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring account change without a usable key");
                    return true;
                }
            },
        };

        let released = matches!(transition, Transition::Released { .. });
        if let Err(e) = self.apply(&mut st, transition).await {
            tracing::warn!(error = %e, "Wallet event transition failed");
        }
        !released
    }

    fn spawn_listener(&self, handle: &Arc<dyn ProviderHandle>, generation: u64) -> JoinHandle<()> {
        let mut rx = handle.subscribe();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Wallet event listener lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else { break };
                let session = WalletSession { inner };
                if !session.on_provider_event(generation, event).await {
                    break;
                }
            }
        })
    }

    fn set_phase(&self, st: &mut SessionState, phase: ConnectionState) {
        st.phase = phase;
        self.inner.phase_tx.send_replace(phase);
    }

    fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.inner.bus.publish(WalletEvent::notice(level, message));
    }

    /// Notification text; a missing wallet comes with where to get it
    fn failure_message(&self, error: &WalletError) -> String {
        match error {
            WalletError::ProviderUnavailable { wallet_id } => {
                match self.inner.registry.descriptor(wallet_id) {
                    Some(d) => format!(
                        "{} wallet not found. Install it from {}",
                        d.display_name, d.install_url
                    ),
                    None => format!("Please install {} wallet to continue", wallet_id),
                }
            }
            other => other.to_string(),
        }
    }

    fn display_name(&self, wallet_id: &str) -> String {
        self.inner
            .registry
            .descriptor(wallet_id)
            .map(|d| d.display_name.to_string())
            .unwrap_or_else(|| wallet_id.to_string())
    }
}
