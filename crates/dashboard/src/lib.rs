//! Sniper Wallet Dashboard
//!
//! Headless dashboard that restores or opens a wallet session, keeps its
//! balance fresh and logs everything that happens on the event bus.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use sniper_wallet_core::balance::feeds::{HttpPriceSource, RpcBalanceSource};
use sniper_wallet_core::balance::{BalancePoller, BalanceSource, PollerHandle, PollerSettings, PriceSource};
use sniper_wallet_core::config::WalletConfig;
use sniper_wallet_core::events::{EventBus, NoticeLevel, WalletEvent};
use sniper_wallet_core::persistence::{FileStore, KeyValueStore, SessionStore};
use sniper_wallet_core::provider::registry::InjectedScope;
use sniper_wallet_core::reconnect::ReconnectOutcome;
use sniper_wallet_core::session::WalletSession;
use sniper_wallet_core::shorten_key;

pub mod wallet;

use crate::wallet::EnvWallet;

/// Everything the dashboard runs on
pub struct DashboardApp {
    pub config: WalletConfig,
    pub session: WalletSession,
    pub poller: Arc<BalancePoller>,
    pub bus: Arc<EventBus>,
    /// Subscribed at construction so startup events reach the log
    event_log: Mutex<broadcast::Receiver<WalletEvent>>,
}

impl DashboardApp {
    /// Wire the app with a file-backed session store and live market feeds
    pub async fn from_config(config: WalletConfig, scope: Arc<dyn InjectedScope>) -> Result<Self> {
        let store = Arc::new(FileStore::new(&config.storage_dir).await?);
        let balances = Arc::new(RpcBalanceSource::new(&config.solana_rpc_url));
        let prices = Arc::new(HttpPriceSource::from_config(&config));
        Ok(Self::with_parts(config, scope, store, balances, prices))
    }

    pub fn with_parts(
        config: WalletConfig,
        scope: Arc<dyn InjectedScope>,
        store: Arc<dyn KeyValueStore>,
        balances: Arc<dyn BalanceSource>,
        prices: Arc<dyn PriceSource>,
    ) -> Self {
        let bus = Arc::new(EventBus::default());
        let event_log = Mutex::new(bus.subscribe());
        let sessions = SessionStore::new(store).with_ttl(config.session_ttl());
        let session = WalletSession::builder(scope, sessions)
            .event_bus(bus.clone())
            .connect_timeout(config.connect_timeout())
            .provider_wait(config.provider_wait())
            .build();
        let poller = Arc::new(BalancePoller::new(
            balances,
            prices,
            bus.clone(),
            PollerSettings::from(&config),
        ));

        Self {
            config,
            session,
            poller,
            bus,
            event_log,
        }
    }

    /// Detection, silent reconnect, then an optional explicit connect
    pub async fn start(&self, wallet: &EnvWallet) -> ReconnectOutcome {
        for detected in self.session.detect_all() {
            if detected.installed {
                info!("🔌 Detected wallet: {}", detected.descriptor.display_name);
            } else {
                debug!(
                    "{} not installed ({})",
                    detected.descriptor.display_name, detected.descriptor.install_url
                );
            }
        }

        let outcome = self.session.reconnect().await;
        match &outcome {
            ReconnectOutcome::Restored(session) => {
                info!("🔁 Restored {} session for {}", session.wallet_id, session.short_key())
            }
            other => debug!("No session restored: {:?}", other),
        }

        if wallet.autoconnect && !outcome.is_restored() {
            if let Err(e) = self.session.connect(&wallet.wallet_id).await {
                warn!("Auto-connect to {} failed: {}", wallet.wallet_id, e);
            }
        }
        outcome
    }

    /// Poll and log events until `shutdown` resolves, returning how many
    /// lines were logged. Events queued since construction are logged
    /// first. The session stays persisted so the next start can restore it.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<usize>
    where
        F: Future<Output = ()>,
    {
        let poller: PollerHandle = self.poller.clone().spawn(&self.session);
        let mut events = self.event_log.lock().await;
        let mut logged = 0;
        tokio::pin!(shutdown);

        info!("📡 Dashboard running. Press Ctrl-C to stop.");
        loop {
            tokio::select! {
                biased;

                event = events.recv() => match event {
                    Ok(event) => {
                        if log_event(&event) {
                            logged += 1;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Event log skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = &mut shutdown => break,
            }
        }

        poller.shutdown().await;
        info!("👋 Dashboard stopped");
        Ok(logged)
    }
}

/// One log line per event; simulated display ticks are too chatty to log
pub fn describe_event(event: &WalletEvent) -> Option<String> {
    match event {
        WalletEvent::Connected {
            wallet_id,
            public_key,
            restored,
        } => Some(format!(
            "✅ {} {} ({})",
            wallet_id,
            if *restored { "reconnected" } else { "connected" },
            shorten_key(public_key)
        )),
        WalletEvent::AccountChanged {
            wallet_id,
            public_key,
        } => Some(format!("🔄 {} switched to {}", wallet_id, shorten_key(public_key))),
        WalletEvent::Disconnected { wallet_id, origin } => {
            Some(format!("🔌 {} disconnected ({:?})", wallet_id, origin))
        }
        WalletEvent::BalanceUpdated {
            lamports,
            fiat_price,
            ..
        } => {
            let sol = sniper_wallet_core::lamports_to_sol(*lamports);
            Some(format!(
                "💰 {} SOL @ {} = {}",
                sol.round_dp(4).normalize(),
                format_usd(*fiat_price),
                format_usd(sniper_wallet_core::fiat_value(sol, *fiat_price))
            ))
        }
        WalletEvent::DisplayTick(_) => None,
        WalletEvent::Notification { level, message } => Some(format!("[{:?}] {}", level, message)),
    }
}

fn log_event(event: &WalletEvent) -> bool {
    let Some(line) = describe_event(event) else {
        return false;
    };
    match event {
        WalletEvent::Notification {
            level: NoticeLevel::Error,
            ..
        } => error!("{}", line),
        WalletEvent::Notification {
            level: NoticeLevel::Warning,
            ..
        } => warn!("{}", line),
        _ => info!("{}", line),
    }
    true
}

pub fn format_usd(value: Decimal) -> String {
    format!("${:.2}", value)
}
