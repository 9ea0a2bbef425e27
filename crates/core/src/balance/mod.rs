//! Balance and price polling
//!
//! Two cadences run while a wallet is connected: an authoritative fetch of
//! lamports and SOL/USD every few seconds, and a fast simulated tick that
//! jitters the displayed price between fetches. Simulated values only ever
//! touch the display; the snapshot is written by real fetches alone.

#[cfg(feature = "http")]
pub mod feeds;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::{Clock, SystemClock};
use crate::config::WalletConfig;
use crate::error::retry_with_backoff;
use crate::events::{EventBus, NoticeLevel, WalletEvent};
use crate::session::WalletSession;
use crate::types::{check_price, BalanceSnapshot, DisplayedBalance};
use crate::{WalletError, WalletResult};

/// Source of account balances
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance_lamports(&self, public_key: &str) -> WalletResult<u64>;
}

/// Source of the SOL/USD price
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn sol_usd(&self) -> WalletResult<Decimal>;
}

/// Fixed-capacity history of displayed prices
#[derive(Debug, Clone)]
pub struct Sparkline {
    points: VecDeque<Decimal>,
    capacity: usize,
}

impl Sparkline {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: Decimal) {
        if self.capacity == 0 {
            return;
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(value);
    }

    pub fn points(&self) -> Vec<Decimal> {
        self.points.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<Decimal> {
        self.points.back().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

/// Poller timing and retry settings
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub poll_interval: Duration,
    pub tick_interval: Duration,
    pub max_drift_bps: u32,
    pub sparkline_points: usize,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            tick_interval: Duration::from_millis(100),
            max_drift_bps: 25,
            sparkline_points: 20,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl From<&WalletConfig> for PollerSettings {
    fn from(config: &WalletConfig) -> Self {
        Self {
            poll_interval: config.balance_poll_interval(),
            tick_interval: config.simulated_tick(),
            max_drift_bps: config.max_price_drift_bps,
            sparkline_points: config.sparkline_points,
            ..Self::default()
        }
    }
}

struct PollerState {
    public_key: Option<String>,
    snapshot: Option<BalanceSnapshot>,
    displayed: Option<DisplayedBalance>,
    sparkline: Sparkline,
}

pub struct BalancePoller {
    balances: Arc<dyn BalanceSource>,
    prices: Arc<dyn PriceSource>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    settings: PollerSettings,
    state: RwLock<PollerState>,
}

impl BalancePoller {
    pub fn new(
        balances: Arc<dyn BalanceSource>,
        prices: Arc<dyn PriceSource>,
        bus: Arc<EventBus>,
        settings: PollerSettings,
    ) -> Self {
        let sparkline = Sparkline::new(settings.sparkline_points);
        Self {
            balances,
            prices,
            bus,
            clock: Arc::new(SystemClock),
            settings,
            state: RwLock::new(PollerState {
                public_key: None,
                snapshot: None,
                displayed: None,
                sparkline,
            }),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    /// Last authoritative fetch
    pub async fn snapshot(&self) -> Option<BalanceSnapshot> {
        self.state.read().await.snapshot.clone()
    }

    /// What a dashboard should show right now
    pub async fn displayed(&self) -> Option<DisplayedBalance> {
        self.state.read().await.displayed.clone()
    }

    pub async fn sparkline(&self) -> Vec<Decimal> {
        self.state.read().await.sparkline.points()
    }

    /// Forget everything about the previous account
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.public_key = None;
        state.snapshot = None;
        state.displayed = None;
        state.sparkline.clear();
    }

    /// Fetch balance and price for `public_key` concurrently.
    ///
    /// A failed fetch is non-fatal: the previous snapshot is kept, the display
    /// snaps back to it and the error is returned for logging.
    pub async fn refresh(&self, public_key: &str) -> WalletResult<BalanceSnapshot> {
        {
            let mut state = self.state.write().await;
            if state.public_key.as_deref() != Some(public_key) {
                state.public_key = Some(public_key.to_string());
                state.snapshot = None;
                state.displayed = None;
                state.sparkline.clear();
            }
        }

        let (lamports, price) = future::join(
            retry_with_backoff(
                || self.balances.balance_lamports(public_key),
                self.settings.retry_attempts,
                self.settings.retry_delay,
            ),
            async { check_price(self.prices.sol_usd().await?) },
        )
        .await;
        let lamports = match lamports {
            Ok(lamports) => lamports,
            Err(e) => return Err(self.fetch_failed(e).await),
        };

        let fiat_price = match price {
            Ok(price) => price,
            Err(e) => {
                let last = self.state.read().await.snapshot.as_ref().map(|s| s.fiat_price);
                match last {
                    Some(price) => {
                        tracing::warn!(error = %e, %price, "Price fetch failed, keeping last price");
                        price
                    }
                    None => return Err(self.fetch_failed(e).await),
                }
            }
        };

        let snapshot = BalanceSnapshot::new(lamports, fiat_price, self.clock.now_ms());
        let displayed = DisplayedBalance::authoritative(&snapshot);
        {
            let mut state = self.state.write().await;
            state.snapshot = Some(snapshot.clone());
            state.displayed = Some(displayed.clone());
            state.sparkline.push(fiat_price);
        }

        tracing::debug!(lamports, sol = %snapshot.sol, %fiat_price, "Balance refreshed");
        self.bus.publish(WalletEvent::BalanceUpdated {
            public_key: public_key.to_string(),
            lamports,
            fiat_price,
        });
        self.bus.publish(WalletEvent::DisplayTick(displayed));
        Ok(snapshot)
    }

    async fn fetch_failed(&self, error: WalletError) -> WalletError {
        tracing::warn!(error = %error, "Balance update failed");

        let restored = {
            let mut state = self.state.write().await;
            let restored = state.snapshot.as_ref().map(DisplayedBalance::authoritative);
            state.displayed = restored.clone();
            restored
        };
        if let Some(displayed) = restored {
            self.bus.publish(WalletEvent::DisplayTick(displayed));
        }
        self.bus.publish(WalletEvent::notice(
            NoticeLevel::Warning,
            "Unable to update balance",
        ));
        error
    }

    /// Move the displayed price one random step, staying within
    /// `max_drift_bps` of the authoritative price. No-op before the first fetch.
    pub async fn simulate_tick(&self) -> Option<DisplayedBalance> {
        let now = self.clock.now_ms();
        let displayed = {
            let mut state = self.state.write().await;
            let snapshot = state.snapshot.clone()?;
            let anchor = snapshot.fiat_price;
            let current = state
                .displayed
                .as_ref()
                .map(|d| d.fiat_price)
                .unwrap_or(anchor);

            let price = drift(anchor, current, self.settings.max_drift_bps);
            let displayed = DisplayedBalance::simulated(&snapshot, price, now);
            state.displayed = Some(displayed.clone());
            state.sparkline.push(price);
            displayed
        };

        self.bus.publish(WalletEvent::DisplayTick(displayed.clone()));
        Some(displayed)
    }

    /// Follow `session`: poll while connected, stop and reset on disconnect.
    pub fn spawn(self: Arc<Self>, session: &WalletSession) -> PollerHandle {
        let mut sessions = session.watch_session();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let poller = self;

        let supervisor = tokio::spawn(async move {
            let mut running: Option<(String, PollLoops)> = None;
            loop {
                let wanted = sessions
                    .borrow_and_update()
                    .as_ref()
                    .map(|s| s.public_key.clone());
                let active = running.as_ref().map(|(key, _)| key.clone());

                if wanted != active {
                    if let Some((key, loops)) = running.take() {
                        drop(loops);
                        poller.reset().await;
                        tracing::info!(key = %crate::types::shorten_key(&key), "Balance polling stopped");
                    }
                    if let Some(key) = wanted {
                        tracing::info!(key = %crate::types::shorten_key(&key), "Balance polling started");
                        let loops = poller.clone().start_loops(key.clone());
                        running = Some((key, loops));
                    }
                }

                tokio::select! {
                    changed = sessions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        PollerHandle {
            supervisor: Some(supervisor),
            shutdown: shutdown_tx,
        }
    }

    fn start_loops(self: Arc<Self>, public_key: String) -> PollLoops {
        let fetcher = {
            let poller = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(poller.settings.poll_interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    if let Err(e) = poller.refresh(&public_key).await {
                        tracing::debug!(error = %e, "Scheduled refresh failed");
                    }
                }
            })
        };

        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.settings.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                self.simulate_tick().await;
            }
        });

        PollLoops(vec![fetcher, ticker])
    }
}

/// Running poll tasks, aborted when dropped
struct PollLoops(Vec<JoinHandle<()>>);

impl Drop for PollLoops {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Handle to a spawned poller; dropping it stops all polling
pub struct PollerHandle {
    supervisor: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl PollerHandle {
    pub fn is_running(&self) -> bool {
        self.supervisor
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(supervisor) = self.supervisor.take() {
            if let Err(e) = supervisor.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "Balance poller task panicked");
                }
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
    }
}

/// One random-walk step from `current`, clamped to `max_drift_bps` around `anchor`
fn drift(anchor: Decimal, current: Decimal, max_drift_bps: u32) -> Decimal {
    if max_drift_bps == 0 || anchor <= Decimal::ZERO {
        return anchor;
    }
    // Steps are a quarter of the band, in millionths
    let step = (i64::from(max_drift_bps) * 100 / 4).max(1);
    let r = rand::thread_rng().gen_range(-step..=step);
    let band = anchor * Decimal::new(i64::from(max_drift_bps), 4);

    let next = current + anchor * Decimal::new(r, 6);
    next.clamp(anchor - band, anchor + band).round_dp(4)
}
