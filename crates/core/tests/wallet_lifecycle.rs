use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sniper_wallet_core::balance::{BalancePoller, BalanceSource, PollerSettings, PriceSource};
use sniper_wallet_core::clock::ManualClock;
use sniper_wallet_core::events::{drain, EventBus, WalletEvent};
use sniper_wallet_core::persistence::{KeyValueStore, MemoryStore, SessionStore, SESSION_KEY};
use sniper_wallet_core::provider::memory::{MemoryProvider, MemoryScope};
use sniper_wallet_core::provider::registry::WalletRegistry;
use sniper_wallet_core::reconnect::ReconnectOutcome;
use sniper_wallet_core::session::WalletSession;
use sniper_wallet_core::{ConnectionState, Session, WalletError, WalletResult, LAMPORTS_PER_SOL};
use tokio_test::{assert_err, assert_ok};

const KEY: &str = "So11111111111111111111111111111111111111112";
const NOW: i64 = 1_760_000_000_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn wallet_session(scope: Arc<MemoryScope>, kv: Arc<MemoryStore>) -> WalletSession {
    let sessions = SessionStore::new(kv).with_clock(Arc::new(ManualClock::new(NOW)));
    WalletSession::builder(scope, sessions).build()
}

#[tokio::test]
async fn test_undetected_wallets_never_connect() {
    init_tracing();
    let kv = Arc::new(MemoryStore::new());
    let session = wallet_session(Arc::new(MemoryScope::new()), kv.clone());

    for descriptor in WalletRegistry::default().wallets() {
        let err = assert_err!(session.connect(descriptor.id).await);
        assert!(matches!(err, WalletError::ProviderUnavailable { .. }));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
    assert_eq!(assert_ok!(kv.get(SESSION_KEY).await), None);
}

#[tokio::test]
async fn test_rapid_double_connect() {
    init_tracing();
    let scope = Arc::new(MemoryScope::new());
    scope.inject(
        "phantom.solana",
        MemoryProvider::new(KEY)
            .with_latency(Duration::from_millis(20))
            .shared(),
    );
    let session = wallet_session(scope, Arc::new(MemoryStore::new()));
    let mut events = session.subscribe();

    let (a, b) = tokio::join!(session.connect("phantom"), session.connect("phantom"));
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| matches!(r, Err(WalletError::AlreadyInProgress)))
            .count(),
        1
    );

    let connected = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, WalletEvent::Connected { .. }))
        .count();
    assert_eq!(connected, 1);
}

#[tokio::test]
async fn test_disconnect_twice() {
    init_tracing();
    let scope = Arc::new(MemoryScope::new());
    scope.inject("glow", MemoryProvider::new(KEY).shared());
    let kv = Arc::new(MemoryStore::new());
    let session = wallet_session(scope, kv.clone());

    assert_ok!(session.connect("glow").await);
    assert_ok!(session.disconnect().await);
    let first = (session.state(), session.current());
    assert_ok!(session.disconnect().await);
    assert_eq!((session.state(), session.current()), first);
    assert_eq!(assert_ok!(kv.get(SESSION_KEY).await), None);
}

#[tokio::test]
async fn test_session_older_than_a_day_is_dropped() {
    let kv = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let sessions = SessionStore::new(kv.clone()).with_clock(clock.clone());
    let saved = Session::new("solflare", KEY, NOW);

    assert_ok!(sessions.save(&saved).await);
    assert_eq!(assert_ok!(sessions.load().await), Some(saved));

    clock.advance(24 * 60 * 60 * 1000 + 1);
    assert_eq!(assert_ok!(sessions.load().await), None);
    assert_eq!(assert_ok!(kv.get(SESSION_KEY).await), None);
}

#[tokio::test(start_paused = true)]
async fn test_phantom_missing_at_startup() {
    init_tracing();
    let kv = Arc::new(MemoryStore::new());
    let record = r#"{"walletId":"phantom","publicKeyString":"ABC123","connectedAtEpochMs":1759999999000}"#;
    assert_ok!(kv.set(SESSION_KEY, record).await);

    let session = wallet_session(Arc::new(MemoryScope::new()), kv.clone());
    let mut events = session.subscribe();

    let outcome = session.reconnect().await;
    assert_eq!(
        outcome,
        ReconnectOutcome::ProviderMissing {
            wallet_id: "phantom".to_string()
        }
    );
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(assert_ok!(kv.get(SESSION_KEY).await), None);
    assert!(!drain(&mut events).iter().any(WalletEvent::is_error_notice));
}

#[tokio::test]
async fn test_restart_restores_connection() {
    init_tracing();
    let scope = Arc::new(MemoryScope::new());
    let provider = MemoryProvider::new(KEY).shared();
    scope.inject("solflare", provider.clone());
    let kv = Arc::new(MemoryStore::new());

    let first = wallet_session(scope.clone(), kv.clone());
    assert_ok!(first.connect("solflare").await);
    drop(first);

    let second = wallet_session(scope, kv);
    let outcome = second.reconnect().await;
    assert!(outcome.is_restored());
    assert_eq!(second.current().map(|s| s.public_key), Some(KEY.to_string()));
    assert_eq!(provider.connect_calls(), 2);
}

/// Serves 10 SOL until told to fail
struct FlakyBalance {
    failing: AtomicBool,
}

#[async_trait]
impl BalanceSource for FlakyBalance {
    async fn balance_lamports(&self, _public_key: &str) -> WalletResult<u64> {
        if self.failing.load(Ordering::SeqCst) {
            Err(WalletError::BalanceFetch("connection reset".to_string()))
        } else {
            Ok(10 * LAMPORTS_PER_SOL)
        }
    }
}

struct StaticPrice(Decimal);

#[async_trait]
impl PriceSource for StaticPrice {
    async fn sol_usd(&self) -> WalletResult<Decimal> {
        Ok(self.0)
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_after_simulated_ticks_keeps_last_balance() {
    init_tracing();
    let balances = Arc::new(FlakyBalance {
        failing: AtomicBool::new(false),
    });
    let bus = Arc::new(EventBus::default());
    let poller = BalancePoller::new(
        balances.clone(),
        Arc::new(StaticPrice(Decimal::from(150))),
        bus,
        PollerSettings::default(),
    );

    assert_ok!(poller.refresh(KEY).await);
    for _ in 0..3 {
        assert!(poller.simulate_tick().await.is_some());
    }

    balances.failing.store(true, Ordering::SeqCst);
    assert_err!(poller.refresh(KEY).await);

    let shown = poller.displayed().await.expect("display survives a failed fetch");
    assert_eq!(shown.sol, Decimal::from(10));
    assert_eq!(shown.fiat_value, Decimal::from(1500));
    assert!(!shown.simulated);
}

#[tokio::test(start_paused = true)]
async fn test_poller_follows_session() {
    init_tracing();
    let scope = Arc::new(MemoryScope::new());
    scope.inject("backpack", MemoryProvider::new(KEY).shared());
    let session = wallet_session(scope, Arc::new(MemoryStore::new()));

    let poller = Arc::new(
        BalancePoller::new(
            Arc::new(FlakyBalance {
                failing: AtomicBool::new(false),
            }),
            Arc::new(StaticPrice(Decimal::from(100))),
            session.event_bus().clone(),
            PollerSettings::default(),
        )
        .with_clock(Arc::new(ManualClock::new(NOW))),
    );
    let handle = poller.clone().spawn(&session);

    assert_ok!(session.connect("backpack").await);
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(poller.snapshot().await.map(|s| s.sol), Some(Decimal::from(10)));
    assert!(poller.sparkline().await.len() > 1);

    assert_ok!(session.disconnect().await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(poller.snapshot().await.is_none());

    assert!(handle.is_running());
    handle.shutdown().await;
}
