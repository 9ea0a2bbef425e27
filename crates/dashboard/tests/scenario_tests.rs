use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sniper_wallet_core::balance::{BalanceSource, PriceSource};
use sniper_wallet_core::config::WalletConfig;
use sniper_wallet_core::events::{DisconnectOrigin, NoticeLevel, WalletEvent};
use sniper_wallet_core::persistence::{FileStore, KeyValueStore, MemoryStore, SESSION_KEY};
use sniper_wallet_core::provider::registry::WalletRegistry;
use sniper_wallet_core::reconnect::ReconnectOutcome;
use sniper_wallet_core::{ConnectionState, WalletResult, LAMPORTS_PER_SOL};
use sniper_wallet_dashboard::wallet::EnvWallet;
use sniper_wallet_dashboard::{describe_event, format_usd, DashboardApp};
use tokio_test::assert_ok;

const KEY: &str = "So11111111111111111111111111111111111111112";

struct FixedBalance(u64);

#[async_trait]
impl BalanceSource for FixedBalance {
    async fn balance_lamports(&self, _public_key: &str) -> WalletResult<u64> {
        Ok(self.0)
    }
}

struct FixedPrice(Decimal);

#[async_trait]
impl PriceSource for FixedPrice {
    async fn sol_usd(&self) -> WalletResult<Decimal> {
        Ok(self.0)
    }
}

fn env_wallet(autoconnect: bool) -> EnvWallet {
    EnvWallet {
        public_key: Some(KEY.to_string()),
        wallet_id: "solflare".to_string(),
        trusted: false,
        autoconnect,
    }
}

fn app(wallet: &EnvWallet, store: Arc<dyn KeyValueStore>) -> DashboardApp {
    let scope = wallet.scope(&WalletRegistry::default()).unwrap();
    DashboardApp::with_parts(
        WalletConfig::default(),
        scope,
        store,
        Arc::new(FixedBalance(3 * LAMPORTS_PER_SOL)),
        Arc::new(FixedPrice(Decimal::from(100))),
    )
}

#[tokio::test]
async fn test_start_without_autoconnect_stays_disconnected() {
    let wallet = env_wallet(false);
    let app = app(&wallet, Arc::new(MemoryStore::new()));

    assert_eq!(app.start(&wallet).await, ReconnectOutcome::NoSession);
    assert_eq!(app.session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_autoconnect_then_restore_from_file_store() {
    let dir = std::env::temp_dir().join("sniper_wallet_dashboard_restore_test");
    let _ = tokio::fs::remove_dir_all(&dir).await;

    let wallet = env_wallet(true);
    {
        let store = Arc::new(assert_ok!(FileStore::new(&dir).await));
        let first = app(&wallet, store);
        first.start(&wallet).await;
        assert_eq!(first.session.state(), ConnectionState::Connected);
    }

    // Next start: same persisted record, provider remembers the approval
    let trusted = EnvWallet {
        trusted: true,
        autoconnect: false,
        ..wallet
    };
    let store = Arc::new(assert_ok!(FileStore::new(&dir).await));
    let second = app(&trusted, store.clone());
    assert!(second.start(&trusted).await.is_restored());

    assert_ok!(second.session.disconnect().await);
    assert_eq!(assert_ok!(store.get(SESSION_KEY).await), None);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_untrusted_restart_is_silent() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let wallet = env_wallet(true);
    app(&wallet, store.clone()).start(&wallet).await;

    let quiet = env_wallet(false);
    let second = app(&quiet, store.clone());
    let mut events = second.bus.subscribe();

    let outcome = second.start(&quiet).await;
    assert!(matches!(outcome, ReconnectOutcome::Rejected { .. }));
    assert_eq!(assert_ok!(store.get(SESSION_KEY).await), None);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_run_until_polls_and_stops() {
    let wallet = env_wallet(true);
    let app = app(&wallet, Arc::new(MemoryStore::new()));
    app.start(&wallet).await;

    assert_ok!(
        app.run_until(tokio::time::sleep(Duration::from_millis(300)))
            .await
    );

    let snapshot = app.poller.snapshot().await.expect("polled at least once");
    assert_eq!(snapshot.sol, Decimal::from(3));
    assert_eq!(format_usd(snapshot.fiat_value()), "$300.00");
}

#[tokio::test]
async fn test_startup_events_reach_the_log() {
    let wallet = env_wallet(true);
    let app = app(&wallet, Arc::new(MemoryStore::new()));
    app.start(&wallet).await;
    assert_eq!(app.session.state(), ConnectionState::Connected);

    // Connected event plus the "Connected to Solflare wallet" notice
    let logged = assert_ok!(app.run_until(std::future::ready(())).await);
    assert!(logged >= 2, "logged {} lines", logged);
}

#[test]
fn test_event_descriptions() {
    let connected = WalletEvent::Connected {
        wallet_id: "phantom".into(),
        public_key: KEY.into(),
        restored: true,
    };
    assert_eq!(
        describe_event(&connected).unwrap(),
        "✅ phantom reconnected (So11...1112)"
    );

    let dropped = WalletEvent::Disconnected {
        wallet_id: "glow".into(),
        origin: DisconnectOrigin::Provider,
    };
    assert!(describe_event(&dropped).unwrap().contains("Provider"));

    let notice = WalletEvent::notice(NoticeLevel::Warning, "Unable to update balance");
    assert_eq!(
        describe_event(&notice).unwrap(),
        "[Warning] Unable to update balance"
    );

    let balance = WalletEvent::BalanceUpdated {
        public_key: KEY.into(),
        lamports: 1_500_000_000,
        fiat_price: Decimal::from(200),
    };
    assert_eq!(describe_event(&balance).unwrap(), "💰 1.5 SOL @ $200.00 = $300.00");

    let absurd = WalletEvent::BalanceUpdated {
        public_key: KEY.into(),
        lamports: u64::MAX,
        fiat_price: Decimal::MAX,
    };
    assert!(describe_event(&absurd).is_some());
}
