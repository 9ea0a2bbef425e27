//! Sniper Wallet Dashboard
//!
//! Connects a Solana wallet, restores it on restart and tracks its balance.

use anyhow::Result;
use tracing::{info, warn};

use sniper_wallet_core::config::WalletConfig;
use sniper_wallet_dashboard::wallet::EnvWallet;
use sniper_wallet_dashboard::{format_usd, DashboardApp};

#[tokio::main]
async fn main() -> Result<()> {
    // Load config
    dotenvy::dotenv().ok();
    let config = WalletConfig::from_env().unwrap_or_default();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "sniper_wallet_dashboard={level},sniper_wallet_core={level}",
                    level = config.log_level
                )
                .into()
            }),
        )
        .init();

    config.validate()?;

    info!("🚀 Sniper Wallet Dashboard starting...");
    info!("   RPC: {}", config.solana_rpc_url);
    info!("   Session store: {}", config.storage_dir.display());

    let wallet = EnvWallet::from_env();
    let app = {
        let scope = wallet.scope(&sniper_wallet_core::provider::registry::WalletRegistry::default())?;
        DashboardApp::from_config(config, scope).await?
    };

    app.start(&wallet).await;
    if app.session.current().is_none() {
        warn!("⚠️  No wallet connected. Set WALLET_PUBKEY and WALLET_AUTOCONNECT=true to connect one.");
    }

    app.run_until(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
        }
    })
    .await?;

    if let Some(snapshot) = app.poller.snapshot().await {
        info!(
            "📊 Last balance: {} SOL ({})",
            snapshot.sol.round_dp(4).normalize(),
            format_usd(snapshot.fiat_value())
        );
    }
    Ok(())
}
