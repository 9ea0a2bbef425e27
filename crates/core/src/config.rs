//! Configuration module for the wallet dashboard

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::{WalletError, WalletResult};

/// Upper bound on a configured session lifetime, one year
const MAX_SESSION_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Solana RPC URL used for balance lookups
    pub solana_rpc_url: String,
    /// Primary SOL/USD price endpoint (Binance ticker)
    pub price_api_url: String,
    /// Fallback SOL/USD price endpoint (CoinGecko simple price)
    pub fallback_price_api_url: String,
    /// Upper bound on a wallet connect call
    pub connect_timeout_ms: u64,
    /// How long a startup reconnect waits for the wallet to be injected
    pub provider_wait_ms: u64,
    /// Maximum age of a persisted session
    pub session_ttl_seconds: u64,
    /// Authoritative balance/price fetch cadence
    pub balance_poll_interval_ms: u64,
    /// Simulated display tick cadence
    pub simulated_tick_ms: u64,
    /// Sparkline ring buffer capacity
    pub sparkline_points: usize,
    /// Largest simulated deviation from the authoritative price, in basis points
    pub max_price_drift_bps: u32,
    /// Directory backing the session store
    pub storage_dir: PathBuf,
    /// Log level
    pub log_level: String,
}

impl WalletConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = Self::default();
        Ok(Self {
            solana_rpc_url: env::var("SOLANA_RPC_URL").unwrap_or(defaults.solana_rpc_url),
            price_api_url: env::var("PRICE_API_URL").unwrap_or(defaults.price_api_url),
            fallback_price_api_url: env::var("FALLBACK_PRICE_API_URL")
                .unwrap_or(defaults.fallback_price_api_url),
            connect_timeout_ms: env::var("CONNECT_TIMEOUT_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .unwrap_or(defaults.connect_timeout_ms),
            provider_wait_ms: env::var("PROVIDER_WAIT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(defaults.provider_wait_ms),
            session_ttl_seconds: env::var("SESSION_TTL_SECONDS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .unwrap_or(defaults.session_ttl_seconds),
            balance_poll_interval_ms: env::var("BALANCE_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(defaults.balance_poll_interval_ms),
            simulated_tick_ms: env::var("SIMULATED_TICK_MS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .unwrap_or(defaults.simulated_tick_ms),
            sparkline_points: env::var("SPARKLINE_POINTS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(defaults.sparkline_points),
            max_price_drift_bps: env::var("MAX_PRICE_DRIFT_BPS")
                .unwrap_or_else(|_| "25".to_string())
                .parse()
                .unwrap_or(defaults.max_price_drift_bps),
            storage_dir: env::var("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }

    /// Validate all configuration values
    pub fn validate(&self) -> WalletResult<()> {
        if self.connect_timeout_ms == 0 {
            return Err(WalletError::Config("connect_timeout_ms must be > 0".into()));
        }
        if self.session_ttl_seconds == 0 || self.session_ttl_seconds > MAX_SESSION_TTL_SECONDS {
            return Err(WalletError::Config(format!(
                "session_ttl_seconds must be in 1..={}",
                MAX_SESSION_TTL_SECONDS
            )));
        }
        if self.balance_poll_interval_ms < 250 {
            return Err(WalletError::Config(
                "balance_poll_interval_ms must be >= 250ms".into(),
            ));
        }
        if self.simulated_tick_ms == 0 || self.simulated_tick_ms > self.balance_poll_interval_ms {
            return Err(WalletError::Config(
                "simulated_tick_ms must be in 1..=balance_poll_interval_ms".into(),
            ));
        }
        if self.sparkline_points == 0 {
            return Err(WalletError::Config("sparkline_points must be > 0".into()));
        }
        if self.max_price_drift_bps > 10_000 {
            return Err(WalletError::Config(
                "max_price_drift_bps must be <= 10000".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn provider_wait(&self) -> Duration {
        Duration::from_millis(self.provider_wait_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    pub fn balance_poll_interval(&self) -> Duration {
        Duration::from_millis(self.balance_poll_interval_ms)
    }

    pub fn simulated_tick(&self) -> Duration {
        Duration::from_millis(self.simulated_tick_ms)
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            solana_rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            price_api_url: "https://api.binance.com/api/v3/ticker/price?symbol=SOLUSDT"
                .to_string(),
            fallback_price_api_url:
                "https://api.coingecko.com/api/v3/simple/price?ids=solana&vs_currencies=usd"
                    .to_string(),
            connect_timeout_ms: 30_000,
            provider_wait_ms: 5_000,
            session_ttl_seconds: 24 * 60 * 60,
            balance_poll_interval_ms: 3_000,
            simulated_tick_ms: 100,
            sparkline_points: 20,
            max_price_drift_bps: 25,
            storage_dir: PathBuf::from(".wallet"),
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WalletConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.session_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.provider_wait(), Duration::from_secs(5));
    }

    #[test]
    fn test_session_ttl_bounds() {
        let mut c = WalletConfig::default();
        c.session_ttl_seconds = u64::MAX;
        assert!(matches!(c.validate(), Err(WalletError::Config(_))));
        c.session_ttl_seconds = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_tick_slower_than_poll_fails() {
        let mut c = WalletConfig::default();
        c.simulated_tick_ms = 5_000;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_zero_sparkline_fails() {
        let mut c = WalletConfig::default();
        c.sparkline_points = 0;
        assert!(matches!(c.validate(), Err(WalletError::Config(_))));
    }
}
