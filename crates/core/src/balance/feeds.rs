//! HTTP-backed balance and price feeds
//!
//! Balances come from Solana JSON-RPC `getBalance`. The SOL/USD price comes
//! from the Binance ticker, falling back to CoinGecko when Binance fails.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{BalanceSource, PriceSource};
use crate::config::WalletConfig;
use crate::types::check_price;
use crate::{WalletError, WalletResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

fn http_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// `getBalance` over Solana JSON-RPC
pub struct RpcBalanceSource {
    client: Client,
    rpc_url: String,
}

impl RpcBalanceSource {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            rpc_url: rpc_url.into(),
        }
    }
}

#[async_trait]
impl BalanceSource for RpcBalanceSource {
    async fn balance_lamports(&self, public_key: &str) -> WalletResult<u64> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [public_key],
        });

        let response: Value = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_balance(&response)
    }
}

fn parse_balance(response: &Value) -> WalletResult<u64> {
    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown RPC error");
        return Err(WalletError::BalanceFetch(message.to_string()));
    }
    response
        .pointer("/result/value")
        .and_then(Value::as_u64)
        .ok_or_else(|| WalletError::BalanceFetch("response has no result.value".to_string()))
}

#[derive(Debug, Deserialize)]
struct BinanceTicker {
    price: String,
}

#[derive(Debug, Deserialize)]
struct CoinGeckoPrice {
    solana: CoinGeckoUsd,
}

#[derive(Debug, Deserialize)]
struct CoinGeckoUsd {
    usd: serde_json::Number,
}

/// Binance SOL/USDT ticker with a CoinGecko fallback
pub struct HttpPriceSource {
    client: Client,
    primary_url: String,
    fallback_url: String,
}

impl HttpPriceSource {
    pub fn new(primary_url: impl Into<String>, fallback_url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            primary_url: primary_url.into(),
            fallback_url: fallback_url.into(),
        }
    }

    pub fn from_config(config: &WalletConfig) -> Self {
        Self::new(&config.price_api_url, &config.fallback_price_api_url)
    }

    async fn binance(&self) -> WalletResult<Decimal> {
        let ticker: BinanceTicker = self
            .client
            .get(&self.primary_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_price(&ticker.price)
    }

    async fn coingecko(&self) -> WalletResult<Decimal> {
        let body: CoinGeckoPrice = self
            .client
            .get(&self.fallback_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_price(&body.solana.usd.to_string())
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn sol_usd(&self) -> WalletResult<Decimal> {
        match self.binance().await {
            Ok(price) => Ok(price),
            Err(primary) => {
                tracing::debug!(error = %primary, "Binance price failed, trying CoinGecko");
                self.coingecko().await.map_err(|fallback| {
                    WalletError::PriceFetch(format!(
                        "binance: {}; coingecko: {}",
                        primary, fallback
                    ))
                })
            }
        }
    }
}

fn parse_price(raw: &str) -> WalletResult<Decimal> {
    let price = Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|e| WalletError::PriceFetch(format!("invalid price {:?}: {}", raw, e)))?;
    check_price(price)
}
