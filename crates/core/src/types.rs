//! Core types shared across the wallet lifecycle

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{WalletError, WalletResult};

/// Lamports in one SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Largest SOL/USD price accepted from a feed
pub const MAX_SOL_USD: u64 = 10_000_000;

/// Length of a decoded Solana public key
const PUBKEY_BYTES: usize = 32;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn is_busy(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Disconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// The active wallet connection.
///
/// The serialized form is the record kept under `connectedWallet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub wallet_id: String,
    #[serde(rename = "publicKeyString")]
    pub public_key: String,
    #[serde(rename = "connectedAtEpochMs")]
    pub connected_at_ms: i64,
}

impl Session {
    pub fn new(wallet_id: impl Into<String>, public_key: impl Into<String>, connected_at_ms: i64) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            public_key: public_key.into(),
            connected_at_ms,
        }
    }

    /// Both identifying fields are present
    pub fn is_complete(&self) -> bool {
        !self.wallet_id.trim().is_empty() && !self.public_key.trim().is_empty()
    }

    /// Abbreviated key for log lines, e.g. `So11...1112`
    pub fn short_key(&self) -> String {
        shorten_key(&self.public_key)
    }
}

/// Last authoritative balance and price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub lamports: u64,
    pub sol: Decimal,
    pub fiat_price: Decimal,
    pub fetched_at_ms: i64,
}

impl BalanceSnapshot {
    pub fn new(lamports: u64, fiat_price: Decimal, fetched_at_ms: i64) -> Self {
        Self {
            lamports,
            sol: lamports_to_sol(lamports),
            fiat_price,
            fetched_at_ms,
        }
    }

    pub fn fiat_value(&self) -> Decimal {
        fiat_value(self.sol, self.fiat_price)
    }
}

/// What the dashboard shows; may carry simulated price jitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayedBalance {
    pub sol: Decimal,
    pub fiat_price: Decimal,
    pub fiat_value: Decimal,
    pub simulated: bool,
    pub as_of_ms: i64,
}

impl DisplayedBalance {
    /// Display that mirrors an authoritative snapshot exactly
    pub fn authoritative(snapshot: &BalanceSnapshot) -> Self {
        Self {
            sol: snapshot.sol,
            fiat_price: snapshot.fiat_price,
            fiat_value: snapshot.fiat_value(),
            simulated: false,
            as_of_ms: snapshot.fetched_at_ms,
        }
    }

    /// Display derived from a snapshot with a substituted price
    pub fn simulated(snapshot: &BalanceSnapshot, fiat_price: Decimal, as_of_ms: i64) -> Self {
        Self {
            sol: snapshot.sol,
            fiat_price,
            fiat_value: fiat_value(snapshot.sol, fiat_price),
            simulated: true,
            as_of_ms,
        }
    }
}

/// `sol * price` to the cent, saturating instead of overflowing
pub fn fiat_value(sol: Decimal, price: Decimal) -> Decimal {
    sol.checked_mul(price).unwrap_or(Decimal::MAX).round_dp(2)
}

/// Reject prices no real market would quote
pub fn check_price(price: Decimal) -> WalletResult<Decimal> {
    if price <= Decimal::ZERO {
        return Err(WalletError::PriceFetch(format!("non-positive price {}", price)));
    }
    if price > Decimal::from(MAX_SOL_USD) {
        return Err(WalletError::PriceFetch(format!("implausible price {}", price)));
    }
    Ok(price)
}

pub fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)
}

/// Check that `key` is a base58 string encoding a 32-byte public key
pub fn validate_public_key(key: &str) -> WalletResult<String> {
    let key = key.trim();
    if key.is_empty() {
        return Err(WalletError::InvalidPublicKey("empty key".to_string()));
    }
    let bytes = bs58::decode(key)
        .into_vec()
        .map_err(|e| WalletError::InvalidPublicKey(format!("{}: {}", key, e)))?;
    if bytes.len() != PUBKEY_BYTES {
        return Err(WalletError::InvalidPublicKey(format!(
            "{} decodes to {} bytes, expected {}",
            key,
            bytes.len(),
            PUBKEY_BYTES
        )));
    }
    Ok(key.to_string())
}

pub fn shorten_key(key: &str) -> String {
    if key.len() <= 8 || !key.is_ascii() {
        return key.to_string();
    }
    format!("{}...{}", &key[..4], &key[key.len() - 4..])
}
