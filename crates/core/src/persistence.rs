//! Session persistence
//!
//! The connected wallet is remembered under a single `connectedWallet` key as
//! `{walletId, publicKeyString, connectedAtEpochMs}`. Records are written in
//! one shot and are only read back while younger than the TTL; anything
//! expired or malformed is deleted on load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::types::Session;
use crate::{WalletError, WalletResult};

/// Storage key for the persisted session
pub const SESSION_KEY: &str = "connectedWallet";

/// Default time-to-live for a persisted session
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Records stamped further than this into the future are treated as corrupt
const MAX_CLOCK_SKEW_MS: i64 = 5 * 60 * 1000;

/// String key-value store, the equivalent of browser local storage
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> WalletResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> WalletResult<()>;
    async fn remove(&self, key: &str) -> WalletResult<()>;
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> WalletResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> WalletResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> WalletResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Directory-backed store, one `<key>.json` file per key
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub async fn new(dir: impl AsRef<Path>) -> WalletResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> WalletResult<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(WalletError::Storage(format!("invalid storage key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> WalletResult<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> WalletResult<()> {
        let path = self.path_for(key)?;
        // Write then rename so readers never observe a half-written record
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> WalletResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reads and writes the persisted session
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Persist the whole record or nothing
    pub async fn save(&self, session: &Session) -> WalletResult<()> {
        if !session.is_complete() {
            return Err(WalletError::InvalidSession(format!(
                "walletId={:?} publicKeyString={:?}",
                session.wallet_id, session.public_key
            )));
        }
        let json = serde_json::to_string(session)?;
        self.store.set(SESSION_KEY, &json).await?;
        tracing::debug!(wallet = %session.wallet_id, key = %session.short_key(), "Session persisted");
        Ok(())
    }

    /// Load a fresh session. Stale or malformed records are removed and
    /// reported as `None`.
    pub async fn load(&self) -> WalletResult<Option<Session>> {
        let raw = match self.store.get(SESSION_KEY).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        match self.validate(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::info!(reason = %e, "Discarding persisted session");
                self.clear().await?;
                Ok(None)
            }
        }
    }

    /// Unconditional removal
    pub async fn clear(&self) -> WalletResult<()> {
        self.store.remove(SESSION_KEY).await
    }

    fn validate(&self, raw: &str) -> WalletResult<Session> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| WalletError::StaleSession(format!("unparseable record: {}", e)))?;

        let field = |name: &str| -> WalletResult<String> {
            value
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| WalletError::StaleSession(format!("missing {}", name)))
        };
        let wallet_id = field("walletId")?;
        let public_key = field("publicKeyString")?;
        let connected_at_ms = value
            .get("connectedAtEpochMs")
            .and_then(Value::as_i64)
            .ok_or_else(|| WalletError::StaleSession("missing connectedAtEpochMs".into()))?;

        let age_ms = self
            .clock
            .now_ms()
            .checked_sub(connected_at_ms)
            .ok_or_else(|| {
                WalletError::StaleSession(format!("timestamp {} out of range", connected_at_ms))
            })?;
        if age_ms < -MAX_CLOCK_SKEW_MS {
            return Err(WalletError::StaleSession(format!(
                "record stamped {}ms in the future",
                -age_ms
            )));
        }
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        if age_ms >= ttl_ms {
            return Err(WalletError::StaleSession(format!(
                "record is {}s old (max {}s)",
                age_ms / 1000,
                self.ttl.as_secs()
            )));
        }

        Ok(Session::new(wallet_id, public_key, connected_at_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const NOW: i64 = 1_760_000_000_000;
    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn store_at(now: i64) -> (Arc<MemoryStore>, Arc<ManualClock>, SessionStore) {
        let kv = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(now));
        let sessions = SessionStore::new(kv.clone()).with_clock(clock.clone());
        (kv, clock, sessions)
    }

    #[tokio::test]
    async fn test_save_then_load_within_ttl() {
        let (_, _, sessions) = store_at(NOW);
        let session = Session::new("phantom", "ABC123", NOW - 1000);

        sessions.save(&session).await.unwrap();
        assert_eq!(sessions.load().await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn test_expired_session_is_removed() {
        let (kv, clock, sessions) = store_at(NOW);
        sessions
            .save(&Session::new("phantom", "ABC123", NOW))
            .await
            .unwrap();

        clock.advance(DAY_MS);
        assert_eq!(sessions.load().await.unwrap(), None);
        assert_eq!(kv.get(SESSION_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_just_inside_ttl_survives() {
        let (_, clock, sessions) = store_at(NOW);
        sessions
            .save(&Session::new("solflare", "XYZ", NOW))
            .await
            .unwrap();

        clock.advance(DAY_MS - 1);
        assert!(sessions.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_partial_session_never_written() {
        let (kv, _, sessions) = store_at(NOW);
        let err = sessions
            .save(&Session::new("", "ABC123", NOW))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidSession(_)));
        assert!(sessions.save(&Session::new("phantom", " ", NOW)).await.is_err());
        assert_eq!(kv.get(SESSION_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_records_are_deleted() {
        let records = [
            "not json",
            r#"{"walletId":"phantom","connectedAtEpochMs":1}"#,
            r#"{"walletId":"phantom","publicKeyString":"ABC","connectedAtEpochMs":"yesterday"}"#,
            r#"{"walletId":"","publicKeyString":"ABC","connectedAtEpochMs":1}"#,
            r#"[1,2,3]"#,
            r#"{"walletId":"phantom","publicKeyString":"ABC123","connectedAtEpochMs":-9223372036854775808}"#,
            r#"{"walletId":"phantom","publicKeyString":"ABC123","connectedAtEpochMs":9223372036854775807}"#,
        ];
        for record in records {
            let (kv, _, sessions) = store_at(NOW);
            kv.set(SESSION_KEY, record).await.unwrap();
            assert_eq!(sessions.load().await.unwrap(), None, "record {}", record);
            assert_eq!(kv.get(SESSION_KEY).await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_future_dated_record_is_deleted() {
        let (kv, _, sessions) = store_at(NOW);
        let json = serde_json::to_string(&Session::new("glow", "ABC", NOW + DAY_MS)).unwrap();
        kv.set(SESSION_KEY, &json).await.unwrap();
        assert_eq!(sessions.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_huge_ttl_keeps_fresh_record() {
        let (_, _, sessions) = store_at(NOW);
        let sessions = sessions.with_ttl(Duration::from_secs(u64::MAX));
        sessions
            .save(&Session::new("phantom", "ABC123", NOW - DAY_MS))
            .await
            .unwrap();
        assert!(sessions.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_is_unconditional() {
        let (kv, _, sessions) = store_at(NOW);
        sessions.clear().await.unwrap();
        sessions
            .save(&Session::new("phantom", "ABC123", NOW))
            .await
            .unwrap();
        sessions.clear().await.unwrap();
        assert_eq!(kv.get(SESSION_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = std::env::temp_dir().join("sniper_wallet_file_store_test");
        let _ = tokio::fs::remove_dir_all(&dir).await;

        let kv = FileStore::new(&dir).await.unwrap();
        assert_eq!(kv.get(SESSION_KEY).await.unwrap(), None);
        kv.set(SESSION_KEY, "{}").await.unwrap();
        assert_eq!(kv.get(SESSION_KEY).await.unwrap().as_deref(), Some("{}"));
        kv.remove(SESSION_KEY).await.unwrap();
        kv.remove(SESSION_KEY).await.unwrap();
        assert_eq!(kv.get(SESSION_KEY).await.unwrap(), None);
        assert!(kv.set("../escape", "x").await.is_err());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
