//! Wallet event bus
//!
//! Everything a dashboard reacts to flows through here: lifecycle changes,
//! balance updates and transient notifications. Rendering is left to
//! subscribers.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ErrorSeverity;
use crate::types::DisplayedBalance;

/// Notification level, mirrors the toast styles of a dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl From<ErrorSeverity> for NoticeLevel {
    fn from(severity: ErrorSeverity) -> Self {
        match severity {
            ErrorSeverity::Warning => NoticeLevel::Warning,
            ErrorSeverity::Error => NoticeLevel::Error,
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectOrigin {
    /// Explicit `disconnect()` call
    User,
    /// The wallet itself reported a disconnect or dropped the account
    Provider,
}

/// Wallet lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalletEvent {
    // ── Lifecycle Events ────────────────────────────────────────────
    Connected {
        wallet_id: String,
        public_key: String,
        restored: bool,
    },

    AccountChanged {
        wallet_id: String,
        public_key: String,
    },

    Disconnected {
        wallet_id: String,
        origin: DisconnectOrigin,
    },

    // ── Balance Events ──────────────────────────────────────────────
    /// Authoritative fetch completed
    BalanceUpdated {
        public_key: String,
        lamports: u64,
        fiat_price: Decimal,
    },

    /// Display value moved, authoritative or simulated
    DisplayTick(DisplayedBalance),

    // ── Notifications ───────────────────────────────────────────────
    Notification { level: NoticeLevel, message: String },
}

impl WalletEvent {
    pub fn notice(level: NoticeLevel, message: impl Into<String>) -> Self {
        WalletEvent::Notification {
            level,
            message: message.into(),
        }
    }

    pub fn is_error_notice(&self) -> bool {
        matches!(
            self,
            WalletEvent::Notification {
                level: NoticeLevel::Error,
                ..
            }
        )
    }
}

/// Broadcast-based event bus
pub struct EventBus {
    tx: broadcast::Sender<WalletEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of active subscribers that received the event.
    /// If no subscribers are listening, the event is silently dropped.
    pub fn publish(&self, event: WalletEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Create a new subscription to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.tx.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Drain everything currently queued on a receiver without waiting
pub fn drain(rx: &mut broadcast::Receiver<WalletEvent>) -> Vec<WalletEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event receiver lagged");
            }
            Err(_) => break,
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let count = bus.publish(WalletEvent::Disconnected {
            wallet_id: "phantom".to_string(),
            origin: DisconnectOrigin::User,
        });
        assert_eq!(count, 1);

        match rx.recv().await.unwrap() {
            WalletEvent::Disconnected { wallet_id, origin } => {
                assert_eq!(wallet_id, "phantom");
                assert_eq!(origin, DisconnectOrigin::User);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[tokio::test]
    async fn test_event_bus_no_subscribers() {
        let bus = EventBus::new(16);
        let count = bus.publish(WalletEvent::notice(NoticeLevel::Info, "hello"));
        assert_eq!(count, 0);
    }

    #[test]
    fn test_drain_collects_queued_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(WalletEvent::notice(NoticeLevel::Info, "a"));
        bus.publish(WalletEvent::notice(NoticeLevel::Error, "b"));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(events[1].is_error_notice());
        assert!(drain(&mut rx).is_empty());
    }
}
