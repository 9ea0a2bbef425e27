//! Sniper Wallet Core Library
//!
//! This crate provides wallet detection, the connection session lifecycle,
//! session persistence, startup reconnect and balance polling for the
//! Sniper Wallet dashboard.

pub mod balance;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod persistence;
pub mod provider;
pub mod reconnect;
pub mod session;
pub mod types;

pub use error::*;
pub use types::*;
