//! Shared types for the account dashboard sync core.
//!
//! This crate contains:
//! - Channel names, connection states and the raw `ChannelEvent`
//! - Typed payloads for every push channel (`ChannelPayload`)
//! - Pull-only resource types (trades, equity history, reviews, evolution)
//!
//! CRITICAL: Money and prices use `rust_decimal::Decimal`. Percentages and
//! ratios are `f64`.

pub mod channel;
pub mod time;
pub mod types;

pub use channel::{Channel, ChannelEvent, ConnectionState};
pub use types::*;
