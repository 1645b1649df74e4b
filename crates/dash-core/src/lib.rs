//! Real-time account state synchronization for the trading dashboard.
//!
//! Layers, leaves first:
//! - `aggregator`: canonical `AccountSnapshot`, per-channel last-write-wins
//! - `views`: derived views computed from a snapshot on every read
//! - `arbiter`: live/demo decision driven by connection state only
//! - `engine`: synchronous state machine tying the three together
//! - `core`: async driver owning the stream client and fetcher, plus the
//!   read handle handed to the render layer

pub mod aggregator;
pub mod arbiter;
pub mod config;
pub mod core;
pub mod demo;
pub mod engine;
pub mod requests;
pub mod store;
pub mod views;

pub use aggregator::{AccountSnapshot, Aggregator, HealthState};
pub use arbiter::{Arbiter, ArbiterState, ArbiterTransition};
pub use config::{SyncConfig, TransportKind};
pub use core::{CoreError, SyncCore, SyncHandle, TransportFactory, build_transport};
pub use engine::{PullTicket, SyncEngine};
pub use requests::{RequestId, RequestTracker};
pub use store::{LocalStore, NotificationPrefs, QuietHours, StoreError};
pub use views::{
    EquityCurve, EquityPoint, Gauge, GaugeTone, HealthBadge, PendingProgress, PointTone, PositionSort,
    RiskGauges, SortDirection, SortKey,
};
