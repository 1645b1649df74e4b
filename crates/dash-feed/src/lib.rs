//! Push and pull clients for the account dashboard backend.
//!
//! Provides:
//! - `ChannelStreamClient`: one push transport, channel demultiplexing,
//!   ordered handler dispatch and reconnect with bounded backoff
//! - Transports: Server-Sent Events stream, combined-state polling and an
//!   in-memory transport for replays and tests
//! - `SnapshotFetcher`: point-in-time pulls that degrade to empty values

pub mod backoff;
pub mod client;
pub mod fetcher;
pub mod transport;

pub use backoff::Backoff;
pub use client::{ChannelStreamClient, Handler, StateListener, StreamConfig, SubscriptionTable};
pub use fetcher::{ApplyChangeError, EquityRange, FetchError, SnapshotFetcher};
pub use transport::memory::{MemoryFeed, MemoryTransport};
pub use transport::poll::PollTransport;
pub use transport::sse::{SseFrame, SseParser, SseTransport};
pub use transport::{FeedError, Frame, Transport};
