//! Push transport abstraction.
//!
//! The stream client is transport-agnostic: it opens a `Transport`, pulls
//! `Frame`s in arrival order and treats any error as a dropped connection.
//! Implementations:
//! - `SseTransport`: persistent Server-Sent Events stream
//! - `PollTransport`: recurring pull of the combined-state endpoint
//! - `MemoryTransport`: frames scripted from another task

pub mod memory;
pub mod poll;
pub mod sse;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that end a transport connection.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Connection timeout")]
    Timeout,

    #[error("Stream ended unexpectedly")]
    StreamEnded,

    #[error("Transport not open")]
    NotOpen,
}

/// One unit of traffic read from a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Payload for a named channel.
    Channel {
        channel: String,
        payload: serde_json::Value,
    },
    /// Liveness signal with no payload.
    Heartbeat,
}

impl Frame {
    pub fn channel(channel: impl Into<String>, payload: serde_json::Value) -> Self {
        Frame::Channel {
            channel: channel.into(),
            payload,
        }
    }
}

/// A push transport.
///
/// `next_frame` must be cancel-safe: the client races it against the
/// heartbeat deadline and the shutdown signal.
#[async_trait]
pub trait Transport: Send {
    /// Open the connection. Errors are retried by the client with backoff.
    async fn open(&mut self) -> Result<(), FeedError>;

    /// Next frame. `Ok(None)` means the peer closed the connection.
    async fn next_frame(&mut self) -> Result<Option<Frame>, FeedError>;

    /// Release the connection. Must be safe to call when not open.
    async fn close(&mut self);

    /// Short name for logs.
    fn kind(&self) -> &'static str;
}
