//! In-memory transport driven from another task.
//!
//! `MemoryTransport` is handed to a stream client; the paired `MemoryFeed`
//! scripts what the client sees: frames, heartbeats, errors, closes, and
//! whether connection attempts are refused. Used for replays and tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{FeedError, Frame, Transport};

#[derive(Debug)]
enum Script {
    Frame(Frame),
    Fail(String),
    Close,
}

#[derive(Debug, Default)]
struct Control {
    refuse: bool,
    opens: u32,
    closes: u32,
}

/// Transport half, owned by the stream client.
pub struct MemoryTransport {
    rx: mpsc::UnboundedReceiver<Script>,
    control: Arc<Mutex<Control>>,
    open: bool,
}

/// Controller half.
#[derive(Clone)]
pub struct MemoryFeed {
    tx: mpsc::UnboundedSender<Script>,
    control: Arc<Mutex<Control>>,
}

impl MemoryTransport {
    pub fn new() -> (MemoryTransport, MemoryFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let control = Arc::new(Mutex::new(Control::default()));
        (
            MemoryTransport {
                rx,
                control: control.clone(),
                open: false,
            },
            MemoryFeed { tx, control },
        )
    }
}

impl MemoryFeed {
    /// Queue a channel payload.
    pub fn send(&self, channel: &str, payload: serde_json::Value) {
        let _ = self.tx.send(Script::Frame(Frame::channel(channel, payload)));
    }

    pub fn heartbeat(&self) {
        let _ = self.tx.send(Script::Frame(Frame::Heartbeat));
    }

    /// Make the current connection fail with a transport error.
    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(Script::Fail(reason.to_string()));
    }

    /// Make the peer close the current connection.
    pub fn close(&self) {
        let _ = self.tx.send(Script::Close);
    }

    /// Refuse (or accept again) subsequent connection attempts.
    pub fn refuse_connections(&self, refuse: bool) {
        self.control.lock().refuse = refuse;
    }

    /// Number of `open()` calls so far, successful or not.
    pub fn open_count(&self) -> u32 {
        self.control.lock().opens
    }

    pub fn close_count(&self) -> u32 {
        self.control.lock().closes
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&mut self) -> Result<(), FeedError> {
        let mut control = self.control.lock();
        control.opens += 1;
        if control.refuse {
            return Err(FeedError::Connection("connection refused".to_string()));
        }
        self.open = true;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, FeedError> {
        if !self.open {
            return Err(FeedError::NotOpen);
        }
        match self.rx.recv().await {
            Some(Script::Frame(frame)) => Ok(Some(frame)),
            Some(Script::Fail(reason)) => Err(FeedError::Connection(reason)),
            Some(Script::Close) => Ok(None),
            // Controller dropped: stay silent forever.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        if self.open {
            self.control.lock().closes += 1;
        }
        self.open = false;
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
