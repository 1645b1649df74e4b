//! Interval polling transport for clients without a persistent stream.
//!
//! Pulls the combined-state endpoint (one JSON object keyed by channel name)
//! at a fixed interval and emits one frame per top-level key whose value
//! changed since the previous poll, in the response's key order.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

use super::{FeedError, Frame, Transport};

/// Combined-state polling transport.
pub struct PollTransport {
    http: Client,
    url: String,
    interval: Duration,
    /// Last value seen per top-level key.
    last: HashMap<String, Value>,
    pending: VecDeque<Frame>,
    next_poll: Option<Instant>,
}

impl PollTransport {
    /// Create a transport polling `{base_url}{state_path}` every `interval`.
    pub fn new(
        base_url: &str,
        state_path: &str,
        interval: Duration,
        request_timeout: Duration,
    ) -> Result<Self, FeedError> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            url: format!("{}{}", base_url.trim_end_matches('/'), state_path),
            interval,
            last: HashMap::new(),
            pending: VecDeque::new(),
            next_poll: None,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn poll_once(&mut self) -> Result<usize, FeedError> {
        let response = self.http.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(FeedError::Status(response.status().as_u16()));
        }
        let body: Value = response.json().await?;
        self.next_poll = Some(Instant::now() + self.interval);
        Ok(self.diff(body))
    }

    /// Queue one frame per changed key. Returns the number queued.
    fn diff(&mut self, body: Value) -> usize {
        let Value::Object(map) = body else {
            debug!("Combined state is not a JSON object, ignoring");
            return 0;
        };

        let mut changed = 0;
        for (key, value) in map {
            if self.last.get(&key) == Some(&value) {
                continue;
            }
            self.pending.push_back(Frame::channel(key.clone(), value.clone()));
            self.last.insert(key, value);
            changed += 1;
        }
        changed
    }
}

#[async_trait]
impl Transport for PollTransport {
    async fn open(&mut self) -> Result<(), FeedError> {
        // Every (re)connect re-emits the full state.
        self.close().await;
        info!("Polling combined state at {} every {:?}", self.url, self.interval);
        let changed = self.poll_once().await?;
        debug!("Initial poll produced {changed} channel frames");
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, FeedError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }

        let Some(deadline) = self.next_poll else {
            return Err(FeedError::NotOpen);
        };
        sleep_until(deadline).await;

        let changed = self.poll_once().await?;
        match self.pending.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None => {
                debug!("Poll returned no changes ({changed})");
                Ok(Some(Frame::Heartbeat))
            }
        }
    }

    async fn close(&mut self) {
        self.last.clear();
        self.pending.clear();
        self.next_poll = None;
    }

    fn kind(&self) -> &'static str {
        "poll"
    }
}
