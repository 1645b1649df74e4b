//! Channel-multiplexed push client.
//!
//! Owns one `Transport`, assigns per-channel sequence numbers at receipt and
//! dispatches every event to the handlers registered for its channel, in
//! registration order. Transport failures never reach handlers: the client
//! moves to `Disconnected`, waits out the backoff and reconnects, forever,
//! until `disconnect()` is called.
//!
//! ## States
//!
//! - **Connecting**: `open()` in flight
//! - **Connected**: transport open, traffic seen within the heartbeat timeout
//! - **Degraded**: transport open but silent past the heartbeat timeout
//! - **Disconnected**: waiting for the reconnect delay, or stopped

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dash_common::{ChannelEvent, ConnectionState};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::transport::{FeedError, Frame, Transport};

/// Channel event handler.
pub type Handler = Box<dyn FnMut(&ChannelEvent) + Send>;

/// Connection state listener, called on every transition.
pub type StateListener = Box<dyn FnMut(ConnectionState) + Send>;

/// Configuration for the stream client.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Bound on a single `open()` attempt.
    pub connect_timeout: Duration,
    /// Silence after which an open connection is reported as degraded.
    pub heartbeat_timeout: Duration,
    /// Initial reconnect delay.
    pub initial_reconnect_delay: Duration,
    /// Maximum reconnect delay.
    pub max_reconnect_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(45),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

/// Ordered handler lists keyed by channel name.
#[derive(Default)]
pub struct SubscriptionTable {
    handlers: HashMap<String, Vec<Handler>>,
    state_listeners: Vec<StateListener>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `channel`.
    pub fn on(&mut self, channel: &str, handler: Handler) {
        self.handlers.entry(channel.to_string()).or_default().push(handler);
    }

    /// Append a connection state listener.
    pub fn on_state(&mut self, listener: StateListener) {
        self.state_listeners.push(listener);
    }

    /// Deliver an event to its channel's handlers. Returns how many ran.
    pub fn dispatch(&mut self, event: &ChannelEvent) -> usize {
        match self.handlers.get_mut(&event.channel) {
            Some(handlers) => {
                for handler in handlers.iter_mut() {
                    handler(event);
                }
                handlers.len()
            }
            None => 0,
        }
    }

    fn notify_state(&mut self, state: ConnectionState) {
        for listener in self.state_listeners.iter_mut() {
            listener(state);
        }
    }

    pub fn handler_count(&self, channel: &str) -> usize {
        self.handlers.get(channel).map(Vec::len).unwrap_or(0)
    }
}

/// State shared between the client handle and its run task.
struct Shared {
    subscriptions: Mutex<SubscriptionTable>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!("Stream connection state: {state}");
            self.subscriptions.lock().notify_state(state);
        }
    }
}

struct Running {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<Box<dyn Transport>>,
}

/// Push client over a single transport.
///
/// Handlers run on the client's task while the subscription table is
/// locked: they must not call `on()` / `on_state()` themselves.
pub struct ChannelStreamClient {
    config: StreamConfig,
    shared: Arc<Shared>,
    transport: Option<Box<dyn Transport>>,
    running: Option<Running>,
}

impl ChannelStreamClient {
    /// Create a client. Nothing is opened until `connect()`.
    pub fn new(config: StreamConfig, transport: Box<dyn Transport>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            shared: Arc::new(Shared {
                subscriptions: Mutex::new(SubscriptionTable::new()),
                state_tx,
            }),
            transport: Some(transport),
            running: None,
        }
    }

    /// Register a handler for `channel`. Handlers for the same channel run
    /// in registration order.
    pub fn on<F>(&self, channel: &str, handler: F)
    where
        F: FnMut(&ChannelEvent) + Send + 'static,
    {
        self.shared.subscriptions.lock().on(channel, Box::new(handler));
    }

    /// Register a listener for connection state transitions.
    pub fn on_state<F>(&self, listener: F)
    where
        F: FnMut(ConnectionState) + Send + 'static,
    {
        self.shared.subscriptions.lock().on_state(Box::new(listener));
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Watch connection state. Intermediate states may be coalesced; use
    /// `on_state` to observe every transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// True between `connect()` and `disconnect()`.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start the client task. No-op while already running (connecting,
    /// connected, or waiting to reconnect).
    pub fn connect(&mut self) {
        if self.running.is_some() {
            debug!("connect() ignored, stream client already running ({})", self.state());
            return;
        }

        let Some(transport) = self.transport.take() else {
            error!("connect() failed: transport was lost by a previous run");
            return;
        };

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(run(transport, self.config.clone(), self.shared.clone(), shutdown_rx));
        self.running = Some(Running { shutdown_tx, task });
    }

    /// Close the transport and stop. No reconnect is scheduled.
    pub async fn disconnect(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(());
            match running.task.await {
                Ok(transport) => self.transport = Some(transport),
                Err(e) => error!("Stream client task failed: {e}"),
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

/// Client task: connect, read until failure, back off, repeat.
async fn run(
    mut transport: Box<dyn Transport>,
    config: StreamConfig,
    shared: Arc<Shared>,
    mut shutdown: broadcast::Receiver<()>,
) -> Box<dyn Transport> {
    let kind = transport.kind();
    let mut backoff = Backoff::new(config.initial_reconnect_delay, config.max_reconnect_delay);
    let mut sequences: HashMap<String, u64> = HashMap::new();

    loop {
        let result = run_connection(
            transport.as_mut(),
            &config,
            &shared,
            &mut backoff,
            &mut sequences,
            &mut shutdown,
        )
        .await;
        transport.close().await;

        match result {
            Ok(()) => {
                info!("{kind} stream client: clean shutdown");
                shared.set_state(ConnectionState::Disconnected);
                return transport;
            }
            Err(e) => {
                shared.set_state(ConnectionState::Disconnected);
                let delay = backoff.next_delay();
                warn!("{kind} stream error: {e}, reconnecting in {delay:?}");

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.recv() => {
                        info!("{kind} stream client: shutdown during reconnect delay");
                        return transport;
                    }
                }
            }
        }
    }
}

/// Run a single connection. `Ok(())` means shutdown was requested.
async fn run_connection(
    transport: &mut dyn Transport,
    config: &StreamConfig,
    shared: &Shared,
    backoff: &mut Backoff,
    sequences: &mut HashMap<String, u64>,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), FeedError> {
    shared.set_state(ConnectionState::Connecting);

    let opened = tokio::select! {
        result = timeout(config.connect_timeout, transport.open()) => result,
        _ = shutdown.recv() => return Ok(()),
    };
    match opened {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(FeedError::Timeout),
    }

    shared.set_state(ConnectionState::Connected);
    backoff.reset();

    let mut deadline = Instant::now() + config.heartbeat_timeout;
    let mut degraded = false;

    loop {
        tokio::select! {
            frame = transport.next_frame() => {
                let Some(frame) = frame? else {
                    return Err(FeedError::StreamEnded);
                };

                deadline = Instant::now() + config.heartbeat_timeout;
                if degraded {
                    degraded = false;
                    info!("Stream traffic resumed");
                    shared.set_state(ConnectionState::Connected);
                }

                if let Frame::Channel { channel, payload } = frame {
                    let sequence = sequences.entry(channel.clone()).or_insert(0);
                    *sequence += 1;
                    let event = ChannelEvent {
                        channel,
                        sequence: *sequence,
                        received_at: Utc::now(),
                        payload,
                    };
                    let delivered = shared.subscriptions.lock().dispatch(&event);
                    if delivered == 0 {
                        debug!(channel = %event.channel, "No handlers for channel, event dropped");
                    }
                }
            }

            _ = sleep_until(deadline) => {
                // A second silent window means a half-open socket.
                if degraded {
                    warn!("Still no stream traffic after {:?}, reopening", config.heartbeat_timeout.saturating_mul(2));
                    return Err(FeedError::Timeout);
                }
                degraded = true;
                deadline += config.heartbeat_timeout;
                warn!("No stream traffic for {:?}, connection degraded", config.heartbeat_timeout);
                shared.set_state(ConnectionState::Degraded);
            }

            _ = shutdown.recv() => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_config_default() {
        let config = StreamConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(45));
        assert_eq!(config.initial_reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_subscription_table_dispatch_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut table = SubscriptionTable::new();

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            table.on("risk", Box::new(move |e: &ChannelEvent| seen.lock().push((tag, e.sequence))));
        }

        let event = ChannelEvent::new("risk", 7, json!({}));
        assert_eq!(table.dispatch(&event), 3);
        assert_eq!(
            *seen.lock(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );

        let other = ChannelEvent::new("positions", 1, json!([]));
        assert_eq!(table.dispatch(&other), 0);
        assert_eq!(table.handler_count("risk"), 3);
        assert_eq!(table.handler_count("positions"), 0);
    }
}
