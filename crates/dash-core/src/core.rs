//! Async driver and read handle.
//!
//! `SyncCore` owns one driver task. Stream client handlers, connection
//! transitions, pull completions, the demo grace timer and the health
//! refresh timer all resume on that task, so `SyncEngine` is only ever
//! touched from one place. Client handlers and state listeners forward into
//! a single queue, keeping transitions ordered with the events around them.
//!
//! The render layer reads through a `SyncHandle`: the latest published
//! `AccountSnapshot` plus derived views. Raw channel payloads are never
//! exposed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dash_common::{
    ApplyChangeRequest, ApplyChangeResponse, Channel, ChannelEvent, ChannelPayload, ConnectionState,
    EquitySnapshot, PositionRecord,
};
use dash_feed::{
    ApplyChangeError, ChannelStreamClient, EquityRange, FeedError, FetchError, PollTransport,
    SnapshotFetcher, SseTransport, Transport,
};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tracing::{debug, error, info, warn};

use crate::aggregator::AccountSnapshot;
use crate::config::{SyncConfig, TransportKind};
use crate::demo::demo_equity_series;
use crate::engine::{PullTicket, SyncEngine};
use crate::requests::{RequestId, RequestTracker};
use crate::store::{LocalStore, StoreError};
use crate::views::{self, EquityCurve, HealthBadge, PendingProgress, PositionSort, RiskGauges};

/// Builds the push transport for a configuration. Called at construction
/// and again on `reset()` after the base URL changed.
pub type TransportFactory =
    Box<dyn FnMut(&SyncConfig) -> Result<Box<dyn Transport>, FeedError> + Send>;

/// Transport selected by `config.transport`.
pub fn build_transport(config: &SyncConfig) -> Result<Box<dyn Transport>, FeedError> {
    let transport: Box<dyn Transport> = match config.transport {
        TransportKind::Stream => Box::new(SseTransport::new(
            &config.base_url,
            &config.stream_path,
            config.stream.connect_timeout,
        )?),
        TransportKind::Poll => Box::new(PollTransport::new(
            &config.base_url,
            &config.combined_state_path,
            config.poll_interval,
            config.request_timeout,
        )?),
    };
    Ok(transport)
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Transport setup failed: {0}")]
    Transport(#[from] FeedError),

    #[error("Fetcher setup failed: {0}")]
    Fetcher(#[from] FetchError),

    #[error("Preferences store: {0}")]
    Store(#[from] StoreError),

    #[error("Sync driver is not running")]
    NotRunning,
}

/// Resource key for history pulls made through the handle.
const EQUITY_HISTORY: &str = "equity_history";

// ============================================================================
// Driver
// ============================================================================

enum Input {
    Event(ChannelEvent),
    State(ConnectionState),
}

struct PullDone {
    ticket: PullTicket,
    payload: Option<ChannelPayload>,
    received_at: DateTime<Utc>,
}

enum Command {
    Connect,
    Disconnect(oneshot::Sender<()>),
    Reset(oneshot::Sender<Result<(), CoreError>>),
    SetBaseUrl(String),
    Shutdown,
}

struct Driver {
    config: SyncConfig,
    factory: TransportFactory,
    engine: SyncEngine,
    client: ChannelStreamClient,
    fetcher: Arc<RwLock<SnapshotFetcher>>,
    /// Base URL to switch to on the next reset.
    pending_base_url: Option<String>,
    input_tx: mpsc::UnboundedSender<Input>,
    input_rx: mpsc::UnboundedReceiver<Input>,
    pull_tx: mpsc::UnboundedSender<PullDone>,
    pull_rx: mpsc::UnboundedReceiver<PullDone>,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshot_tx: watch::Sender<Arc<AccountSnapshot>>,
}

/// Stream client whose handlers forward into the driver queue.
fn wire_client(
    config: &SyncConfig,
    transport: Box<dyn Transport>,
    input_tx: &mpsc::UnboundedSender<Input>,
) -> ChannelStreamClient {
    let client = ChannelStreamClient::new(config.stream.clone(), transport);
    for channel in Channel::ALL {
        let tx = input_tx.clone();
        client.on(channel.as_str(), move |event: &ChannelEvent| {
            let _ = tx.send(Input::Event(event.clone()));
        });
    }
    let tx = input_tx.clone();
    client.on_state(move |state| {
        let _ = tx.send(Input::State(state));
    });
    client
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(mut self) {
        info!("Sync driver started ({} via {})", self.config.base_url, self.config.transport);

        let period = self.config.health_refresh;
        let mut health_tick = interval_at(Instant::now() + period, period);
        health_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let grace_deadline = self.engine.grace_deadline();

            tokio::select! {
                Some(input) = self.input_rx.recv() => self.on_input(input),

                Some(done) = self.pull_rx.recv() => {
                    if self.engine.on_pull(done.ticket, done.payload, done.received_at) {
                        self.publish();
                    }
                }

                _ = sleep_until_deadline(grace_deadline) => {
                    if self.engine.poll_grace(Instant::now()) {
                        self.publish();
                    }
                }

                _ = health_tick.tick() => self.refresh_health(),

                command = self.commands.recv() => match command {
                    Some(Command::Connect) => self.connect(),
                    Some(Command::Disconnect(ack)) => {
                        self.disconnect().await;
                        let _ = ack.send(());
                    }
                    Some(Command::Reset(ack)) => {
                        let result = self.reset().await;
                        let _ = ack.send(result);
                    }
                    Some(Command::SetBaseUrl(url)) => {
                        info!("Base URL {url} takes effect on the next reset");
                        self.pending_base_url = Some(url);
                    }
                    Some(Command::Shutdown) | None => {
                        self.client.disconnect().await;
                        info!("Sync driver stopped");
                        break;
                    }
                },
            }
        }
    }

    fn on_input(&mut self, input: Input) {
        match input {
            Input::Event(event) => {
                if self.engine.on_event(&event) {
                    self.publish();
                }
            }
            Input::State(state) => {
                let tickets = self.engine.on_connection(state, Instant::now());
                if !tickets.is_empty() {
                    debug!("Warming {} channels from pull endpoints", tickets.len());
                }
                for ticket in tickets {
                    self.spawn_pull(ticket);
                }
                self.publish();
            }
        }
    }

    fn connect(&mut self) {
        if self.client.is_running() {
            debug!("Connect ignored, stream client already running");
            return;
        }
        self.engine.on_connect_attempt(Instant::now());
        self.client.connect();
        self.publish();
    }

    /// Stop the client and start over from an empty snapshot.
    async fn disconnect(&mut self) {
        self.client.disconnect().await;
        // Transitions queued by the stopped client belong to the old session.
        while self.input_rx.try_recv().is_ok() {}
        self.engine.reset();
        self.publish();
    }

    async fn reset(&mut self) -> Result<(), CoreError> {
        self.disconnect().await;
        let result = match self.pending_base_url.take() {
            Some(url) => self.rebuild(url),
            None => Ok(()),
        };
        self.connect();
        result
    }

    fn rebuild(&mut self, base_url: String) -> Result<(), CoreError> {
        let mut config = self.config.clone();
        config.base_url = base_url;

        let transport = (self.factory)(&config)?;
        let fetcher = SnapshotFetcher::new(&config.base_url, config.request_timeout)?;

        self.client = wire_client(&config, transport, &self.input_tx);
        *self.fetcher.write() = fetcher;
        info!("Switched backend to {}", config.base_url);
        self.config = config;
        Ok(())
    }

    fn refresh_health(&mut self) {
        if self.engine.snapshot().connection != ConnectionState::Connected {
            return;
        }
        if let Some(ticket) = self.engine.issue_pull(Channel::HealthChecks) {
            self.spawn_pull(ticket);
        }
    }

    fn spawn_pull(&self, ticket: PullTicket) {
        let fetcher = self.fetcher.read().clone();
        let tx = self.pull_tx.clone();
        tokio::spawn(async move {
            let payload = fetcher.fetch_channel(ticket.channel).await;
            let _ = tx.send(PullDone {
                ticket,
                payload,
                received_at: Utc::now(),
            });
        });
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(Arc::new(self.engine.snapshot().clone()));
    }
}

// ============================================================================
// SyncCore
// ============================================================================

/// Explicitly constructed sync core.
///
/// `new` builds everything without touching the network; `start` spawns
/// the driver and connects. `disconnect` and `reset` discard the snapshot;
/// `shutdown` stops the driver for good.
pub struct SyncCore {
    handle: SyncHandle,
    commands: mpsc::UnboundedSender<Command>,
    driver: Option<Driver>,
    task: Option<JoinHandle<()>>,
    store: Option<LocalStore>,
}

impl SyncCore {
    /// Core with the transport selected by the configuration.
    pub fn new(config: SyncConfig) -> Result<Self, CoreError> {
        Self::with_transport_factory(config, Box::new(build_transport))
    }

    /// Core with a caller-supplied transport factory.
    pub fn with_transport_factory(config: SyncConfig, mut factory: TransportFactory) -> Result<Self, CoreError> {
        let transport = factory(&config)?;
        let fetcher = Arc::new(RwLock::new(SnapshotFetcher::new(
            &config.base_url,
            config.request_timeout,
        )?));

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (pull_tx, pull_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let engine = SyncEngine::new(config.demo_grace);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(engine.snapshot().clone()));
        let client = wire_client(&config, transport, &input_tx);

        let handle = SyncHandle {
            snapshot_rx,
            fetcher: fetcher.clone(),
            history_requests: Arc::new(Mutex::new(RequestTracker::new())),
            fallback_threshold_pct: config.fallback_threshold_pct,
        };

        let driver = Driver {
            config,
            factory,
            engine,
            client,
            fetcher,
            pending_base_url: None,
            input_tx,
            input_rx,
            pull_tx,
            pull_rx,
            commands: command_rx,
            snapshot_tx,
        };

        Ok(Self {
            handle,
            commands: command_tx,
            driver: Some(driver),
            task: None,
            store: None,
        })
    }

    /// Persist base URL changes to `store`.
    pub fn with_store(mut self, store: LocalStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Spawn the driver (once) and connect.
    pub fn start(&mut self) {
        if let Some(driver) = self.driver.take() {
            self.task = Some(tokio::spawn(driver.run()));
        }
        let _ = self.commands.send(Command::Connect);
    }

    pub fn is_started(&self) -> bool {
        self.task.is_some()
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Reconnect after `disconnect`. No-op while connected or connecting.
    pub fn connect(&self) -> Result<(), CoreError> {
        self.send(Command::Connect)
    }

    /// Close the transport and discard the snapshot. No reconnect.
    pub async fn disconnect(&self) -> Result<(), CoreError> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Disconnect(ack))?;
        done.await.map_err(|_| CoreError::NotRunning)
    }

    /// Disconnect, discard the snapshot, apply a pending base URL and
    /// connect again.
    pub async fn reset(&self) -> Result<(), CoreError> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Reset(ack))?;
        done.await.map_err(|_| CoreError::NotRunning)?
    }

    /// Store `url` and use it from the next `reset`.
    pub fn set_base_url(&mut self, url: &str) -> Result<(), CoreError> {
        let url = url.trim_end_matches('/').to_string();
        if let Some(store) = self.store.as_mut() {
            store.set_base_url(&url)?;
        }
        self.send(Command::SetBaseUrl(url))
    }

    /// Stop the driver and close the transport.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            error!("Sync driver task failed: {e}");
        }
    }

    fn send(&self, command: Command) -> Result<(), CoreError> {
        if self.task.is_none() {
            return Err(CoreError::NotRunning);
        }
        self.commands.send(command).map_err(|_| CoreError::NotRunning)
    }
}

// ============================================================================
// SyncHandle
// ============================================================================

/// Read access to the synchronized state. Cheap to clone.
#[derive(Clone)]
pub struct SyncHandle {
    snapshot_rx: watch::Receiver<Arc<AccountSnapshot>>,
    fetcher: Arc<RwLock<SnapshotFetcher>>,
    history_requests: Arc<Mutex<RequestTracker<&'static str>>>,
    fallback_threshold_pct: f64,
}

impl SyncHandle {
    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<AccountSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<AccountSnapshot>> {
        self.snapshot_rx.clone()
    }

    pub fn connection(&self) -> ConnectionState {
        self.snapshot_rx.borrow().connection
    }

    pub fn is_demo(&self) -> bool {
        self.snapshot_rx.borrow().is_demo
    }

    /// Pull client for resources not carried on the stream.
    pub fn fetcher(&self) -> SnapshotFetcher {
        self.fetcher.read().clone()
    }

    pub fn sorted_positions(&self, sort: PositionSort) -> Vec<PositionRecord> {
        let snapshot = self.snapshot();
        views::sorted_positions(snapshot.positions(), sort)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn risk_gauges(&self) -> Option<RiskGauges> {
        views::risk_gauges(&self.snapshot())
    }

    pub fn pending_progress(&self) -> Vec<PendingProgress> {
        views::pending_progress(&self.snapshot(), self.fallback_threshold_pct)
    }

    pub fn health_badge(&self) -> HealthBadge {
        views::health_badge(self.snapshot().health.as_ref())
    }

    /// Equity curve for the last `days` days.
    ///
    /// `None` if a newer equity request was issued while this one was in
    /// flight. In demo the demo series is returned.
    pub async fn equity_curve(&self, days: u32) -> Option<EquityCurve> {
        if self.is_demo() {
            return Some(views::equity_curve(&demo_equity_series()));
        }
        let id = self.history_requests.lock().issue(EQUITY_HISTORY);
        let history = self.fetcher().equity_history(days).await;
        self.accept_history(id, history)
    }

    /// Equity curve for an explicit date range. Supersedes and is
    /// superseded by `equity_curve`.
    pub async fn equity_curve_range(&self, range: EquityRange) -> Option<EquityCurve> {
        if self.is_demo() {
            return Some(views::equity_curve(&demo_equity_series()));
        }
        let id = self.history_requests.lock().issue(EQUITY_HISTORY);
        let history = self.fetcher().equity_history_range(range).await;
        self.accept_history(id, history)
    }

    fn accept_history(
        &self,
        id: RequestId,
        history: Vec<EquitySnapshot>,
    ) -> Option<EquityCurve> {
        if !self.history_requests.lock().is_latest(&EQUITY_HISTORY, id) {
            debug!(id = %id, "Discarding superseded equity history response");
            return None;
        }
        if self.is_demo() {
            return Some(views::equity_curve(&demo_equity_series()));
        }
        Some(views::equity_curve(&history))
    }

    /// Apply an evolved parameter change. Failures are returned, not
    /// swallowed.
    pub async fn apply_change(
        &self,
        request: &ApplyChangeRequest,
    ) -> Result<ApplyChangeResponse, ApplyChangeError> {
        let result = self.fetcher().apply_change(request).await;
        if let Err(e) = &result {
            warn!("Apply change {}.{} failed: {e}", request.strategy, request.parameter);
        }
        result
    }
}
