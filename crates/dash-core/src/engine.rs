//! Synchronous sync state machine.
//!
//! `SyncEngine` owns the aggregator, the arbiter and the pull request
//! tracker. It performs no I/O: the async driver feeds it connection
//! transitions, push events, pull results and the current time, and
//! executes the pulls it asks for.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dash_common::{Channel, ChannelEvent, ChannelPayload, ConnectionState};
use dash_feed::fetcher::pull_path;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::aggregator::{AccountSnapshot, Aggregator};
use crate::arbiter::{Arbiter, ArbiterState, ArbiterTransition};
use crate::demo::demo_snapshot;
use crate::requests::{RequestId, RequestTracker};

/// A pull the driver must execute and report back with `on_pull`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullTicket {
    pub channel: Channel,
    pub id: RequestId,
}

/// Aggregator + arbiter + request ids.
#[derive(Debug)]
pub struct SyncEngine {
    aggregator: Aggregator,
    arbiter: Arbiter,
    requests: RequestTracker<Channel>,
}

impl SyncEngine {
    pub fn new(demo_grace: Duration) -> Self {
        Self {
            aggregator: Aggregator::new(),
            arbiter: Arbiter::new(demo_grace),
            requests: RequestTracker::new(),
        }
    }

    pub fn snapshot(&self) -> &AccountSnapshot {
        self.aggregator.snapshot()
    }

    pub fn is_demo(&self) -> bool {
        self.arbiter.is_demo()
    }

    pub fn arbiter_state(&self) -> ArbiterState {
        self.arbiter.state()
    }

    /// Instant at which the running outage would switch to demo.
    pub fn grace_deadline(&self) -> Option<Instant> {
        self.arbiter.deadline()
    }

    /// A `connect()` is being issued.
    pub fn on_connect_attempt(&mut self, now: Instant) {
        if let Some(transition) = self.arbiter.on_connect_attempt(now) {
            self.apply_transition(transition);
        }
    }

    /// Connection state transition from the stream client.
    ///
    /// Returns the warm-up pulls to issue: one per pull-backed channel when
    /// the connection (re)opens or live data resumes after demo, none
    /// otherwise.
    pub fn on_connection(&mut self, connection: ConnectionState, now: Instant) -> Vec<PullTicket> {
        let previous = self.aggregator.snapshot().connection;
        self.aggregator.set_connection(connection);

        let left_demo = match self.arbiter.on_connection(connection, now) {
            Some(transition) => {
                self.apply_transition(transition);
                transition.left_demo()
            }
            None => false,
        };

        // Degraded -> Connected is resumed traffic on the same connection,
        // unless demo data was shown meanwhile and the slots start empty.
        let reopened = connection == ConnectionState::Connected && !previous.is_open();
        if reopened || left_demo { self.warm_up() } else { Vec::new() }
    }

    /// Let the grace period expire. Returns true if the engine switched to
    /// demo.
    pub fn poll_grace(&mut self, now: Instant) -> bool {
        match self.arbiter.poll(now) {
            Some(transition) => {
                self.apply_transition(transition);
                true
            }
            None => false,
        }
    }

    /// Apply a push event. Ignored in demo. Returns whether a slot changed.
    pub fn on_event(&mut self, event: &ChannelEvent) -> bool {
        if self.arbiter.is_demo() {
            debug!(channel = %event.channel, "Ignoring live event while in demo");
            return false;
        }
        self.aggregator.apply(event).is_some()
    }

    /// Issue a pull for `channel`. `None` in demo or for push-only channels.
    pub fn issue_pull(&mut self, channel: Channel) -> Option<PullTicket> {
        if self.arbiter.is_demo() || pull_path(channel).is_none() {
            return None;
        }
        let id = self.requests.issue(channel);
        Some(PullTicket { channel, id })
    }

    /// Pull result for a ticket. `None` means the pull failed and the slot
    /// keeps its value. Returns whether a slot changed.
    pub fn on_pull(
        &mut self,
        ticket: PullTicket,
        payload: Option<ChannelPayload>,
        received_at: DateTime<Utc>,
    ) -> bool {
        if !self.requests.is_latest(&ticket.channel, ticket.id) {
            debug!(channel = %ticket.channel, id = %ticket.id, "Discarding superseded pull response");
            return false;
        }
        if self.arbiter.is_demo() {
            debug!(channel = %ticket.channel, "Ignoring pull response while in demo");
            return false;
        }
        match payload {
            Some(payload) => self.aggregator.apply_snapshot(ticket.channel, payload, received_at),
            None => false,
        }
    }

    /// Discard everything: fresh snapshot, arbiter back to uninitialized,
    /// in-flight pulls superseded.
    pub fn reset(&mut self) {
        info!("Resetting account state");
        self.aggregator = Aggregator::new();
        self.arbiter.reset();
        self.requests.clear();
    }

    fn warm_up(&mut self) -> Vec<PullTicket> {
        Channel::ALL
            .into_iter()
            .filter_map(|channel| self.issue_pull(channel))
            .collect()
    }

    fn apply_transition(&mut self, transition: ArbiterTransition) {
        if transition.entered_demo() {
            // Partial live data is discarded wholesale.
            self.aggregator.replace(demo_snapshot());
            self.requests.clear();
        } else if transition.left_demo() {
            self.aggregator.replace(AccountSnapshot::empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_warm_up_skips_push_only_channels() {
        let now = Instant::now();
        let mut engine = SyncEngine::new(Duration::from_secs(10));
        engine.on_connect_attempt(now);
        engine.on_connection(ConnectionState::Connecting, now);
        let tickets = engine.on_connection(ConnectionState::Connected, now);

        let channels: Vec<Channel> = tickets.iter().map(|t| t.channel).collect();
        assert_eq!(channels.len(), Channel::ALL.len() - 1);
        assert!(!channels.contains(&Channel::Events));
    }

    #[test]
    fn test_degraded_recovery_does_not_warm_up() {
        let now = Instant::now();
        let mut engine = SyncEngine::new(Duration::from_secs(10));
        engine.on_connect_attempt(now);
        assert!(!engine.on_connection(ConnectionState::Connected, now).is_empty());
        assert!(engine.on_connection(ConnectionState::Degraded, now).is_empty());
        assert!(engine.on_connection(ConnectionState::Connected, now).is_empty());
    }

    #[test]
    fn test_reset_clears_snapshot() {
        let now = Instant::now();
        let mut engine = SyncEngine::new(Duration::from_secs(10));
        engine.on_connect_attempt(now);
        engine.on_connection(ConnectionState::Connected, now);
        engine.on_event(&ChannelEvent::new("risk", 1, json!({"daily_trades": 3})));
        assert!(engine.snapshot().risk.is_some());

        engine.reset();
        assert_eq!(*engine.snapshot(), AccountSnapshot::empty());
        assert_eq!(engine.arbiter_state(), ArbiterState::Uninitialized);
    }
}
