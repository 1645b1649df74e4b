//! Canonical in-memory account state.
//!
//! `Aggregator::apply` (push events) and `Aggregator::apply_snapshot` (pull
//! results) are the only payload mutators. Both replace the channel's slot
//! wholesale and stamp `last_updated`; other channels are never touched.
//! A malformed payload is dropped and the slot keeps its previous value.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dash_common::{
    Channel, ChannelEvent, ChannelPayload, ConnectionState, EventRecord, ExternalAccount, HealthCheck,
    HealthPayload, PendingOrderRecord, PortfolioPayload, PositionRecord, RiskPayload, StatusPayload,
};
use tracing::{debug, warn};

// ============================================================================
// Health slot
// ============================================================================

/// Normalized `health_checks` slot.
///
/// Pushes carry only failing checks, pulls carry the full set. `complete`
/// records that a full set was seen at least once; it is what allows an
/// all-clear push to mean "healthy" rather than "unknown".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthState {
    pub checks: Vec<HealthCheck>,
    pub complete: bool,
}

impl HealthState {
    /// Checks currently failing.
    pub fn failing(&self) -> impl Iterator<Item = &HealthCheck> {
        self.checks.iter().filter(|c| !c.ok)
    }

    fn merge(&mut self, payload: HealthPayload) {
        match payload {
            HealthPayload::Full(checks) => {
                self.checks = checks;
                self.complete = true;
            }
            HealthPayload::Failing(failing) if self.complete => {
                // Known checks absent from the push are passing now.
                for check in self.checks.iter_mut() {
                    check.ok = true;
                }
                for item in failing {
                    match self.checks.iter_mut().find(|c| c.name == item.name) {
                        Some(known) => {
                            known.ok = false;
                            known.level = item.level;
                            known.message = item.message;
                            known.value = item.value;
                        }
                        None => self.checks.push(HealthCheck { ok: false, ..item }),
                    }
                }
            }
            HealthPayload::Failing(failing) => {
                self.checks = failing;
            }
        }
    }
}

// ============================================================================
// AccountSnapshot
// ============================================================================

/// Latest accepted payload per channel, plus connection labelling.
///
/// `is_demo` and `connection` change only on connection-state transitions,
/// never from a channel payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountSnapshot {
    pub status: Option<StatusPayload>,
    pub portfolio: Option<PortfolioPayload>,
    pub positions: Option<Vec<PositionRecord>>,
    pub risk: Option<RiskPayload>,
    pub events: Option<Vec<EventRecord>>,
    pub pending_orders: Option<Vec<PendingOrderRecord>>,
    pub external_accounts: Option<Vec<ExternalAccount>>,
    pub health: Option<HealthState>,

    /// Receipt time of the payload currently held per channel.
    pub last_updated: HashMap<Channel, DateTime<Utc>>,
    pub is_demo: bool,
    pub connection: ConnectionState,
}

impl AccountSnapshot {
    /// Empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True if `channel` holds a payload.
    pub fn has(&self, channel: Channel) -> bool {
        match channel {
            Channel::Status => self.status.is_some(),
            Channel::Portfolio => self.portfolio.is_some(),
            Channel::Positions => self.positions.is_some(),
            Channel::Risk => self.risk.is_some(),
            Channel::Events => self.events.is_some(),
            Channel::PendingOrders => self.pending_orders.is_some(),
            Channel::ExternalAccounts => self.external_accounts.is_some(),
            Channel::HealthChecks => self.health.is_some(),
        }
    }

    pub fn positions(&self) -> &[PositionRecord] {
        self.positions.as_deref().unwrap_or_default()
    }

    pub fn pending_orders(&self) -> &[PendingOrderRecord] {
        self.pending_orders.as_deref().unwrap_or_default()
    }

    pub fn events(&self) -> &[EventRecord] {
        self.events.as_deref().unwrap_or_default()
    }

    pub fn external_accounts(&self) -> &[ExternalAccount] {
        self.external_accounts.as_deref().unwrap_or_default()
    }

    /// Store a decoded payload in its slot.
    fn store(&mut self, payload: ChannelPayload) {
        match payload {
            ChannelPayload::Status(p) => self.status = Some(p),
            ChannelPayload::Portfolio(p) => self.portfolio = Some(p),
            ChannelPayload::Positions(p) => self.positions = Some(p),
            ChannelPayload::Risk(p) => self.risk = Some(p),
            ChannelPayload::Events(p) => self.events = Some(p),
            ChannelPayload::PendingOrders(p) => self.pending_orders = Some(p),
            ChannelPayload::ExternalAccounts(p) => self.external_accounts = Some(p),
            ChannelPayload::HealthChecks(p) => self.health.get_or_insert_with(HealthState::default).merge(p),
        }
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Owner of the `AccountSnapshot`.
#[derive(Debug, Default)]
pub struct Aggregator {
    snapshot: AccountSnapshot,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &AccountSnapshot {
        &self.snapshot
    }

    /// Apply a push event. Returns the channel updated, `None` if the event
    /// was dropped (unknown channel or malformed payload).
    pub fn apply(&mut self, event: &ChannelEvent) -> Option<Channel> {
        let channel: Channel = match event.channel.parse() {
            Ok(channel) => channel,
            Err(_) => {
                warn!(channel = %event.channel, "Dropping event for unknown channel");
                return None;
            }
        };

        match ChannelPayload::decode_push(channel, event.payload.clone()) {
            Ok(payload) => {
                self.snapshot.store(payload);
                self.snapshot.last_updated.insert(channel, event.received_at);
                debug!(channel = %channel, sequence = event.sequence, "Applied push event");
                Some(channel)
            }
            Err(e) => {
                warn!(sequence = event.sequence, "Dropping event: {e}");
                None
            }
        }
    }

    /// Apply a pull result for `channel`. A payload of another channel is
    /// rejected. Returns whether the slot was updated.
    pub fn apply_snapshot(
        &mut self,
        channel: Channel,
        payload: ChannelPayload,
        received_at: DateTime<Utc>,
    ) -> bool {
        if payload.channel() != channel {
            warn!(
                "Dropping {} payload delivered as {channel} snapshot",
                payload.channel()
            );
            return false;
        }
        self.snapshot.store(payload);
        self.snapshot.last_updated.insert(channel, received_at);
        true
    }

    pub(crate) fn set_connection(&mut self, connection: ConnectionState) {
        self.snapshot.connection = connection;
    }

    /// Replace the whole snapshot, keeping the connection label.
    pub(crate) fn replace(&mut self, mut snapshot: AccountSnapshot) {
        snapshot.connection = self.snapshot.connection;
        self.snapshot = snapshot;
    }
}
