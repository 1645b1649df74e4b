//! Channel names, connection states and raw channel events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named push channels carried by the stream transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Status,
    Portfolio,
    Positions,
    Risk,
    Events,
    PendingOrders,
    ExternalAccounts,
    HealthChecks,
}

impl Channel {
    /// Every push channel, in the order the warm-up pulls are issued.
    pub const ALL: [Channel; 8] = [
        Channel::Status,
        Channel::Portfolio,
        Channel::Positions,
        Channel::Risk,
        Channel::Events,
        Channel::PendingOrders,
        Channel::ExternalAccounts,
        Channel::HealthChecks,
    ];

    /// Wire name of the channel (the SSE `event:` field).
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Status => "status",
            Channel::Portfolio => "portfolio",
            Channel::Positions => "positions",
            Channel::Risk => "risk",
            Channel::Events => "events",
            Channel::PendingOrders => "pending_orders",
            Channel::ExternalAccounts => "external_accounts",
            Channel::HealthChecks => "health_checks",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown channel: {s}"))
    }
}

/// Connection state of the push transport.
///
/// Owned by the stream client; everything else only observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Transport open but silent past the heartbeat timeout.
    Degraded,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        }
    }

    /// True when the transport is open (connected or degraded).
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One payload received on a named channel.
///
/// Created on arrival and discarded once applied. `sequence` increases
/// monotonically per channel for the lifetime of the stream client.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub channel: String,
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl ChannelEvent {
    pub fn new(channel: impl Into<String>, sequence: u64, payload: serde_json::Value) -> Self {
        Self {
            channel: channel.into(),
            sequence,
            received_at: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_round_trips_wire_names() {
        for channel in Channel::ALL {
            assert_eq!(channel.as_str().parse::<Channel>(), Ok(channel));
        }
        assert!("message".parse::<Channel>().is_err());
    }

    #[test]
    fn test_connection_state_is_open() {
        assert!(ConnectionState::Connected.is_open());
        assert!(ConnectionState::Degraded.is_open());
        assert!(!ConnectionState::Connecting.is_open());
        assert!(!ConnectionState::Disconnected.is_open());
    }
}
