//! Live/demo arbitration.
//!
//! Decides whether the snapshot shown to the user is live or synthetic.
//! Driven only by connection-state transitions and the passage of time,
//! never by channel payloads.
//!
//! ## States
//!
//! - **Uninitialized**: no connection attempt yet
//! - **Attempting**: first attempt in progress, nothing live shown yet
//! - **Live**: connected at least once since the last outage ended
//! - **Demo**: outage lasted beyond the grace period; synthetic data shown
//!
//! Any outage (disconnected, connecting or degraded) starts the grace
//! clock; reaching CONNECTED stops it. There is no terminal state.

use std::time::Duration;

use dash_common::ConnectionState;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArbiterState {
    #[default]
    Uninitialized,
    Attempting,
    Live,
    Demo,
}

impl std::fmt::Display for ArbiterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArbiterState::Uninitialized => write!(f, "Uninitialized"),
            ArbiterState::Attempting => write!(f, "Attempting"),
            ArbiterState::Live => write!(f, "Live"),
            ArbiterState::Demo => write!(f, "Demo"),
        }
    }
}

/// A state change made by the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterTransition {
    pub from: ArbiterState,
    pub to: ArbiterState,
}

impl ArbiterTransition {
    pub fn entered_demo(&self) -> bool {
        self.to == ArbiterState::Demo && self.from != ArbiterState::Demo
    }

    pub fn left_demo(&self) -> bool {
        self.from == ArbiterState::Demo && self.to != ArbiterState::Demo
    }
}

/// Live/demo state machine.
#[derive(Debug, Clone)]
pub struct Arbiter {
    state: ArbiterState,
    grace: Duration,
    /// Start of the current outage, if any.
    outage_since: Option<Instant>,
}

impl Arbiter {
    pub fn new(grace: Duration) -> Self {
        Self {
            state: ArbiterState::Uninitialized,
            grace,
            outage_since: None,
        }
    }

    pub fn state(&self) -> ArbiterState {
        self.state
    }

    pub fn is_demo(&self) -> bool {
        self.state == ArbiterState::Demo
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// A `connect()` was issued.
    pub fn on_connect_attempt(&mut self, now: Instant) -> Option<ArbiterTransition> {
        if self.state != ArbiterState::Uninitialized {
            return None;
        }
        self.outage_since.get_or_insert(now);
        Some(self.transition(ArbiterState::Attempting))
    }

    /// The stream client reported `connection`.
    pub fn on_connection(&mut self, connection: ConnectionState, now: Instant) -> Option<ArbiterTransition> {
        match connection {
            ConnectionState::Connected => {
                self.outage_since = None;
                match self.state {
                    ArbiterState::Live => None,
                    _ => Some(self.transition(ArbiterState::Live)),
                }
            }
            ConnectionState::Connecting | ConnectionState::Disconnected | ConnectionState::Degraded => {
                self.outage_since.get_or_insert(now);
                match self.state {
                    ArbiterState::Uninitialized => Some(self.transition(ArbiterState::Attempting)),
                    _ => None,
                }
            }
        }
    }

    /// Instant at which the running outage exhausts the grace period.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            ArbiterState::Attempting | ArbiterState::Live => self.outage_since.map(|since| since + self.grace),
            ArbiterState::Uninitialized | ArbiterState::Demo => None,
        }
    }

    /// Switch to demo once the outage has lasted the grace period.
    pub fn poll(&mut self, now: Instant) -> Option<ArbiterTransition> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        warn!("Backend unreachable for {:?}, switching to demo data", self.grace);
        Some(self.transition(ArbiterState::Demo))
    }

    /// Back to `Uninitialized`, forgetting any outage.
    pub fn reset(&mut self) {
        self.state = ArbiterState::Uninitialized;
        self.outage_since = None;
    }

    fn transition(&mut self, to: ArbiterState) -> ArbiterTransition {
        let from = self.state;
        self.state = to;
        info!("Live/demo arbiter: {from} -> {to}");
        ArbiterTransition { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_secs(10);

    #[test]
    fn test_initial_state() {
        let arbiter = Arbiter::new(GRACE);
        assert_eq!(arbiter.state(), ArbiterState::Uninitialized);
        assert!(!arbiter.is_demo());
        assert_eq!(arbiter.deadline(), None);
    }

    #[test]
    fn test_attempt_then_connected_is_live() {
        let t0 = Instant::now();
        let mut arbiter = Arbiter::new(GRACE);

        let t = arbiter.on_connect_attempt(t0).unwrap();
        assert_eq!(t.to, ArbiterState::Attempting);
        assert_eq!(arbiter.deadline(), Some(t0 + GRACE));
        assert!(arbiter.on_connect_attempt(t0).is_none());

        assert!(arbiter.on_connection(ConnectionState::Connecting, t0).is_none());
        let t = arbiter.on_connection(ConnectionState::Connected, t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(t.from, ArbiterState::Attempting);
        assert_eq!(t.to, ArbiterState::Live);
        assert_eq!(arbiter.deadline(), None);
    }

    #[test]
    fn test_deadline_tracks_outage_start() {
        let t0 = Instant::now();
        let mut arbiter = Arbiter::new(GRACE);
        arbiter.on_connect_attempt(t0);
        arbiter.on_connection(ConnectionState::Connected, t0);

        let drop_at = t0 + Duration::from_secs(30);
        arbiter.on_connection(ConnectionState::Degraded, drop_at);
        arbiter.on_connection(ConnectionState::Disconnected, drop_at + Duration::from_secs(3));
        arbiter.on_connection(ConnectionState::Connecting, drop_at + Duration::from_secs(4));
        assert_eq!(arbiter.deadline(), Some(drop_at + GRACE));
    }

    #[test]
    fn test_demo_reached_from_attempting() {
        let t0 = Instant::now();
        let mut arbiter = Arbiter::new(GRACE);
        arbiter.on_connect_attempt(t0);
        arbiter.on_connection(ConnectionState::Disconnected, t0);

        assert!(arbiter.poll(t0 + GRACE).unwrap().entered_demo());
        assert!(arbiter.is_demo());
        assert_eq!(arbiter.deadline(), None);
        assert!(arbiter.poll(t0 + GRACE * 2).is_none());
    }

    #[test]
    fn test_reset() {
        let t0 = Instant::now();
        let mut arbiter = Arbiter::new(GRACE);
        arbiter.on_connect_attempt(t0);
        arbiter.poll(t0 + GRACE);
        assert!(arbiter.is_demo());

        arbiter.reset();
        assert_eq!(arbiter.state(), ArbiterState::Uninitialized);
        assert_eq!(arbiter.deadline(), None);
    }
}
