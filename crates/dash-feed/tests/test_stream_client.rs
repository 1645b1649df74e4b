//! Integration tests for the channel stream client.
//!
//! All tests run on a paused clock with a scripted `MemoryTransport`:
//! - Ordered dispatch and per-channel sequence numbers
//! - Idempotent connect and clean disconnect
//! - Reconnect backoff, doubling to the ceiling and resetting on success
//! - DEGRADED after heartbeat silence, CONNECTED again on traffic
//! - A second silent window while DEGRADED reopens the connection

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::time::sleep;

use dash_common::{ChannelEvent, ConnectionState};
use dash_feed::{ChannelStreamClient, MemoryFeed, MemoryTransport, StreamConfig};

fn test_config() -> StreamConfig {
    StreamConfig {
        connect_timeout: Duration::from_secs(1),
        heartbeat_timeout: Duration::from_secs(5),
        initial_reconnect_delay: Duration::from_millis(100),
        max_reconnect_delay: Duration::from_millis(400),
    }
}

fn client() -> (ChannelStreamClient, MemoryFeed) {
    let (transport, feed) = MemoryTransport::new();
    (ChannelStreamClient::new(test_config(), Box::new(transport)), feed)
}

fn record_states(client: &ChannelStreamClient) -> Arc<Mutex<Vec<ConnectionState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    client.on_state(move |state| sink.lock().push(state));
    states
}

/// Let the client task run without advancing past any pending timer.
async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_handlers_run_in_registration_order() {
    let (mut client, feed) = client();
    let seen: Arc<Mutex<Vec<(&'static str, String, u64)>>> = Arc::new(Mutex::new(Vec::new()));

    for tag in ["a", "b"] {
        let seen = seen.clone();
        client.on("risk", move |e: &ChannelEvent| {
            seen.lock().push((tag, e.channel.clone(), e.sequence))
        });
    }
    let positions = seen.clone();
    client.on("positions", move |e: &ChannelEvent| {
        positions.lock().push(("p", e.channel.clone(), e.sequence))
    });

    client.connect();
    settle().await;

    feed.send("risk", json!({"daily_loss_pct": -1.0}));
    feed.send("positions", json!([]));
    feed.send("risk", json!({"daily_loss_pct": -2.0}));
    settle().await;

    let seen = seen.lock().clone();
    assert_eq!(
        seen,
        vec![
            ("a", "risk".to_string(), 1),
            ("b", "risk".to_string(), 1),
            ("p", "positions".to_string(), 1),
            ("a", "risk".to_string(), 2),
            ("b", "risk".to_string(), 2),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_payload_reaches_handler_unchanged() {
    let (mut client, feed) = client();
    let payloads = Arc::new(Mutex::new(Vec::new()));
    let sink = payloads.clone();
    client.on("status", move |e: &ChannelEvent| sink.lock().push(e.payload.clone()));

    client.connect();
    settle().await;
    feed.send("status", json!({"running": true, "session": "regular"}));
    feed.send("unknown_channel", json!({"ignored": true}));
    settle().await;

    assert_eq!(
        *payloads.lock(),
        vec![json!({"running": true, "session": "regular"})]
    );
}

#[tokio::test(start_paused = true)]
async fn test_sequence_continues_across_reconnect() {
    let (mut client, feed) = client();
    let sequences = Arc::new(Mutex::new(Vec::new()));
    let sink = sequences.clone();
    client.on("portfolio", move |e: &ChannelEvent| sink.lock().push(e.sequence));

    client.connect();
    settle().await;
    feed.send("portfolio", json!({}));
    feed.send("portfolio", json!({}));
    feed.fail("reset by peer");
    settle().await;

    // Reconnects after the base delay.
    sleep(Duration::from_millis(150)).await;
    assert_eq!(client.state(), ConnectionState::Connected);
    feed.send("portfolio", json!({}));
    settle().await;

    assert_eq!(*sequences.lock(), vec![1, 2, 3]);
}

// ============================================================================
// Connect / Disconnect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_is_idempotent() {
    let (mut client, feed) = client();
    let states = record_states(&client);

    client.connect();
    client.connect();
    settle().await;
    client.connect();
    settle().await;

    assert_eq!(feed.open_count(), 1);
    assert!(client.is_running());
    assert_eq!(
        *states.lock(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_reconnecting() {
    let (mut client, feed) = client();
    client.connect();
    settle().await;
    assert_eq!(client.state(), ConnectionState::Connected);

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!client.is_running());
    assert_eq!(feed.close_count(), 1);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(feed.open_count(), 1);

    // The transport comes back to the client and can be reopened.
    client.connect();
    settle().await;
    assert_eq!(feed.open_count(), 2);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_backoff() {
    let (mut client, feed) = client();
    feed.refuse_connections(true);
    client.connect();
    settle().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    client.disconnect().await;
    sleep(Duration::from_secs(5)).await;
    assert_eq!(feed.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_watch_state_sees_latest() {
    let (mut client, _feed) = client();
    let rx = client.watch_state();
    assert_eq!(*rx.borrow(), ConnectionState::Disconnected);

    client.connect();
    settle().await;
    assert_eq!(*rx.borrow(), ConnectionState::Connected);
}

// ============================================================================
// Backoff
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff_doubles_to_ceiling() {
    let (mut client, feed) = client();
    feed.refuse_connections(true);
    client.connect();

    // Attempts at 0, 100, 300, 700, 1100 ms (delays 100, 200, 400, 400).
    sleep(Duration::from_millis(1150)).await;
    assert_eq!(feed.open_count(), 5);

    // Next attempt at 1500 ms succeeds.
    feed.refuse_connections(false);
    sleep(Duration::from_millis(400)).await;
    assert_eq!(feed.open_count(), 6);
    assert_eq!(client.state(), ConnectionState::Connected);

    // After a successful connection the delay is back at the base.
    feed.fail("dropped");
    sleep(Duration::from_millis(50)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(feed.open_count(), 6);
    sleep(Duration::from_millis(60)).await;
    assert_eq!(feed.open_count(), 7);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_peer_close_triggers_reconnect() {
    let (mut client, feed) = client();
    let states = record_states(&client);
    client.connect();
    settle().await;

    feed.close();
    sleep(Duration::from_millis(150)).await;

    assert_eq!(feed.open_count(), 2);
    assert_eq!(
        *states.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
}

// ============================================================================
// Heartbeat / Degraded
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_silence_degrades_and_traffic_recovers() {
    let (mut client, feed) = client();
    let states = record_states(&client);
    client.connect();
    settle().await;

    sleep(Duration::from_secs(4)).await;
    feed.heartbeat();
    sleep(Duration::from_secs(4)).await;
    // Heartbeat at 4s pushed the deadline to 9s.
    assert_eq!(client.state(), ConnectionState::Connected);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(client.state(), ConnectionState::Degraded);

    feed.heartbeat();
    settle().await;
    assert_eq!(client.state(), ConnectionState::Connected);

    assert_eq!(
        *states.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Degraded,
            ConnectionState::Connected,
        ]
    );
    // Degraded is not a disconnect: nothing was reopened.
    assert_eq!(feed.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_prolonged_silence_reopens_connection() {
    let (mut client, feed) = client();
    let states = record_states(&client);
    client.connect();
    settle().await;

    sleep(Duration::from_secs(6)).await;
    assert_eq!(client.state(), ConnectionState::Degraded);
    assert_eq!(feed.open_count(), 1);

    // Second window ends at 10s, reopen after the 100ms base delay.
    sleep(Duration::from_millis(4500)).await;
    assert_eq!(feed.open_count(), 2);
    assert_eq!(feed.close_count(), 1);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(
        *states.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Degraded,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
}
