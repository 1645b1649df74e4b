//! Integration tests for the aggregator and the views derived from it.
//!
//! Tests cover:
//! - Per-channel last-write-wins with interleaved channels
//! - Malformed and unknown events leave the snapshot untouched
//! - Health badge: unknown until a full set, failing-only pushes after it
//! - Risk gauges, pending order progress, equity bounds and position sort

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

use dash_common::{
    Channel, ChannelEvent, ChannelPayload, CheckLevel, EquitySnapshot, HealthCheck, HealthPayload,
    PendingOrderRecord, PositionRecord, RiskPayload,
};
use dash_core::views::{equity_curve, health_badge, pending_progress, risk_gauges, sorted_positions};
use dash_core::{
    AccountSnapshot, Aggregator, GaugeTone, HealthBadge, PointTone, PositionSort, SortDirection, SortKey,
};

fn event(channel: &str, sequence: u64, payload: serde_json::Value) -> ChannelEvent {
    ChannelEvent::new(channel, sequence, payload)
}

fn risk(daily_loss_pct: f64) -> serde_json::Value {
    json!({
        "can_trade": true,
        "daily_loss_pct": daily_loss_pct,
        "daily_loss_limit_pct": 5.0,
        "daily_trades": 2,
        "daily_max_trades": 10,
        "position_count": 1,
        "max_positions": 5,
        "config_max_positions": 5
    })
}

fn check(name: &str, level: CheckLevel, ok: bool) -> HealthCheck {
    HealthCheck {
        name: name.to_string(),
        level,
        ok,
        message: String::new(),
        value: None,
    }
}

// ============================================================================
// Last write wins
// ============================================================================

#[test]
fn test_interleaved_channels_keep_latest_per_channel() {
    let mut aggregator = Aggregator::new();

    aggregator.apply(&event("risk", 1, risk(-1.0)));
    aggregator.apply(&event("positions", 1, json!([{"symbol": "005930", "quantity": 10}])));
    aggregator.apply(&event("risk", 2, risk(-2.0)));
    aggregator.apply(&event("portfolio", 1, json!({"cash": 1000})));
    aggregator.apply(&event("risk", 3, risk(-4.0)));

    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.risk.as_ref().unwrap().daily_loss_pct, -4.0);
    assert_eq!(snapshot.positions().len(), 1);
    assert_eq!(snapshot.positions()[0].symbol, "005930");
    assert_eq!(snapshot.portfolio.as_ref().unwrap().cash, dec!(1000));
    assert!(!snapshot.has(Channel::Status));
    assert_eq!(snapshot.last_updated.len(), 3);
}

#[test]
fn test_positions_replaced_wholesale() {
    let mut aggregator = Aggregator::new();
    aggregator.apply(&event(
        "positions",
        1,
        json!([{"symbol": "005930"}, {"symbol": "000660"}]),
    ));
    aggregator.apply(&event("positions", 2, json!([{"symbol": "035420"}])));

    let symbols: Vec<&str> = aggregator.snapshot().positions().iter().map(|p| p.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["035420"]);

    aggregator.apply(&event("positions", 3, json!([])));
    assert!(aggregator.snapshot().has(Channel::Positions));
    assert!(aggregator.snapshot().positions().is_empty());
}

#[test]
fn test_malformed_event_keeps_previous_value() {
    let mut aggregator = Aggregator::new();
    aggregator.apply(&event("risk", 1, risk(-1.0)));
    let before = aggregator.snapshot().clone();

    assert_eq!(aggregator.apply(&event("risk", 2, json!("not an object"))), None);
    assert_eq!(aggregator.apply(&event("positions", 1, json!({"symbol": "x"}))), None);
    assert_eq!(*aggregator.snapshot(), before);
}

#[test]
fn test_unknown_channel_dropped() {
    let mut aggregator = Aggregator::new();
    assert_eq!(aggregator.apply(&event("order_book", 1, json!({}))), None);
    assert_eq!(*aggregator.snapshot(), AccountSnapshot::empty());
}

#[test]
fn test_pull_result_replaces_push_value() {
    let mut aggregator = Aggregator::new();
    aggregator.apply(&event("risk", 1, risk(-1.0)));

    let pulled: RiskPayload = serde_json::from_value(risk(-3.0)).unwrap();
    assert!(aggregator.apply_snapshot(Channel::Risk, ChannelPayload::Risk(pulled), Utc::now()));
    assert_eq!(aggregator.snapshot().risk.as_ref().unwrap().daily_loss_pct, -3.0);

    // Later push wins again.
    aggregator.apply(&event("risk", 2, risk(-0.5)));
    assert_eq!(aggregator.snapshot().risk.as_ref().unwrap().daily_loss_pct, -0.5);
}

#[test]
fn test_mismatched_pull_rejected() {
    let mut aggregator = Aggregator::new();
    let payload = ChannelPayload::Positions(vec![]);
    assert!(!aggregator.apply_snapshot(Channel::Risk, payload, Utc::now()));
    assert!(!aggregator.snapshot().has(Channel::Risk));
    assert!(!aggregator.snapshot().has(Channel::Positions));
}

// ============================================================================
// Health
// ============================================================================

#[test]
fn test_health_unknown_without_data() {
    let aggregator = Aggregator::new();
    assert_eq!(health_badge(aggregator.snapshot().health.as_ref()), HealthBadge::Unknown);
    assert_eq!(HealthBadge::Unknown.as_str(), "no data");
}

#[test]
fn test_health_empty_push_before_full_set_is_unknown() {
    let mut aggregator = Aggregator::new();
    aggregator.apply(&event("health_checks", 1, json!([])));
    assert_eq!(health_badge(aggregator.snapshot().health.as_ref()), HealthBadge::Unknown);
}

#[test]
fn test_health_failing_push_escalates() {
    let mut aggregator = Aggregator::new();
    aggregator.apply(&event(
        "health_checks",
        1,
        json!([{"name": "disk_usage", "level": "warning", "ok": false, "message": "Disk 91%"}]),
    ));
    assert_eq!(health_badge(aggregator.snapshot().health.as_ref()), HealthBadge::Warning);

    aggregator.apply(&event(
        "health_checks",
        2,
        json!([
            {"name": "disk_usage", "level": "warning", "ok": false},
            {"name": "broker_api", "level": "critical", "ok": false}
        ]),
    ));
    assert_eq!(health_badge(aggregator.snapshot().health.as_ref()), HealthBadge::Critical);
}

#[test]
fn test_health_all_clear_after_full_set_is_ok() {
    let mut aggregator = Aggregator::new();
    let full = HealthPayload::Full(vec![
        check("ws_feed", CheckLevel::Critical, true),
        check("disk_usage", CheckLevel::Warning, false),
    ]);
    aggregator.apply_snapshot(Channel::HealthChecks, ChannelPayload::HealthChecks(full), Utc::now());
    assert_eq!(health_badge(aggregator.snapshot().health.as_ref()), HealthBadge::Warning);

    aggregator.apply(&event("health_checks", 1, json!([])));
    assert_eq!(health_badge(aggregator.snapshot().health.as_ref()), HealthBadge::Ok);
    assert_eq!(aggregator.snapshot().health.as_ref().unwrap().checks.len(), 2);
}

#[test]
fn test_health_failing_info_does_not_escalate() {
    let mut aggregator = Aggregator::new();
    let full = HealthPayload::Full(vec![check("memory_usage", CheckLevel::Info, false)]);
    aggregator.apply_snapshot(Channel::HealthChecks, ChannelPayload::HealthChecks(full), Utc::now());
    assert_eq!(health_badge(aggregator.snapshot().health.as_ref()), HealthBadge::Ok);
}

// ============================================================================
// Views
// ============================================================================

#[test]
fn test_risk_gauges_follow_daily_loss() {
    let mut aggregator = Aggregator::new();
    let expected = [(-1.0, 20.0, GaugeTone::Normal), (-2.0, 40.0, GaugeTone::Normal), (-4.0, 80.0, GaugeTone::Danger)];

    for (i, (loss, pct, tone)) in expected.into_iter().enumerate() {
        aggregator.apply(&event("risk", i as u64 + 1, risk(loss)));
        let gauges = risk_gauges(aggregator.snapshot()).unwrap();
        assert!((gauges.daily_loss.pct - pct).abs() < 1e-9, "loss {loss}: {}", gauges.daily_loss.pct);
        assert_eq!(gauges.daily_loss.tone, tone);
    }
}

#[test]
fn test_risk_gauge_monotonic_in_loss() {
    let mut previous = -1.0;
    for step in 0..=60 {
        let loss = -(step as f64) * 0.1;
        let payload: RiskPayload = serde_json::from_value(risk(loss)).unwrap();
        let pct = dash_core::RiskGauges::from_risk(&payload).daily_loss.pct;
        assert!(pct >= previous);
        assert!((0.0..=100.0).contains(&pct));
        previous = pct;
    }
}

#[test]
fn test_profit_day_uses_no_loss_budget() {
    let payload: RiskPayload = serde_json::from_value(risk(1.5)).unwrap();
    let gauges = dash_core::RiskGauges::from_risk(&payload);
    assert_eq!(gauges.daily_loss.pct, 0.0);
}

#[test]
fn test_pending_order_near_fallback() {
    let mut snapshot = AccountSnapshot::empty();
    snapshot.pending_orders = Some(vec![
        PendingOrderRecord {
            symbol: "035720".to_string(),
            elapsed_seconds: 72.0,
            timeout_seconds: 90.0,
            ..Default::default()
        },
        PendingOrderRecord {
            symbol: "005930".to_string(),
            elapsed_seconds: 30.0,
            timeout_seconds: 90.0,
            ..Default::default()
        },
    ]);

    let progress = pending_progress(&snapshot, 80.0);
    assert!((progress[0].progress_pct - 80.0).abs() < 1e-9);
    assert!(progress[0].imminent);
    assert!(!progress[1].imminent);
}

#[test]
fn test_flat_equity_curve_bounds() {
    let history: Vec<EquitySnapshot> = (1..=3)
        .map(|day| EquitySnapshot {
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            total_equity: dec!(100),
            ..Default::default()
        })
        .collect();

    let curve = equity_curve(&history);
    assert_eq!(curve.points.len(), 3);
    assert!((curve.y_min - 98.0).abs() < 1e-9);
    assert!((curve.y_max - 102.0).abs() < 1e-9);
    assert_eq!(curve.points[0].tone, PointTone::Neutral);
    assert_eq!(curve.points[1].tone, PointTone::Up);
}

#[test]
fn test_equity_curve_tones() {
    let values = [100, 110, 105, 105];
    let history: Vec<EquitySnapshot> = values
        .iter()
        .enumerate()
        .map(|(i, v)| EquitySnapshot {
            date: NaiveDate::from_ymd_opt(2024, 3, i as u32 + 1).unwrap(),
            total_equity: Decimal::from(*v),
            ..Default::default()
        })
        .collect();

    let tones: Vec<PointTone> = equity_curve(&history).points.iter().map(|p| p.tone).collect();
    assert_eq!(tones, vec![PointTone::Neutral, PointTone::Up, PointTone::Down, PointTone::Up]);
}

#[test]
fn test_position_sort_is_stable() {
    let position = |symbol: &str, pct: f64| PositionRecord {
        symbol: symbol.to_string(),
        unrealized_pnl_pct: pct,
        ..Default::default()
    };
    let positions = vec![position("A", 1.0), position("B", 3.0), position("C", 1.0), position("D", 3.0)];

    let desc: Vec<&str> = sorted_positions(&positions, PositionSort::default())
        .iter()
        .map(|p| p.symbol.as_str())
        .collect();
    assert_eq!(desc, vec!["B", "D", "A", "C"]);

    let asc: Vec<&str> = sorted_positions(&positions, PositionSort::new(SortKey::PnlPct, SortDirection::Ascending))
        .iter()
        .map(|p| p.symbol.as_str())
        .collect();
    assert_eq!(asc, vec!["A", "C", "B", "D"]);
}
