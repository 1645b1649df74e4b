//! Derived views.
//!
//! Pure functions of an `AccountSnapshot` (or of pulled history). Nothing
//! here is stored; callers recompute on every read.

use std::cmp::Ordering;

use chrono::NaiveDate;
use dash_common::{CheckLevel, EquitySnapshot, OrderSide, PendingOrderRecord, PositionRecord, RiskPayload};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::aggregator::{AccountSnapshot, HealthState};

/// Gauge percentage at which the tone turns to caution.
pub const CAUTION_PCT: f64 = 60.0;
/// Gauge percentage at which the tone turns to danger.
pub const DANGER_PCT: f64 = 80.0;

/// Share of the value range added above and below an equity curve.
const RANGE_PADDING_RATIO: f64 = 0.30;
/// Padding ratio of the maximum used when the series is flat.
const FLAT_PADDING_RATIO: f64 = 0.02;

// ============================================================================
// Risk gauges
// ============================================================================

/// `min(|value| / limit * 100, 100)`.
///
/// A non-positive limit leaves nothing to consume: 0 for a zero value,
/// otherwise 100.
pub fn gauge_pct(value: f64, limit: f64) -> f64 {
    let value = value.abs();
    if value.is_nan() {
        return 0.0;
    }
    if limit.is_nan() || limit <= 0.0 {
        return if value == 0.0 { 0.0 } else { 100.0 };
    }
    (value / limit * 100.0).min(100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GaugeTone {
    Normal,
    Caution,
    Danger,
}

impl GaugeTone {
    pub fn for_pct(pct: f64) -> Self {
        if pct >= DANGER_PCT {
            GaugeTone::Danger
        } else if pct >= CAUTION_PCT {
            GaugeTone::Caution
        } else {
            GaugeTone::Normal
        }
    }
}

/// One risk gauge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Gauge {
    pub value: f64,
    pub limit: f64,
    pub pct: f64,
    pub tone: GaugeTone,
}

impl Gauge {
    pub fn new(value: f64, limit: f64) -> Self {
        let pct = gauge_pct(value, limit);
        Self {
            value,
            limit,
            pct,
            tone: GaugeTone::for_pct(pct),
        }
    }
}

/// Usage of the three daily risk budgets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskGauges {
    /// Daily loss vs. daily loss limit. Only losses consume the budget.
    pub daily_loss: Gauge,
    pub trades: Gauge,
    pub positions: Gauge,
}

impl RiskGauges {
    pub fn from_risk(risk: &RiskPayload) -> Self {
        let loss = risk.daily_loss_pct.min(0.0);
        let max_positions = if risk.max_positions > 0 {
            risk.max_positions
        } else {
            risk.config_max_positions
        };
        Self {
            daily_loss: Gauge::new(loss, risk.daily_loss_limit_pct.abs()),
            trades: Gauge::new(risk.daily_trades as f64, risk.daily_max_trades as f64),
            positions: Gauge::new(risk.position_count as f64, max_positions as f64),
        }
    }

    /// Most severe tone across the gauges.
    pub fn worst_tone(&self) -> GaugeTone {
        [self.daily_loss.tone, self.trades.tone, self.positions.tone]
            .into_iter()
            .max_by_key(|tone| match tone {
                GaugeTone::Normal => 0,
                GaugeTone::Caution => 1,
                GaugeTone::Danger => 2,
            })
            .unwrap_or(GaugeTone::Normal)
    }
}

pub fn risk_gauges(snapshot: &AccountSnapshot) -> Option<RiskGauges> {
    snapshot.risk.as_ref().map(RiskGauges::from_risk)
}

// ============================================================================
// Sorted positions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    PnlPct,
    Pnl,
    Symbol,
    MarketValue,
    EntryTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

/// Caller-owned position ordering. Defaults to P&L percent, descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionSort {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl PositionSort {
    pub fn new(key: SortKey, direction: SortDirection) -> Self {
        Self { key, direction }
    }

    fn compare(&self, a: &PositionRecord, b: &PositionRecord) -> Ordering {
        let ord = match self.key {
            SortKey::PnlPct => a.unrealized_pnl_pct.total_cmp(&b.unrealized_pnl_pct),
            SortKey::Pnl => a.unrealized_pnl.cmp(&b.unrealized_pnl),
            SortKey::Symbol => a.symbol.cmp(&b.symbol),
            SortKey::MarketValue => a.market_value.cmp(&b.market_value),
            SortKey::EntryTime => a.entry_time.cmp(&b.entry_time),
        };
        match self.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    }
}

/// Positions in `sort` order. Stable: ties keep their original order.
pub fn sorted_positions<'a>(positions: &'a [PositionRecord], sort: PositionSort) -> Vec<&'a PositionRecord> {
    let mut sorted: Vec<&PositionRecord> = positions.iter().collect();
    sorted.sort_by(|a, b| sort.compare(a, b));
    sorted
}

// ============================================================================
// Equity curve
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PointTone {
    Neutral,
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub tone: PointTone,
}

/// Colored equity points with padded y-axis bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityCurve {
    pub points: Vec<EquityPoint>,
    pub y_min: f64,
    pub y_max: f64,
}

impl EquityCurve {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Tone of each point: the first is neutral, later ones are up when at or
/// above their predecessor.
pub fn point_tones(values: &[f64]) -> Vec<PointTone> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| match i {
            0 => PointTone::Neutral,
            _ if *v >= values[i - 1] => PointTone::Up,
            _ => PointTone::Down,
        })
        .collect()
}

/// Padded `(y_min, y_max)` for a series. `None` for an empty series.
///
/// Padding is 30% of the range; a flat series uses 2% of its maximum, and
/// 1.0 when that is zero, so `y_max > y_min` always holds.
pub fn y_bounds(values: &[f64]) -> Option<(f64, f64)> {
    let min = values.iter().copied().reduce(f64::min)?;
    let max = values.iter().copied().reduce(f64::max)?;

    let range = max - min;
    let padding = if range > 0.0 {
        range * RANGE_PADDING_RATIO
    } else {
        let flat = (max * FLAT_PADDING_RATIO).abs();
        if flat > 0.0 { flat } else { 1.0 }
    };
    Some((min - padding, max + padding))
}

/// Curve for daily equity snapshots, in the given order.
pub fn equity_curve(history: &[EquitySnapshot]) -> EquityCurve {
    let values: Vec<f64> = history
        .iter()
        .map(|s| s.total_equity.to_f64().unwrap_or(0.0))
        .collect();
    let tones = point_tones(&values);
    let (y_min, y_max) = y_bounds(&values).unwrap_or((0.0, 1.0));

    let points = history
        .iter()
        .zip(values)
        .zip(tones)
        .map(|((snapshot, value), tone)| EquityPoint {
            date: snapshot.date,
            value,
            tone,
        })
        .collect();

    EquityCurve { points, y_min, y_max }
}

// ============================================================================
// Pending orders
// ============================================================================

/// Progress of one pending order toward its market-order fallback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingProgress {
    pub symbol: String,
    pub name: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub progress_pct: f64,
    /// Progress reached the fallback threshold.
    pub imminent: bool,
}

impl PendingProgress {
    pub fn from_order(order: &PendingOrderRecord, threshold_pct: f64) -> Self {
        let progress_pct = order.progress_pct();
        Self {
            symbol: order.symbol.clone(),
            name: order.name.clone(),
            side: order.side,
            quantity: order.quantity,
            progress_pct,
            imminent: progress_pct >= threshold_pct,
        }
    }
}

pub fn pending_progress(snapshot: &AccountSnapshot, threshold_pct: f64) -> Vec<PendingProgress> {
    snapshot
        .pending_orders()
        .iter()
        .map(|o| PendingProgress::from_order(o, threshold_pct))
        .collect()
}

// ============================================================================
// Health badge
// ============================================================================

/// Aggregated health severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthBadge {
    /// No health data, or only failing-only pushes so far.
    Unknown,
    Ok,
    Warning,
    Critical,
}

impl HealthBadge {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthBadge::Unknown => "no data",
            HealthBadge::Ok => "ok",
            HealthBadge::Warning => "warning",
            HealthBadge::Critical => "critical",
        }
    }
}

impl std::fmt::Display for HealthBadge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// CRITICAL if any failing check is critical, else WARNING if any failing
/// check is a warning, else OK once the full check set has been seen.
/// Failing info checks never escalate.
pub fn health_badge(health: Option<&HealthState>) -> HealthBadge {
    let Some(health) = health else {
        return HealthBadge::Unknown;
    };

    let mut warning = false;
    for check in health.failing() {
        match check.level {
            CheckLevel::Critical => return HealthBadge::Critical,
            CheckLevel::Warning => warning = true,
            CheckLevel::Info => {}
        }
    }

    if warning {
        HealthBadge::Warning
    } else if health.complete {
        HealthBadge::Ok
    } else {
        HealthBadge::Unknown
    }
}
