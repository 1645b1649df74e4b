//! Typed payloads for push channels and pull-only resources.
//!
//! Field names follow the backend JSON. Every struct tolerates missing
//! fields (`#[serde(default)]`) because the backend omits optional data
//! rather than sending nulls.
//!
//! CRITICAL: Use `Decimal` for money and prices, `f64` only for
//! percentages and ratios.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::channel::Channel;
use crate::time::deserialize_opt_timestamp;

/// A push payload that failed to decode into its channel's type.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed {channel} payload: {source}")]
    Malformed {
        channel: Channel,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// Status / Portfolio / Risk
// ============================================================================

/// Engine counters reported on the `status` channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineStats {
    pub events_processed: u64,
    pub signals_generated: u64,
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub errors_count: u64,
    pub paused: bool,
}

/// Market-data feed stats reported on the `status` channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedStats {
    pub connected: bool,
    pub subscribed_count: u32,
    pub message_count: u64,
    pub last_message_time: Option<String>,
}

/// Bot status (`status` channel, `/api/status`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusPayload {
    pub running: bool,
    /// Market session name (e.g. `regular`, `pre_market`, `closed`).
    pub session: String,
    pub uptime_seconds: f64,
    pub engine: EngineStats,
    pub websocket: FeedStats,
    pub watch_symbols_count: u32,
    #[serde(deserialize_with = "deserialize_opt_timestamp")]
    pub timestamp: Option<NaiveDateTime>,
}

/// Account totals (`portfolio` channel, `/api/portfolio`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioPayload {
    pub cash: Decimal,
    pub total_position_value: Decimal,
    pub total_equity: Decimal,
    pub initial_capital: Decimal,
    pub total_pnl: Decimal,
    pub total_pnl_pct: f64,
    pub daily_pnl: Decimal,
    pub daily_pnl_pct: f64,
    pub daily_trades: u32,
    pub cash_ratio: f64,
    pub position_count: u32,
}

/// Risk limits and current usage (`risk` channel, `/api/risk`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPayload {
    pub can_trade: bool,
    /// Daily P&L as a percent of initial capital (negative on a loss).
    pub daily_loss_pct: f64,
    /// Daily loss limit as a positive percent.
    pub daily_loss_limit_pct: f64,
    pub daily_trades: u32,
    pub daily_max_trades: u32,
    pub position_count: u32,
    /// Effective position limit (may be below the configured one).
    pub max_positions: u32,
    pub config_max_positions: u32,
    pub consecutive_losses: u32,
}

impl Default for RiskPayload {
    fn default() -> Self {
        Self {
            can_trade: true,
            daily_loss_pct: 0.0,
            daily_loss_limit_pct: 0.0,
            daily_trades: 0,
            daily_max_trades: 0,
            position_count: 0,
            max_positions: 0,
            config_max_positions: 0,
            consecutive_losses: 0,
        }
    }
}

// ============================================================================
// Positions
// ============================================================================

/// Partial profit-taking stage of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitStage {
    #[default]
    None,
    First,
    /// The backend's third partial exit is displayed as the second stage.
    #[serde(alias = "third")]
    Second,
    Trailing,
}

impl ExitStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitStage::None => "none",
            ExitStage::First => "first",
            ExitStage::Second => "second",
            ExitStage::Trailing => "trailing",
        }
    }
}

/// Exit-manager state attached to a position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitState {
    pub stage: ExitStage,
    pub original_quantity: i64,
    pub remaining_quantity: i64,
    pub highest_price: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
}

/// One open position (`positions` channel, `/api/positions`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionRecord {
    pub symbol: String,
    pub name: String,
    pub quantity: i64,
    pub avg_price: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: f64,
    pub strategy: String,
    #[serde(deserialize_with = "deserialize_opt_timestamp")]
    pub entry_time: Option<NaiveDateTime>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub exit_state: Option<ExitState>,
}

impl PositionRecord {
    /// Exit stage, `None` stage when the exit manager has no state yet.
    pub fn exit_stage(&self) -> ExitStage {
        self.exit_state.as_ref().map(|s| s.stage).unwrap_or_default()
    }

    /// Display name, falling back to the symbol.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.symbol
        } else {
            &self.name
        }
    }
}

// ============================================================================
// Events / Pending orders / External accounts
// ============================================================================

/// Trading event log entry (`events` channel).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventRecord {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub symbol: Option<String>,
    #[serde(alias = "time", deserialize_with = "deserialize_opt_timestamp")]
    pub timestamp: Option<NaiveDateTime>,
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    #[default]
    #[serde(alias = "BUY")]
    Buy,
    #[serde(alias = "SELL")]
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// Order waiting for a fill (`pending_orders` channel, `/api/orders/pending`).
///
/// When `elapsed_seconds` reaches `timeout_seconds` the backend cancels the
/// limit order and falls back to a market order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingOrderRecord {
    pub symbol: String,
    pub name: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub price: Option<Decimal>,
    pub elapsed_seconds: f64,
    pub timeout_seconds: f64,
}

impl PendingOrderRecord {
    /// Elapsed share of the timeout, in percent, clamped to [0, 100].
    pub fn progress_pct(&self) -> f64 {
        if self.timeout_seconds <= 0.0 {
            return 100.0;
        }
        let pct = self.elapsed_seconds / self.timeout_seconds * 100.0;
        if pct.is_nan() { 0.0 } else { pct.clamp(0.0, 100.0) }
    }
}

/// A position held in an account not managed by the bot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalPosition {
    pub symbol: String,
    pub name: String,
    pub quantity: i64,
    pub avg_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: f64,
}

/// External brokerage account (`external_accounts` channel).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalAccount {
    pub account: String,
    pub broker: String,
    pub total_equity: Decimal,
    pub positions: Vec<ExternalPosition>,
}

// ============================================================================
// Health checks
// ============================================================================

/// Severity class of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckLevel {
    Critical,
    Warning,
    /// Informational; never escalates the health badge.
    #[default]
    #[serde(other)]
    Info,
}

/// One named health check.
///
/// Push items carry no `ok` field: they are failing by definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheck {
    pub name: String,
    pub level: CheckLevel,
    pub ok: bool,
    pub message: String,
    pub value: Option<f64>,
}

/// The two shapes of the `health_checks` channel.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthPayload {
    /// Push shape: only the checks that are currently failing.
    Failing(Vec<HealthCheck>),
    /// Pull shape: every check, passing or not.
    Full(Vec<HealthCheck>),
}

impl HealthPayload {
    pub fn checks(&self) -> &[HealthCheck] {
        match self {
            HealthPayload::Failing(checks) | HealthPayload::Full(checks) => checks,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, HealthPayload::Full(_))
    }
}

// ============================================================================
// Channel payload union
// ============================================================================

/// Decoded payload of one push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelPayload {
    Status(StatusPayload),
    Portfolio(PortfolioPayload),
    Positions(Vec<PositionRecord>),
    Risk(RiskPayload),
    Events(Vec<EventRecord>),
    PendingOrders(Vec<PendingOrderRecord>),
    ExternalAccounts(Vec<ExternalAccount>),
    HealthChecks(HealthPayload),
}

impl ChannelPayload {
    /// The channel this payload belongs to.
    pub fn channel(&self) -> Channel {
        match self {
            ChannelPayload::Status(_) => Channel::Status,
            ChannelPayload::Portfolio(_) => Channel::Portfolio,
            ChannelPayload::Positions(_) => Channel::Positions,
            ChannelPayload::Risk(_) => Channel::Risk,
            ChannelPayload::Events(_) => Channel::Events,
            ChannelPayload::PendingOrders(_) => Channel::PendingOrders,
            ChannelPayload::ExternalAccounts(_) => Channel::ExternalAccounts,
            ChannelPayload::HealthChecks(_) => Channel::HealthChecks,
        }
    }

    /// Decode a push payload for `channel`.
    ///
    /// `health_checks` pushes are always the failing-only shape; any item
    /// marked `ok` is discarded.
    pub fn decode_push(channel: Channel, value: Value) -> Result<Self, PayloadError> {
        let malformed = |source| PayloadError::Malformed { channel, source };
        let payload = match channel {
            Channel::Status => ChannelPayload::Status(serde_json::from_value(value).map_err(malformed)?),
            Channel::Portfolio => {
                ChannelPayload::Portfolio(serde_json::from_value(value).map_err(malformed)?)
            }
            Channel::Positions => {
                ChannelPayload::Positions(serde_json::from_value(value).map_err(malformed)?)
            }
            Channel::Risk => ChannelPayload::Risk(serde_json::from_value(value).map_err(malformed)?),
            Channel::Events => ChannelPayload::Events(serde_json::from_value(value).map_err(malformed)?),
            Channel::PendingOrders => {
                ChannelPayload::PendingOrders(serde_json::from_value(value).map_err(malformed)?)
            }
            Channel::ExternalAccounts => {
                ChannelPayload::ExternalAccounts(serde_json::from_value(value).map_err(malformed)?)
            }
            Channel::HealthChecks => {
                let checks: Vec<HealthCheck> = serde_json::from_value(value).map_err(malformed)?;
                ChannelPayload::HealthChecks(HealthPayload::Failing(
                    checks.into_iter().filter(|c| !c.ok).collect(),
                ))
            }
        };
        Ok(payload)
    }
}

// ============================================================================
// Pull-only resources
// ============================================================================

/// A journal trade (`/api/trades`, `/api/trades/today`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeRecord {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub entry_strategy: String,
    #[serde(deserialize_with = "deserialize_opt_timestamp")]
    pub entry_time: Option<NaiveDateTime>,
    pub entry_price: Decimal,
    pub entry_quantity: i64,
    #[serde(deserialize_with = "deserialize_opt_timestamp")]
    pub exit_time: Option<NaiveDateTime>,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<String>,
    pub current_price: Option<Decimal>,
    pub pnl: Decimal,
    pub pnl_pct: f64,
    pub holding_minutes: Option<i64>,
}

impl TradeRecord {
    pub fn is_open(&self) -> bool {
        self.exit_time.is_none()
    }
}

/// Aggregated trade statistics (`/api/trades/stats`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeStats {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub avg_pnl_pct: f64,
    pub open_trades: u32,
    pub open_pnl: Decimal,
    pub open_avg_pnl_pct: f64,
    pub all_trades: u32,
}

/// End-of-day account snapshot (`/api/equity-history`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquitySnapshot {
    pub date: NaiveDate,
    pub total_equity: Decimal,
    pub cash: Decimal,
    pub positions_value: Decimal,
    pub daily_pnl: Decimal,
    pub daily_pnl_pct: f64,
    pub position_count: u32,
    pub trades_count: u32,
    pub win_rate: f64,
}

impl Default for EquitySnapshot {
    fn default() -> Self {
        Self {
            date: NaiveDate::MIN,
            total_equity: Decimal::ZERO,
            cash: Decimal::ZERO,
            positions_value: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            daily_pnl_pct: 0.0,
            position_count: 0,
            trades_count: 0,
            win_rate: 0.0,
        }
    }
}

/// A position as recorded in a day's equity snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquityPosition {
    pub symbol: String,
    pub name: String,
    pub quantity: i64,
    pub avg_price: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: f64,
}

/// Detected market theme (`/api/themes`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Theme {
    pub name: String,
    pub keywords: Vec<String>,
    pub related_stocks: Vec<String>,
    pub score: f64,
    pub news_count: u32,
    #[serde(deserialize_with = "deserialize_opt_timestamp")]
    pub detected_at: Option<NaiveDateTime>,
}

/// Screener hit (`/api/screening`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenedStock {
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
    pub change_pct: f64,
    pub volume: u64,
    pub volume_ratio: f64,
    pub score: f64,
    pub reasons: Vec<String>,
}

/// LLM daily review for one trading day (`/api/daily-review`).
///
/// Section contents vary between review versions and are kept as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyReview {
    pub date: String,
    #[serde(flatten)]
    pub sections: serde_json::Map<String, Value>,
}

/// Evolution engine counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionStats {
    pub version: u32,
    pub total_evolutions: u32,
    pub successful_changes: u32,
    pub rolled_back_changes: u32,
    pub last_evolution: Option<String>,
    pub assessment: String,
    pub confidence: f64,
}

/// One parameter change, before (`as_is`) and after (`to_be`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterChange {
    pub strategy: String,
    pub parameter: String,
    pub as_is: Value,
    pub to_be: Value,
    pub reason: String,
    pub source: String,
    pub confidence: Option<f64>,
    pub is_effective: Option<bool>,
    pub win_rate_before: Option<f64>,
    pub win_rate_after: Option<f64>,
    pub trades_before: Option<u32>,
    pub trades_after: Option<u32>,
    pub timestamp: Option<String>,
}

/// Evolution state and latest advice (`/api/evolution`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionSummary {
    pub summary: EvolutionStats,
    pub insights: Vec<Value>,
    pub parameter_changes: Vec<ParameterChange>,
    pub avoid_situations: Vec<Value>,
    pub focus_opportunities: Vec<Value>,
    pub next_week_outlook: String,
}

/// Completed or cancelled order (`/api/orders/history`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderRecord {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub filled_quantity: i64,
    pub price: Option<Decimal>,
    pub status: String,
    #[serde(deserialize_with = "deserialize_opt_timestamp")]
    pub submitted_at: Option<NaiveDateTime>,
}

/// Read-only bot configuration document (`/api/config`).
pub type ConfigDocument = serde_json::Map<String, Value>;

/// Request body for applying an evolved parameter change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyChangeRequest {
    pub strategy: String,
    pub parameter: String,
    pub new_value: Value,
    pub reason: String,
}

/// Backend verdict on an apply-change request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyChangeResponse {
    pub success: bool,
    pub message: String,
}
