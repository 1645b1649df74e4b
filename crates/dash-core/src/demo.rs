//! Fixed illustrative dataset shown while the backend is unreachable.

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use dash_common::{
    CheckLevel, EngineStats, EquitySnapshot, EventRecord, ExitStage, ExitState, ExternalAccount,
    ExternalPosition, FeedStats, HealthCheck, OrderSide, PendingOrderRecord, PortfolioPayload,
    PositionRecord, RiskPayload, StatusPayload,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

use crate::aggregator::{AccountSnapshot, HealthState};

/// Daily equity changes of the demo series, in won.
const EQUITY_STEPS: [i64; 19] = [
    120_000, -45_000, 80_000, 150_000, -210_000, 60_000, 95_000, 0, -30_000, 175_000, 40_000,
    -120_000, 210_000, 65_000, -15_000, 130_000, -90_000, 55_000, 101_000,
];

const DEMO_INITIAL_EQUITY: Decimal = dec!(10000000);

fn demo_time(h: u32, m: u32) -> Option<NaiveDateTime> {
    Utc::now().date_naive().and_hms_opt(h, m, 0)
}

fn check(name: &str, level: CheckLevel, ok: bool, message: &str, value: Option<f64>) -> HealthCheck {
    HealthCheck {
        name: name.to_string(),
        level,
        ok,
        message: message.to_string(),
        value,
    }
}

fn position(
    symbol: &str,
    name: &str,
    quantity: i64,
    avg_price: Decimal,
    current_price: Decimal,
    strategy: &str,
    stage: ExitStage,
) -> PositionRecord {
    let cost = avg_price * Decimal::from(quantity);
    let market_value = current_price * Decimal::from(quantity);
    let pnl = market_value - cost;
    let pnl_pct = if avg_price.is_zero() {
        0.0
    } else {
        ((current_price - avg_price) / avg_price * dec!(100)).to_f64().unwrap_or(0.0)
    };

    PositionRecord {
        symbol: symbol.to_string(),
        name: name.to_string(),
        quantity,
        avg_price,
        current_price,
        market_value,
        unrealized_pnl: pnl,
        unrealized_pnl_pct: pnl_pct,
        strategy: strategy.to_string(),
        entry_time: demo_time(9, 12),
        stop_loss: Some((avg_price * dec!(0.975)).round()),
        take_profit: Some((avg_price * dec!(1.05)).round()),
        exit_state: Some(ExitState {
            stage,
            original_quantity: quantity,
            remaining_quantity: quantity,
            highest_price: Some(current_price),
            realized_pnl: None,
        }),
    }
}

/// Demo snapshot covering every channel, marked `is_demo`.
pub fn demo_snapshot() -> AccountSnapshot {
    let positions = vec![
        position("005930", "Samsung Electronics", 40, dec!(71200), dec!(73400), "momentum_breakout", ExitStage::First),
        position("000660", "SK hynix", 8, dec!(182500), dec!(179900), "theme_chasing", ExitStage::None),
        position("035420", "NAVER", 12, dec!(188000), dec!(199300), "gap_and_go", ExitStage::Trailing),
    ];
    let position_value: Decimal = positions.iter().map(|p| p.market_value).sum();
    let total_equity = demo_equity_series()
        .last()
        .map(|s| s.total_equity)
        .unwrap_or(DEMO_INITIAL_EQUITY);
    let cash = total_equity - position_value;

    AccountSnapshot {
        status: Some(StatusPayload {
            running: true,
            session: "regular".to_string(),
            uptime_seconds: 11_520.0,
            engine: EngineStats {
                events_processed: 48_213,
                signals_generated: 37,
                orders_submitted: 9,
                orders_filled: 8,
                errors_count: 0,
                paused: false,
            },
            websocket: FeedStats {
                connected: true,
                subscribed_count: 40,
                message_count: 46_907,
                last_message_time: None,
            },
            watch_symbols_count: 40,
            timestamp: None,
        }),
        portfolio: Some(PortfolioPayload {
            cash,
            total_position_value: position_value,
            total_equity,
            initial_capital: DEMO_INITIAL_EQUITY,
            total_pnl: total_equity - DEMO_INITIAL_EQUITY,
            total_pnl_pct: 7.71,
            daily_pnl: dec!(101000),
            daily_pnl_pct: 0.95,
            daily_trades: 4,
            cash_ratio: 0.37,
            position_count: positions.len() as u32,
        }),
        risk: Some(RiskPayload {
            can_trade: true,
            daily_loss_pct: -1.2,
            daily_loss_limit_pct: 5.0,
            daily_trades: 4,
            daily_max_trades: 10,
            position_count: positions.len() as u32,
            max_positions: 5,
            config_max_positions: 5,
            consecutive_losses: 1,
        }),
        positions: Some(positions),
        events: Some(vec![
            EventRecord {
                id: 3,
                kind: "fill".to_string(),
                message: "NAVER buy 12 @ 188,000 filled".to_string(),
                symbol: Some("035420".to_string()),
                timestamp: demo_time(9, 41),
            },
            EventRecord {
                id: 2,
                kind: "exit".to_string(),
                message: "Samsung Electronics first partial exit".to_string(),
                symbol: Some("005930".to_string()),
                timestamp: demo_time(10, 5),
            },
            EventRecord {
                id: 1,
                kind: "signal".to_string(),
                message: "Kakao breakout signal".to_string(),
                symbol: Some("035720".to_string()),
                timestamp: demo_time(10, 22),
            },
        ]),
        pending_orders: Some(vec![PendingOrderRecord {
            symbol: "035720".to_string(),
            name: "Kakao".to_string(),
            side: OrderSide::Buy,
            quantity: 30,
            price: Some(dec!(48350)),
            elapsed_seconds: 41.0,
            timeout_seconds: 90.0,
        }]),
        external_accounts: Some(vec![ExternalAccount {
            account: "ISA-01".to_string(),
            broker: "Demo Securities".to_string(),
            total_equity: dec!(3250000),
            positions: vec![ExternalPosition {
                symbol: "069500".to_string(),
                name: "KODEX 200".to_string(),
                quantity: 80,
                avg_price: dec!(36900),
                current_price: dec!(37450),
                unrealized_pnl: dec!(44000),
                unrealized_pnl_pct: 1.49,
            }],
        }]),
        health: Some(HealthState {
            checks: vec![
                check("ws_feed", CheckLevel::Critical, true, "Market feed connected", None),
                check("broker_api", CheckLevel::Critical, true, "Broker API reachable", None),
                check("event_queue", CheckLevel::Warning, true, "Queue depth normal", Some(3.0)),
                check("disk_usage", CheckLevel::Warning, true, "Disk usage 41%", Some(41.0)),
                check("memory_usage", CheckLevel::Info, true, "Memory usage 58%", Some(58.0)),
            ],
            complete: true,
        }),
        last_updated: Default::default(),
        is_demo: true,
        connection: Default::default(),
    }
}

/// 20 daily equity points ending today, oldest first.
pub fn demo_equity_series() -> Vec<EquitySnapshot> {
    demo_equity_series_ending(Utc::now().date_naive())
}

fn demo_equity_series_ending(end: NaiveDate) -> Vec<EquitySnapshot> {
    let count = EQUITY_STEPS.len() as i64 + 1;
    let mut equity = DEMO_INITIAL_EQUITY;
    let mut series = Vec::with_capacity(count as usize);

    for i in 0..count {
        let step = if i == 0 { 0 } else { EQUITY_STEPS[(i - 1) as usize] };
        let daily_pnl = Decimal::from(step);
        let previous = equity;
        equity += daily_pnl;
        let daily_pnl_pct = if previous.is_zero() {
            0.0
        } else {
            (daily_pnl / previous * dec!(100)).to_f64().unwrap_or(0.0)
        };

        series.push(EquitySnapshot {
            date: end - ChronoDuration::days(count - 1 - i),
            total_equity: equity,
            cash: equity * dec!(0.7),
            positions_value: equity * dec!(0.3),
            daily_pnl,
            daily_pnl_pct,
            position_count: 3,
            trades_count: (i % 5) as u32,
            win_rate: 55.0,
        });
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use dash_common::Channel;

    #[test]
    fn test_demo_snapshot_covers_every_channel() {
        let snapshot = demo_snapshot();
        assert!(snapshot.is_demo);
        for channel in Channel::ALL {
            assert!(snapshot.has(channel), "demo snapshot missing {channel}");
        }
        assert_eq!(snapshot.positions().len(), 3);
        assert_eq!(snapshot.pending_orders().len(), 1);
        assert_eq!(snapshot.external_accounts().len(), 1);
        assert!(snapshot.health.as_ref().is_some_and(|h| h.complete));
    }

    #[test]
    fn test_demo_positions_cover_exit_stages() {
        let snapshot = demo_snapshot();
        let stages: Vec<_> = snapshot.positions().iter().map(|p| p.exit_stage()).collect();
        assert!(stages.contains(&ExitStage::None));
        assert!(stages.contains(&ExitStage::First));
        assert!(stages.contains(&ExitStage::Trailing));
    }

    #[test]
    fn test_demo_equity_series() {
        let end = NaiveDate::from_ymd_opt(2024, 3, 29).unwrap();
        let series = demo_equity_series_ending(end);
        assert_eq!(series.len(), 20);
        assert_eq!(series[0].total_equity, DEMO_INITIAL_EQUITY);
        assert_eq!(series[19].date, end);
        assert!(series.windows(2).all(|w| w[0].date < w[1].date));

        let total: i64 = EQUITY_STEPS.iter().sum();
        assert_eq!(series[19].total_equity, DEMO_INITIAL_EQUITY + Decimal::from(total));
    }

    #[test]
    fn test_demo_portfolio_consistent_with_positions() {
        let snapshot = demo_snapshot();
        let portfolio = snapshot.portfolio.as_ref().unwrap();
        assert_eq!(portfolio.cash + portfolio.total_position_value, portfolio.total_equity);
        assert_eq!(portfolio.position_count, 3);
    }
}
