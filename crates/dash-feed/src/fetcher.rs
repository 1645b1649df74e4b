//! Point-in-time pulls of dashboard resources.
//!
//! Every read degrades to the resource's empty value on failure and logs a
//! warning; callers never see transport errors for reads. The one write,
//! `apply_change`, returns an explicit outcome instead.

use std::time::Duration;

use chrono::NaiveDate;
use dash_common::{
    ApplyChangeRequest, ApplyChangeResponse, Channel, ChannelPayload, ConfigDocument, DailyReview,
    EquityPosition, EquitySnapshot, EvolutionSummary, ExternalAccount, HealthCheck, HealthPayload,
    OrderRecord, ParameterChange, PendingOrderRecord, PortfolioPayload, PositionRecord, RiskPayload,
    ScreenedStock, StatusPayload, Theme, TradeRecord, TradeStats,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Longest history window the backend serves.
pub const MAX_HISTORY_DAYS: u32 = 365;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors from a single pull.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{path} returned status {status}")]
    Status { path: String, status: u16 },

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of a rejected or failed apply-change request.
#[derive(Debug, Error)]
pub enum ApplyChangeError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned status {0}")]
    Status(u16),

    #[error("Change rejected: {0}")]
    Rejected(String),

    #[error("Malformed response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Inclusive date range for equity history. Reversed bounds are swapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EquityRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl EquityRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        if from <= to {
            Self { from, to }
        } else {
            Self { from: to, to: from }
        }
    }
}

/// Clamp a day window to what the backend accepts.
pub fn clamp_days(days: u32) -> u32 {
    days.clamp(1, MAX_HISTORY_DAYS)
}

/// Pull endpoint carrying the full state of a push channel, if any.
pub fn pull_path(channel: Channel) -> Option<&'static str> {
    match channel {
        Channel::Status => Some("/api/status"),
        Channel::Portfolio => Some("/api/portfolio"),
        Channel::Positions => Some("/api/positions"),
        Channel::Risk => Some("/api/risk"),
        Channel::PendingOrders => Some("/api/orders/pending"),
        Channel::ExternalAccounts => Some("/api/external-accounts/positions"),
        Channel::HealthChecks => Some("/api/health-checks"),
        // Events are push-only.
        Channel::Events => None,
    }
}

/// Pull client for the dashboard backend.
#[derive(Debug, Clone)]
pub struct SnapshotFetcher {
    http: Client,
    base_url: String,
}

impl SnapshotFetcher {
    /// Create a fetcher for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {url} {query:?}");

        let response = self.http.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// GET `path`, falling back to `empty` on any failure.
    async fn get_or<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)], empty: T) -> T {
        match self.get_json(path, query).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Pull {path} failed, using empty value: {e}");
                empty
            }
        }
    }

    /// Full state of a push channel from its pull endpoint.
    ///
    /// `None` when the pull failed or the channel has no pull endpoint;
    /// callers must not treat that as an empty value. `health_checks` comes
    /// back as the full check set.
    pub async fn fetch_channel(&self, channel: Channel) -> Option<ChannelPayload> {
        let path = pull_path(channel)?;
        let result = match channel {
            Channel::Status => self.get_json(path, &[]).await.map(ChannelPayload::Status),
            Channel::Portfolio => self.get_json(path, &[]).await.map(ChannelPayload::Portfolio),
            Channel::Positions => self.get_json(path, &[]).await.map(ChannelPayload::Positions),
            Channel::Risk => self.get_json(path, &[]).await.map(ChannelPayload::Risk),
            Channel::PendingOrders => self.get_json(path, &[]).await.map(ChannelPayload::PendingOrders),
            Channel::ExternalAccounts => self
                .get_json(path, &[])
                .await
                .map(ChannelPayload::ExternalAccounts),
            Channel::HealthChecks => self
                .get_json::<Vec<HealthCheck>>(path, &[])
                .await
                .map(|checks| ChannelPayload::HealthChecks(HealthPayload::Full(checks))),
            Channel::Events => return None,
        };

        match result {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(channel = %channel, "Channel pull failed: {e}");
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // Live state
    // ------------------------------------------------------------------------

    pub async fn status(&self) -> Option<StatusPayload> {
        self.get_or("/api/status", &[], None).await
    }

    pub async fn portfolio(&self) -> Option<PortfolioPayload> {
        self.get_or("/api/portfolio", &[], None).await
    }

    pub async fn positions(&self) -> Vec<PositionRecord> {
        self.get_or("/api/positions", &[], Vec::new()).await
    }

    pub async fn risk(&self) -> Option<RiskPayload> {
        self.get_or("/api/risk", &[], None).await
    }

    pub async fn pending_orders(&self) -> Vec<PendingOrderRecord> {
        self.get_or("/api/orders/pending", &[], Vec::new()).await
    }

    pub async fn external_positions(&self) -> Vec<ExternalAccount> {
        self.get_or("/api/external-accounts/positions", &[], Vec::new()).await
    }

    /// Full health check set, passing checks included.
    pub async fn health_checks(&self) -> Vec<HealthCheck> {
        self.get_or("/api/health-checks", &[], Vec::new()).await
    }

    // ------------------------------------------------------------------------
    // Trades and orders
    // ------------------------------------------------------------------------

    pub async fn today_trades(&self) -> Vec<TradeRecord> {
        self.get_or("/api/trades/today", &[], Vec::new()).await
    }

    pub async fn trades_by_date(&self, date: NaiveDate) -> Vec<TradeRecord> {
        let query = [("date", date.format(DATE_FORMAT).to_string())];
        self.get_or("/api/trades", &query, Vec::new()).await
    }

    pub async fn trade_stats(&self, days: u32) -> TradeStats {
        let query = [("days", clamp_days(days).to_string())];
        self.get_or("/api/trades/stats", &query, TradeStats::default()).await
    }

    pub async fn order_history(&self, days: u32) -> Vec<OrderRecord> {
        let query = [("days", clamp_days(days).to_string())];
        self.get_or("/api/orders/history", &query, Vec::new()).await
    }

    // ------------------------------------------------------------------------
    // Equity
    // ------------------------------------------------------------------------

    /// Daily equity snapshots for the last `days` days, oldest first.
    pub async fn equity_history(&self, days: u32) -> Vec<EquitySnapshot> {
        let query = [("days", clamp_days(days).to_string())];
        self.get_or("/api/equity-history", &query, Vec::new()).await
    }

    pub async fn equity_history_range(&self, range: EquityRange) -> Vec<EquitySnapshot> {
        let query = [
            ("from", range.from.format(DATE_FORMAT).to_string()),
            ("to", range.to.format(DATE_FORMAT).to_string()),
        ];
        self.get_or("/api/equity-history", &query, Vec::new()).await
    }

    /// Positions recorded in the equity snapshot of `date`.
    pub async fn equity_positions(&self, date: NaiveDate) -> Vec<EquityPosition> {
        let query = [("date", date.format(DATE_FORMAT).to_string())];
        self.get_or("/api/equity-history/positions", &query, Vec::new()).await
    }

    // ------------------------------------------------------------------------
    // Research and evolution
    // ------------------------------------------------------------------------

    pub async fn themes(&self) -> Vec<Theme> {
        self.get_or("/api/themes", &[], Vec::new()).await
    }

    pub async fn screening(&self) -> Vec<ScreenedStock> {
        self.get_or("/api/screening", &[], Vec::new()).await
    }

    /// Daily review for `date`, or the latest one.
    pub async fn daily_review(&self, date: Option<NaiveDate>) -> Option<DailyReview> {
        let query: Vec<(&str, String)> = date
            .map(|d| vec![("date", d.format(DATE_FORMAT).to_string())])
            .unwrap_or_default();
        self.get_or("/api/daily-review", &query, None).await
    }

    pub async fn review_dates(&self) -> Vec<String> {
        self.get_or("/api/daily-review/dates", &[], Vec::new()).await
    }

    pub async fn evolution(&self) -> Option<EvolutionSummary> {
        self.get_or("/api/evolution", &[], None).await
    }

    pub async fn evolution_history(&self) -> Vec<ParameterChange> {
        self.get_or("/api/evolution/history", &[], Vec::new()).await
    }

    pub async fn config(&self) -> Option<ConfigDocument> {
        self.get_or("/api/config", &[], None).await
    }

    /// Apply an evolved parameter change.
    ///
    /// Succeeds only on a 2xx response whose body reports `success: true`.
    /// A non-2xx response carrying a message is reported as `Rejected`.
    pub async fn apply_change(
        &self,
        request: &ApplyChangeRequest,
    ) -> Result<ApplyChangeResponse, ApplyChangeError> {
        if request.strategy.trim().is_empty() {
            return Err(ApplyChangeError::InvalidRequest("strategy is empty".to_string()));
        }
        if request.parameter.trim().is_empty() {
            return Err(ApplyChangeError::InvalidRequest("parameter is empty".to_string()));
        }

        let url = format!("{}/api/evolution/apply", self.base_url);
        info!(
            "Applying {}.{} = {} ({})",
            request.strategy, request.parameter, request.new_value, request.reason
        );

        let response = self.http.post(&url).json(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            if let Ok(verdict) = serde_json::from_slice::<ApplyChangeResponse>(&body) {
                if !verdict.message.is_empty() {
                    return Err(ApplyChangeError::Rejected(verdict.message));
                }
            }
            return Err(ApplyChangeError::Status(status.as_u16()));
        }

        let verdict: ApplyChangeResponse = serde_json::from_slice(&body)?;
        if !verdict.success {
            return Err(ApplyChangeError::Rejected(verdict.message));
        }
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_equity_range_swaps_reversed_bounds() {
        let range = EquityRange::new(date(2024, 3, 10), date(2024, 3, 1));
        assert_eq!(range.from, date(2024, 3, 1));
        assert_eq!(range.to, date(2024, 3, 10));

        let same = EquityRange::new(date(2024, 3, 1), date(2024, 3, 1));
        assert_eq!(same.from, same.to);
    }

    #[test]
    fn test_clamp_days() {
        assert_eq!(clamp_days(0), 1);
        assert_eq!(clamp_days(30), 30);
        assert_eq!(clamp_days(10_000), MAX_HISTORY_DAYS);
    }

    #[test]
    fn test_every_channel_but_events_has_pull_path() {
        for channel in Channel::ALL {
            assert_eq!(pull_path(channel).is_none(), channel == Channel::Events);
        }
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let fetcher = SnapshotFetcher::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(fetcher.base_url(), "http://localhost:8080");
    }
}
