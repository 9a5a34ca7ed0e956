//! Delivery statistics over rolling time windows.
//!
//! Read-only aggregation over message rows; computing counts at read time
//! (rather than maintaining counters) keeps the numbers correct even after a
//! crash mid-pass. Pending messages always count toward the window, whatever
//! `from` is, because they have no outcome timestamp to classify by.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::AnyMessage;
use crate::error::Result;
use crate::storage::Storage;

/// Reporting window, anchored at query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// Since midnight UTC today
    Today,
    /// Rolling 7 days
    Week,
    /// Rolling 30 days
    Month,
    /// Rolling 365 days
    Year,
}

impl Period {
    /// Start of the window relative to `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Period::Today => now.date_naive().and_time(NaiveTime::MIN).and_utc(),
            Period::Week => now - Duration::days(7),
            Period::Month => now - Duration::days(30),
            Period::Year => now - Duration::days(365),
        }
    }
}

/// Aggregated delivery figures for one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmsStatistics {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub pending: usize,
    /// Sum of recorded costs of sent messages in the window
    pub total_cost: Decimal,
    /// Sent as a percentage of total, rounded to two decimals; 0.0 for an
    /// empty window
    pub success_rate: f64,
}

/// Computes [`SmsStatistics`] from the message store.
pub struct StatisticsReporter<S: Storage> {
    store: Arc<S>,
}

impl<S: Storage> StatisticsReporter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self))]
    pub async fn report(&self, period: Period) -> Result<SmsStatistics> {
        let from = period.window_start(Utc::now());
        let messages = self.store.messages_since(from).await?;
        let stats = aggregate(&messages);
        tracing::debug!(
            total = stats.total,
            sent = stats.sent,
            failed = stats.failed,
            success_rate = stats.success_rate,
            "Computed statistics"
        );
        Ok(stats)
    }
}

fn aggregate(messages: &[AnyMessage]) -> SmsStatistics {
    let total = messages.len();
    let sent = messages.iter().filter(|m| m.is_sent()).count();
    let failed = messages.iter().filter(|m| m.is_failed()).count();
    let pending = total - sent - failed;
    let total_cost: Decimal = messages.iter().filter_map(|m| m.cost()).sum();

    let success_rate = if total == 0 {
        0.0
    } else {
        let rate = Decimal::from(sent as u64) * Decimal::ONE_HUNDRED / Decimal::from(total as u64);
        rate.round_dp(2).to_f64().unwrap_or(0.0)
    };

    SmsStatistics {
        total,
        sent,
        failed,
        pending,
        total_cost,
        success_rate,
    }
}
