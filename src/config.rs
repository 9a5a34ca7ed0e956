//! Configuration for the dispatch engine.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Configuration for batch dispatch.
///
/// The two delay layers (between chunks and between messages) are deliberate
/// backpressure against a rate-limited upstream gateway, not incidental
/// pacing. Both are tunable; the defaults mirror what the gateway contracts
/// tolerate in production.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of messages processed as one throttled unit
    pub chunk_size: usize,

    /// Delay inserted between chunks (milliseconds)
    pub inter_chunk_delay_ms: u64,

    /// Delay inserted after each message within a chunk (milliseconds)
    pub inter_message_delay_ms: u64,

    /// Connect timeout for a single gateway request (milliseconds)
    pub connect_timeout_ms: u64,

    /// Total timeout for a single gateway request (milliseconds)
    pub request_timeout_ms: u64,

    /// Ledger debit per successfully sent message, in account currency.
    /// Also the fallback recorded on a message when the gateway reports no cost.
    pub cost_per_message: Decimal,

    /// Sender id presented to the gateway (alphanumeric shortcode)
    pub sender_id: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            inter_chunk_delay_ms: 500,
            inter_message_delay_ms: 100,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            cost_per_message: Decimal::new(100, 2), // 1.00 per message
            sender_id: "CHURCH".to_string(),
        }
    }
}

impl DispatchConfig {
    /// Delay between chunks as a `Duration`.
    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }

    /// Delay after each message as a `Duration`.
    pub fn inter_message_delay(&self) -> Duration {
        Duration::from_millis(self.inter_message_delay_ms)
    }
}
