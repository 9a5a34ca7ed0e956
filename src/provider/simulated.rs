//! Deterministic in-process provider.
//!
//! Exists for environments without live gateway credentials and for tests.
//! Outcomes are injected per recipient rather than drawn from randomness, so
//! a dry run or a test is reproducible. Every call is recorded for
//! assertions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::provider::{SendReceipt, SendResult, SmsProvider};

/// Record of a call made to the simulated provider.
#[derive(Debug, Clone)]
pub struct SimulatedCall {
    pub recipient: String,
    pub body: String,
}

/// Simulated SMS provider with injectable outcomes.
///
/// By default every send succeeds with a sequential `sim-N` message id.
/// Queue failures (or specific receipts) per recipient to script a scenario;
/// queued outcomes are consumed in FIFO order, after which the recipient
/// falls back to the default success.
///
/// # Example
/// ```ignore
/// let provider = SimulatedProvider::new();
/// provider.fail_next("+254722000002", SendFailure::transport("connection reset"));
/// // first send to that recipient fails, subsequent sends succeed
/// ```
#[derive(Clone, Default)]
pub struct SimulatedProvider {
    outcomes: Arc<Mutex<HashMap<String, Vec<SendResult>>>>,
    calls: Arc<Mutex<Vec<SimulatedCall>>>,
    sequence: Arc<AtomicU64>,
}

impl SimulatedProvider {
    /// Create a simulated provider where every send succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next send to `recipient`.
    pub fn queue_outcome(&self, recipient: &str, outcome: SendResult) {
        self.outcomes
            .lock()
            .entry(recipient.to_string())
            .or_default()
            .push(outcome);
    }

    /// Queue a failure for the next send to `recipient`.
    pub fn fail_next(&self, recipient: &str, failure: crate::provider::SendFailure) {
        self.queue_outcome(recipient, Err(failure));
    }

    /// Get all calls that have been made to this provider.
    pub fn calls(&self) -> Vec<SimulatedCall> {
        self.calls.lock().clone()
    }

    /// Get the number of send calls made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Clear all recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl SmsProvider for SimulatedProvider {
    async fn send_single(&self, recipient: &str, body: &str) -> SendResult {
        self.calls.lock().push(SimulatedCall {
            recipient: recipient.to_string(),
            body: body.to_string(),
        });

        let queued = {
            let mut outcomes = self.outcomes.lock();
            match outcomes.get_mut(recipient) {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ => None,
            }
        };

        match queued {
            Some(outcome) => outcome,
            None => {
                let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(SendReceipt {
                    provider_message_id: format!("sim-{}", n),
                    cost: None,
                })
            }
        }
    }
}
