//! Chunk-level sequential dispatch.
//!
//! A chunk is a bounded slice of a batch's pending messages processed as one
//! throttled unit. Messages go out one at a time; every outcome is persisted
//! before the loop advances, so a crash mid-chunk loses at most the in-flight
//! message's status. A provider failure is that message's failure, never the
//! chunk's: the loop always continues.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::domain::{Message, Pending};
use crate::error::Result;
use crate::phone;
use crate::provider::{SendFailure, SendReceipt, SmsProvider};
use crate::storage::Storage;

/// Aggregated outcome of one chunk.
#[derive(Debug, Default)]
pub struct ChunkReport {
    pub sent: usize,
    pub failed: usize,
    /// One human-readable entry per failed message, naming the recipient
    pub errors: Vec<String>,
}

/// Sequentially dispatches the messages of one chunk.
pub struct ChunkDispatcher<S, P>
where
    S: Storage + ?Sized,
    P: SmsProvider + ?Sized,
{
    store: Arc<S>,
    provider: Arc<P>,
    inter_message_delay: Duration,
    /// Recorded on a sent message when the gateway reports no cost
    fallback_cost: Decimal,
    cancel: CancellationToken,
}

impl<S, P> ChunkDispatcher<S, P>
where
    S: Storage + ?Sized,
    P: SmsProvider + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        provider: Arc<P>,
        inter_message_delay: Duration,
        fallback_cost: Decimal,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            provider,
            inter_message_delay,
            fallback_cost,
            cancel,
        }
    }

    /// Send every message in the chunk, persisting each outcome immediately.
    ///
    /// Returns `Err` only on a storage failure; per-message send failures are
    /// recorded in the report and the loop moves on.
    pub async fn send_chunk(&self, chunk: Vec<Message<Pending>>) -> Result<ChunkReport> {
        let mut report = ChunkReport::default();

        for message in chunk {
            if self.cancel.is_cancelled() {
                tracing::info!("Cancellation requested, stopping before next message");
                break;
            }

            let message_id = message.data.id;
            let recipient = message.data.recipient.clone();

            // Validate before spending a network call on a number the
            // gateway would reject anyway.
            let outcome = match phone::validate(&recipient) {
                Ok(valid) => {
                    self.provider
                        .send_single(&valid.normalized, &message.data.body)
                        .await
                }
                Err(e) => Err(SendFailure::rejected(format!("invalid recipient: {}", e))),
            };

            match outcome {
                Ok(receipt) => {
                    let receipt = SendReceipt {
                        cost: receipt.cost.or(Some(self.fallback_cost)),
                        ..receipt
                    };
                    let sent = message.sent(receipt, self.store.as_ref()).await?;
                    counter!("msafara_messages_sent_total").increment(1);
                    tracing::debug!(
                        message_id = %message_id,
                        recipient = %recipient,
                        provider_message_id = %sent.state.provider_message_id,
                        "Message sent"
                    );
                    report.sent += 1;
                }
                Err(failure) => {
                    counter!(
                        "msafara_messages_failed_total",
                        "kind" => match failure.kind {
                            crate::provider::FailureKind::Transport => "transport",
                            crate::provider::FailureKind::Rejected => "rejected",
                        }
                    )
                    .increment(1);
                    tracing::warn!(
                        message_id = %message_id,
                        recipient = %recipient,
                        kind = ?failure.kind,
                        error = %failure.message,
                        "Message send failed"
                    );
                    report.errors.push(format!("{}: {}", recipient, failure));
                    message
                        .failed(failure.to_string(), self.store.as_ref())
                        .await?;
                    report.failed += 1;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.inter_message_delay) => {}
                _ = self.cancel.cancelled() => break,
            }
        }

        Ok(report)
    }
}
