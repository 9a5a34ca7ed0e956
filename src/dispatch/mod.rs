//! Batch coordination: claim, chunk, finalize, debit.
//!
//! `BatchCoordinator` owns the batch state machine. A dispatch pass claims
//! the batch (the conditional pending→sending transition is what makes
//! concurrent passes on the same batch safe), splits the pending set into
//! chunks, hands each chunk to [`chunk::ChunkDispatcher`], then writes the
//! final status and applies a single ledger debit proportional to the
//! messages actually sent.

use std::sync::Arc;

use metrics::counter;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use crate::domain::{final_status, BatchId, DispatchReport};
use crate::error::Result;
use crate::provider::SmsProvider;
use crate::storage::Storage;

pub mod chunk;

pub use chunk::{ChunkDispatcher, ChunkReport};

/// Coordinates dispatch passes over batches of pending messages.
///
/// Processing is intentionally single-threaded and sequential within one
/// batch; the two delay layers (inter-chunk and inter-message) are the
/// backpressure mechanism against the rate-limited gateway. Distinct batches
/// may be processed by separate coordinators concurrently.
pub struct BatchCoordinator<S, P>
where
    S: Storage,
    P: SmsProvider + ?Sized,
{
    store: Arc<S>,
    provider: Arc<P>,
    config: DispatchConfig,
    cancel: CancellationToken,
}

impl<S, P> BatchCoordinator<S, P>
where
    S: Storage,
    P: SmsProvider + ?Sized,
{
    pub fn new(store: Arc<S>, provider: Arc<P>, config: DispatchConfig) -> Self {
        Self {
            store,
            provider,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Thread an external cancellation signal through the coordinator.
    ///
    /// Cancellation is honored at "stop before next message" granularity:
    /// outcomes already persisted stand, and the pass is finalized from what
    /// was recorded. A pass cancelled before any outcome was recorded
    /// releases the claim instead of completing the batch.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Get the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run one dispatch pass over the batch's pending messages.
    ///
    /// Returns `success = false` (not an error) when the batch has no pending
    /// messages; such a pass performs no sends and no debit. Storage-level
    /// failures mark the batch failed and propagate; per-message send
    /// failures are reported in the counts and error list.
    #[tracing::instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn process_batch(&self, batch_id: BatchId) -> Result<DispatchReport> {
        let claimed = self.store.claim_batch(batch_id).await?;

        let mut pending = match self.store.pending_messages(batch_id).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load pending messages, failing batch");
                if let Err(fail_err) = self.store.fail_batch(batch_id).await {
                    tracing::error!(error = %fail_err, "Failed to mark batch as failed");
                }
                return Err(e);
            }
        };

        if pending.is_empty() {
            // Not an error and not worth a retry: there is nothing to do.
            // Restore the status the batch had before the claim.
            tracing::info!("No pending messages in batch, releasing claim");
            self.store.release_batch(batch_id, claimed.status).await?;
            return Ok(DispatchReport {
                success: false,
                message: "no pending messages to send".to_string(),
                sent_count: 0,
                failed_count: 0,
                errors: Vec::new(),
            });
        }

        let total = pending.len();
        let chunk_size = self.config.chunk_size.max(1);
        tracing::info!(total, chunk_size, "Batch claimed, dispatching");

        let dispatcher = ChunkDispatcher::new(
            self.store.clone(),
            self.provider.clone(),
            self.config.inter_message_delay(),
            self.config.cost_per_message,
            self.cancel.clone(),
        );

        let mut sent = 0usize;
        let mut failed = 0usize;
        let mut errors = Vec::new();

        while !pending.is_empty() {
            let take = pending.len().min(chunk_size);
            let chunk: Vec<_> = pending.drain(..take).collect();

            let report = match dispatcher.send_chunk(chunk).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(error = %e, "Storage failure mid-chunk, failing batch");
                    if let Err(fail_err) = self.store.fail_batch(batch_id).await {
                        tracing::error!(error = %fail_err, "Failed to mark batch as failed");
                    }
                    return Err(e);
                }
            };

            sent += report.sent;
            failed += report.failed;
            errors.extend(report.errors);

            if self.cancel.is_cancelled() {
                tracing::info!(sent, failed, "Pass cancelled, finalizing from recorded outcomes");
                break;
            }

            if !pending.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.inter_chunk_delay()) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }

        // Cancelled before anything was recorded: the batch was never
        // processed, so it must not read as a finished pass. Release the
        // claim like the zero-pending no-op does.
        if self.cancel.is_cancelled() && sent == 0 && failed == 0 {
            tracing::info!("Pass cancelled before any message was dispatched, releasing claim");
            self.store.release_batch(batch_id, claimed.status).await?;
            return Ok(DispatchReport {
                success: false,
                message: "cancelled before any message was dispatched".to_string(),
                sent_count: 0,
                failed_count: 0,
                errors: Vec::new(),
            });
        }

        let status = final_status(sent, failed);
        self.store
            .complete_batch(batch_id, status, sent, failed)
            .await?;
        counter!("msafara_batches_processed_total", "status" => status.as_str()).increment(1);
        tracing::info!(sent, failed, status = status.as_str(), "Dispatch pass complete");

        // One aggregate debit per pass, proportional to actual send volume.
        // Best-effort: sending is not reversible, so a ledger failure must
        // not unwind the pass.
        if sent > 0 {
            let amount = Decimal::from(sent as u64) * self.config.cost_per_message;
            match self.store.debit(amount).await {
                Ok(balance) => {
                    tracing::info!(%amount, %balance, "Debited ledger for sent messages");
                }
                Err(e) => {
                    tracing::error!(%amount, error = %e, "Failed to debit ledger after pass");
                }
            }
        }

        Ok(DispatchReport {
            success: true,
            message: format!("{} sent, {} failed", sent, failed),
            sent_count: sent,
            failed_count: failed,
            errors,
        })
    }

    /// Re-queue only the batch's failed messages and run another pass.
    ///
    /// Messages already sent are never touched, which keeps resend idempotent
    /// on the sent subset. With nothing failed this degenerates into the
    /// zero-pending no-op.
    #[tracing::instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn resend_failed_messages(&self, batch_id: BatchId) -> Result<DispatchReport> {
        let reset = self.store.reset_failed(batch_id).await?;
        tracing::info!(reset, "Requeued failed messages for resend");
        self.process_batch(batch_id).await
    }
}
