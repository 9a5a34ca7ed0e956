//! Storage traits for batches, messages, and the balance ledger.
//!
//! The trait provides atomic operations for the dispatch lifecycle. The type
//! system enforces valid message transitions (see `domain::message`), so
//! implementations persist states without validating them; batch claiming is
//! the one transition implementations must make conditional.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    AnyMessage, Batch, BatchId, BatchStatus, Message, MessageState, Pending,
};
use crate::error::Result;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Storage for the three entities the engine touches: batch, message, and the
/// prepaid balance ledger.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create a new batch on behalf of the composition feature.
    ///
    /// The acting identity is passed explicitly; the engine never reads it
    /// from ambient session state.
    async fn create_batch(&self, recorded_by: Option<String>) -> Result<Batch>;

    /// Enqueue a pending message into a batch, on behalf of the composition
    /// feature. The engine itself never composes messages.
    async fn enqueue_message(
        &self,
        batch_id: BatchId,
        recipient: String,
        body: String,
    ) -> Result<Message<Pending>>;

    /// Fetch a batch by id.
    async fn get_batch(&self, batch_id: BatchId) -> Result<Batch>;

    /// Atomically claim a batch for a dispatch pass.
    ///
    /// The transition to `sending` succeeds at most once: a concurrent claim
    /// fails with `BatchBusy`, which is what prevents double-sending the same
    /// batch. Also stamps `sent_at` with the pass start time.
    ///
    /// Returns the batch as it was at claim time, so the caller can restore
    /// the prior status if the pass turns out to be a no-op.
    async fn claim_batch(&self, batch_id: BatchId) -> Result<Batch>;

    /// Release a claim without recording a pass, restoring the given status.
    /// Used by the zero-pending no-op path.
    async fn release_batch(&self, batch_id: BatchId, status: BatchStatus) -> Result<()>;

    /// Record the final outcome of a dispatch pass: status, accumulated
    /// counters, and the completion timestamp.
    async fn complete_batch(
        &self,
        batch_id: BatchId,
        status: BatchStatus,
        sent: usize,
        failed: usize,
    ) -> Result<Batch>;

    /// Mark the batch failed after a batch-level error. Individual message
    /// statuses already written remain authoritative.
    async fn fail_batch(&self, batch_id: BatchId) -> Result<()>;

    /// All messages currently pending for the batch, in enqueue order.
    async fn pending_messages(&self, batch_id: BatchId) -> Result<Vec<Message<Pending>>>;

    /// All messages belonging to the batch regardless of state.
    async fn batch_messages(&self, batch_id: BatchId) -> Result<Vec<AnyMessage>>;

    /// Persist a message's state. Single-row write, called once per outcome
    /// before the dispatcher moves on; never batched.
    async fn persist<T: MessageState + Clone>(&self, message: &Message<T>) -> Result<()>
    where
        AnyMessage: From<Message<T>>;

    /// Reset the batch's failed messages to pending for a resend pass,
    /// clearing their failure records. Only rows currently failed are
    /// touched; sent and pending rows are never re-queued. Returns the
    /// number of messages reset.
    async fn reset_failed(&self, batch_id: BatchId) -> Result<usize>;

    /// Current ledger balance.
    async fn balance(&self) -> Result<Decimal>;

    /// Atomically decrement the ledger. Unconditional arithmetic: the base
    /// design does not enforce a non-negative balance. Returns the new
    /// balance.
    async fn debit(&self, amount: Decimal) -> Result<Decimal>;

    /// Atomically increment the ledger (top-up). Returns the new balance.
    async fn credit(&self, amount: Decimal) -> Result<Decimal>;

    /// Messages whose lifecycle places them inside the window starting at
    /// `from`: sent/failed messages are classified by their outcome
    /// timestamp; pending messages are always included since they have none.
    async fn messages_since(&self, from: DateTime<Utc>) -> Result<Vec<AnyMessage>>;
}
