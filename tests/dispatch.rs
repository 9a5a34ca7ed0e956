//! End-to-end dispatch tests against the in-memory store and the simulated
//! provider.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use msafara::config::DispatchConfig;
use msafara::dispatch::BatchCoordinator;
use msafara::domain::{
    AnyMessage, Batch, BatchId, BatchStatus, Message, MessageState, Pending,
};
use msafara::provider::{SendFailure, SimulatedProvider};
use msafara::stats::{Period, StatisticsReporter};
use msafara::storage::{InMemoryStore, Storage};
use msafara::{MsafaraError, Result};

/// Store wrapper with injectable failures, for exercising the batch-level
/// error paths that a healthy store never takes.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryStore,
    fail_pending_messages: AtomicBool,
    fail_debit: AtomicBool,
}

impl FlakyStore {
    fn fail_pending_messages(&self) {
        self.fail_pending_messages.store(true, Ordering::SeqCst);
    }

    fn fail_debit(&self) {
        self.fail_debit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for FlakyStore {
    async fn create_batch(&self, recorded_by: Option<String>) -> Result<Batch> {
        self.inner.create_batch(recorded_by).await
    }

    async fn enqueue_message(
        &self,
        batch_id: BatchId,
        recipient: String,
        body: String,
    ) -> Result<Message<Pending>> {
        self.inner.enqueue_message(batch_id, recipient, body).await
    }

    async fn get_batch(&self, batch_id: BatchId) -> Result<Batch> {
        self.inner.get_batch(batch_id).await
    }

    async fn claim_batch(&self, batch_id: BatchId) -> Result<Batch> {
        self.inner.claim_batch(batch_id).await
    }

    async fn release_batch(&self, batch_id: BatchId, status: BatchStatus) -> Result<()> {
        self.inner.release_batch(batch_id, status).await
    }

    async fn complete_batch(
        &self,
        batch_id: BatchId,
        status: BatchStatus,
        sent: usize,
        failed: usize,
    ) -> Result<Batch> {
        self.inner.complete_batch(batch_id, status, sent, failed).await
    }

    async fn fail_batch(&self, batch_id: BatchId) -> Result<()> {
        self.inner.fail_batch(batch_id).await
    }

    async fn pending_messages(&self, batch_id: BatchId) -> Result<Vec<Message<Pending>>> {
        if self.fail_pending_messages.load(Ordering::SeqCst) {
            return Err(MsafaraError::Other(anyhow::anyhow!(
                "pending-message query failed"
            )));
        }
        self.inner.pending_messages(batch_id).await
    }

    async fn batch_messages(&self, batch_id: BatchId) -> Result<Vec<AnyMessage>> {
        self.inner.batch_messages(batch_id).await
    }

    async fn persist<T: MessageState + Clone>(&self, message: &Message<T>) -> Result<()>
    where
        AnyMessage: From<Message<T>>,
    {
        self.inner.persist(message).await
    }

    async fn reset_failed(&self, batch_id: BatchId) -> Result<usize> {
        self.inner.reset_failed(batch_id).await
    }

    async fn balance(&self) -> Result<Decimal> {
        self.inner.balance().await
    }

    async fn debit(&self, amount: Decimal) -> Result<Decimal> {
        if self.fail_debit.load(Ordering::SeqCst) {
            return Err(MsafaraError::Other(anyhow::anyhow!("ledger update failed")));
        }
        self.inner.debit(amount).await
    }

    async fn credit(&self, amount: Decimal) -> Result<Decimal> {
        self.inner.credit(amount).await
    }

    async fn messages_since(&self, from: DateTime<Utc>) -> Result<Vec<AnyMessage>> {
        self.inner.messages_since(from).await
    }
}

fn test_config() -> DispatchConfig {
    DispatchConfig {
        chunk_size: 2,
        inter_chunk_delay_ms: 1,
        inter_message_delay_ms: 0,
        ..Default::default()
    }
}

fn coordinator(
    store: &Arc<InMemoryStore>,
    provider: &Arc<SimulatedProvider>,
) -> BatchCoordinator<InMemoryStore, SimulatedProvider> {
    BatchCoordinator::new(store.clone(), provider.clone(), test_config())
}

async fn seed_batch<S: Storage>(store: &S, recipients: &[&str]) -> BatchId {
    let batch = store.create_batch(Some("admin".to_string())).await.unwrap();
    for (i, recipient) in recipients.iter().enumerate() {
        store
            .enqueue_message(batch.id, recipient.to_string(), format!("message {}", i))
            .await
            .unwrap();
    }
    batch.id
}

#[test_log::test(tokio::test)]
async fn mixed_outcomes_complete_the_batch() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SimulatedProvider::new());
    let batch_id = seed_batch(
        store.as_ref(),
        &["+254722000000", "+254722000001", "+254722000002"],
    )
    .await;
    provider.fail_next("+254722000001", SendFailure::rejected("blacklisted"));

    let report = coordinator(&store, &provider)
        .process_batch(batch_id)
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.sent_count, 2);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("+254722000001"));

    // Partial failure still completes the batch
    let batch = store.get_batch(batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.sent_count, 2);
    assert_eq!(batch.failed_count, 1);
    assert!(batch.sent_at.is_some());
    assert!(batch.completed_at.is_some());
}

#[test_log::test(tokio::test)]
async fn every_message_reaches_a_terminal_state() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SimulatedProvider::new());
    let recipients: Vec<String> = (0..5).map(|i| format!("+25472200000{}", i)).collect();
    let refs: Vec<&str> = recipients.iter().map(String::as_str).collect();
    let batch_id = seed_batch(
        store.as_ref(), &refs).await;
    provider.fail_next("+254722000003", SendFailure::transport("connection reset"));

    coordinator(&store, &provider)
        .process_batch(batch_id)
        .await
        .unwrap();

    let messages = store.batch_messages(batch_id).await.unwrap();
    assert_eq!(messages.len(), 5);
    assert!(messages.iter().all(|m| !m.is_pending()));
    assert_eq!(messages.iter().filter(|m| m.is_sent()).count(), 4);
    assert_eq!(messages.iter().filter(|m| m.is_failed()).count(), 1);
}

#[test_log::test(tokio::test)]
async fn empty_batch_pass_is_a_noop() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SimulatedProvider::new());
    store.credit(Decimal::new(1000, 2)).await.unwrap();
    let batch_id = seed_batch(
        store.as_ref(), &[]).await;

    let report = coordinator(&store, &provider)
        .process_batch(batch_id)
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.sent_count, 0);
    assert_eq!(provider.call_count(), 0);
    // No debit and the pre-claim status is restored
    assert_eq!(store.balance().await.unwrap(), Decimal::new(1000, 2));
    assert_eq!(
        store.get_batch(batch_id).await.unwrap().status,
        BatchStatus::Pending
    );
}

#[test_log::test(tokio::test)]
async fn ledger_debited_per_confirmed_send() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SimulatedProvider::new());
    store.credit(Decimal::new(1000, 2)).await.unwrap(); // 10.00
    let batch_id = seed_batch(
        store.as_ref(),
        &["+254722000000", "+254722000001", "+254722000002"],
    )
    .await;
    provider.fail_next("+254722000002", SendFailure::rejected("bad number"));

    coordinator(&store, &provider)
        .process_batch(batch_id)
        .await
        .unwrap();

    // 2 sent at the default 1.00 each; the failed message costs nothing
    assert_eq!(store.balance().await.unwrap(), Decimal::new(800, 2));
}

#[test_log::test(tokio::test)]
async fn resend_only_requeues_failed_messages() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SimulatedProvider::new());
    let batch_id = seed_batch(
        store.as_ref(), &["+254722000000", "+254722000001"]).await;
    provider.fail_next("+254722000001", SendFailure::transport("timeout"));

    let coord = coordinator(&store, &provider);
    let first = coord.process_batch(batch_id).await.unwrap();
    assert_eq!(first.sent_count, 1);
    assert_eq!(first.failed_count, 1);

    provider.clear_calls();
    let second = coord.resend_failed_messages(batch_id).await.unwrap();
    assert_eq!(second.sent_count, 1);
    assert_eq!(second.failed_count, 0);

    // The already-sent message is never re-sent
    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].recipient, "+254722000001");

    let batch = store.get_batch(batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.sent_count, 2);
    assert_eq!(batch.failed_count, 0);
}

#[test_log::test(tokio::test)]
async fn resend_with_nothing_failed_is_a_noop() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SimulatedProvider::new());
    let batch_id = seed_batch(
        store.as_ref(), &["+254722000000"]).await;

    let coord = coordinator(&store, &provider);
    coord.process_batch(batch_id).await.unwrap();

    provider.clear_calls();
    let report = coord.resend_failed_messages(batch_id).await.unwrap();
    assert!(!report.success);
    assert_eq!(provider.call_count(), 0);
    assert_eq!(
        store.get_batch(batch_id).await.unwrap().status,
        BatchStatus::Completed
    );
}

#[test_log::test(tokio::test)]
async fn concurrent_pass_on_same_batch_is_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SimulatedProvider::new());
    let batch_id = seed_batch(
        store.as_ref(), &["+254722000000"]).await;

    // Simulate another pass holding the claim
    store.claim_batch(batch_id).await.unwrap();

    let result = coordinator(&store, &provider).process_batch(batch_id).await;
    assert!(matches!(result, Err(MsafaraError::BatchBusy(_))));
    assert_eq!(provider.call_count(), 0);
}

#[test_log::test(tokio::test)]
async fn invalid_recipient_fails_without_gateway_call() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SimulatedProvider::new());
    let batch_id = seed_batch(
        store.as_ref(), &["12345"]).await;

    let report = coordinator(&store, &provider)
        .process_batch(batch_id)
        .await
        .unwrap();

    assert_eq!(report.failed_count, 1);
    assert!(report.errors[0].contains("invalid recipient"));
    assert_eq!(provider.call_count(), 0);
}

#[test_log::test(tokio::test)]
async fn local_format_recipients_are_normalized_before_send() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SimulatedProvider::new());
    let batch_id = seed_batch(
        store.as_ref(), &["0722000000"]).await;

    coordinator(&store, &provider)
        .process_batch(batch_id)
        .await
        .unwrap();

    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].recipient, "+254722000000");
}

#[test_log::test(tokio::test)]
async fn all_failures_mark_batch_failed() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SimulatedProvider::new());
    store.credit(Decimal::new(500, 2)).await.unwrap();
    let batch_id = seed_batch(
        store.as_ref(), &["+254722000000", "+254722000001"]).await;
    provider.fail_next("+254722000000", SendFailure::rejected("blacklisted"));
    provider.fail_next("+254722000001", SendFailure::rejected("blacklisted"));

    let report = coordinator(&store, &provider)
        .process_batch(batch_id)
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.sent_count, 0);
    assert_eq!(report.failed_count, 2);
    assert_eq!(
        store.get_batch(batch_id).await.unwrap().status,
        BatchStatus::Failed
    );
    // Nothing sent, nothing debited
    assert_eq!(store.balance().await.unwrap(), Decimal::new(500, 2));
}

#[test_log::test(tokio::test)]
async fn cancelled_pass_leaves_remaining_messages_pending() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SimulatedProvider::new());
    store.credit(Decimal::new(500, 2)).await.unwrap();
    let batch_id = seed_batch(
        store.as_ref(), &["+254722000000", "+254722000001"]).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let coord = BatchCoordinator::new(store.clone(), provider.clone(), test_config())
        .with_cancellation(cancel);

    let report = coord.process_batch(batch_id).await.unwrap();
    assert!(!report.success);
    assert_eq!(report.sent_count, 0);
    assert_eq!(provider.call_count(), 0);
    assert_eq!(store.balance().await.unwrap(), Decimal::new(500, 2));

    // Nothing was dispatched, so the batch must not read as a finished pass
    assert_eq!(
        store.get_batch(batch_id).await.unwrap().status,
        BatchStatus::Pending
    );
    let messages = store.batch_messages(batch_id).await.unwrap();
    assert!(messages.iter().all(|m| m.is_pending()));
}

#[test_log::test(tokio::test)]
async fn cancellation_after_partial_progress_finalizes_recorded_outcomes() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SimulatedProvider::new());
    let batch_id = seed_batch(
        store.as_ref(), &["+254722000000", "+254722000001"]).await;

    // Chunk size 1 with cancellation fired inside the first chunk's
    // post-message delay: the first outcome is recorded, the second message
    // is never attempted.
    let cancel = CancellationToken::new();
    let config = DispatchConfig {
        chunk_size: 1,
        inter_chunk_delay_ms: 1,
        inter_message_delay_ms: 50,
        ..Default::default()
    };
    let coord = BatchCoordinator::new(store.clone(), provider.clone(), config)
        .with_cancellation(cancel.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        cancel.cancel();
    });

    let report = coord.process_batch(batch_id).await.unwrap();
    canceller.await.unwrap();

    assert!(report.success);
    assert_eq!(report.sent_count, 1);
    assert_eq!(provider.call_count(), 1);

    // Persisted outcomes stand and the pass finalizes from them
    let batch = store.get_batch(batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.sent_count, 1);
    let messages = store.batch_messages(batch_id).await.unwrap();
    assert_eq!(messages.iter().filter(|m| m.is_pending()).count(), 1);
}

#[test_log::test(tokio::test)]
async fn statistics_reflect_a_finished_pass() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SimulatedProvider::new());
    let batch_id = seed_batch(
        store.as_ref(),
        &["+254722000000", "+254722000001", "+254722000002"],
    )
    .await;
    provider.fail_next("+254722000001", SendFailure::transport("timeout"));

    coordinator(&store, &provider)
        .process_batch(batch_id)
        .await
        .unwrap();

    let reporter = StatisticsReporter::new(store.clone());
    let stats = reporter.report(Period::Today).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.success_rate, 66.67);
    // Gateway reported no cost, so each sent message carries the fallback
    assert_eq!(stats.total_cost, Decimal::new(200, 2));
}

#[test_log::test(tokio::test)]
async fn storage_failure_loading_pending_marks_batch_failed() {
    let store = Arc::new(FlakyStore::default());
    let provider = Arc::new(SimulatedProvider::new());
    let batch_id = seed_batch(store.as_ref(), &["+254722000000"]).await;
    store.fail_pending_messages();

    let result = BatchCoordinator::new(store.clone(), provider.clone(), test_config())
        .process_batch(batch_id)
        .await;

    assert!(matches!(result, Err(MsafaraError::Other(_))));
    assert_eq!(provider.call_count(), 0);
    // The batch-level error is recorded on the batch itself
    assert_eq!(
        store.get_batch(batch_id).await.unwrap().status,
        BatchStatus::Failed
    );
}

#[test_log::test(tokio::test)]
async fn debit_failure_does_not_unwind_the_pass() {
    let store = Arc::new(FlakyStore::default());
    let provider = Arc::new(SimulatedProvider::new());
    let batch_id = seed_batch(store.as_ref(), &["+254722000000", "+254722000001"]).await;
    store.fail_debit();

    let report = BatchCoordinator::new(store.clone(), provider.clone(), test_config())
        .process_batch(batch_id)
        .await
        .unwrap();

    // Sending is not reversible: a ledger failure is logged, not propagated
    assert!(report.success);
    assert_eq!(report.sent_count, 2);
    let batch = store.get_batch(batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.sent_count, 2);
    let messages = store.batch_messages(batch_id).await.unwrap();
    assert!(messages.iter().all(|m| m.is_sent()));
}

#[test_log::test(tokio::test)]
async fn statistics_on_empty_store_are_zero() {
    let store = Arc::new(InMemoryStore::new());
    let reporter = StatisticsReporter::new(store);
    let stats = reporter.report(Period::Week).await.unwrap();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.success_rate, 0.0);
    assert_eq!(stats.total_cost, Decimal::ZERO);
}
