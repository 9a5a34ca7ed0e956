//! In-memory store.
//!
//! Backs tests and single-process embeddings that don't want a database.
//! All state lives behind one mutex, which also makes the ledger updates and
//! the batch claim trivially atomic.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use async_trait::async_trait;

use crate::domain::{
    AnyMessage, Batch, BatchId, BatchStatus, Message, MessageData, MessageId, MessageState,
    Pending,
};
use crate::error::{MsafaraError, Result};
use crate::storage::Storage;

#[derive(Default)]
struct Inner {
    batches: HashMap<BatchId, Batch>,
    /// Messages in enqueue order; updated in place by id
    messages: Vec<AnyMessage>,
    balance: Decimal,
}

/// In-memory implementation of [`Storage`].
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStore {
    async fn create_batch(&self, recorded_by: Option<String>) -> Result<Batch> {
        let batch = Batch {
            id: BatchId::from(Uuid::new_v4()),
            status: BatchStatus::Pending,
            sent_count: 0,
            failed_count: 0,
            created_at: Utc::now(),
            sent_at: None,
            completed_at: None,
            recorded_by,
        };
        self.inner.lock().batches.insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn enqueue_message(
        &self,
        batch_id: BatchId,
        recipient: String,
        body: String,
    ) -> Result<Message<Pending>> {
        let mut inner = self.inner.lock();
        if !inner.batches.contains_key(&batch_id) {
            return Err(MsafaraError::BatchNotFound(batch_id));
        }
        let message = Message {
            data: MessageData {
                id: MessageId::from(Uuid::new_v4()),
                batch_id,
                recipient,
                body,
            },
            state: Pending {
                queued_at: Utc::now(),
            },
        };
        inner.messages.push(AnyMessage::from(message.clone()));
        Ok(message)
    }

    async fn get_batch(&self, batch_id: BatchId) -> Result<Batch> {
        self.inner
            .lock()
            .batches
            .get(&batch_id)
            .cloned()
            .ok_or(MsafaraError::BatchNotFound(batch_id))
    }

    async fn claim_batch(&self, batch_id: BatchId) -> Result<Batch> {
        let mut inner = self.inner.lock();
        let batch = inner
            .batches
            .get_mut(&batch_id)
            .ok_or(MsafaraError::BatchNotFound(batch_id))?;
        if batch.status == BatchStatus::Sending {
            return Err(MsafaraError::BatchBusy(batch_id));
        }
        let snapshot = batch.clone();
        batch.status = BatchStatus::Sending;
        batch.sent_at = Some(Utc::now());
        Ok(snapshot)
    }

    async fn release_batch(&self, batch_id: BatchId, status: BatchStatus) -> Result<()> {
        let mut inner = self.inner.lock();
        let batch = inner
            .batches
            .get_mut(&batch_id)
            .ok_or(MsafaraError::BatchNotFound(batch_id))?;
        batch.status = status;
        Ok(())
    }

    async fn complete_batch(
        &self,
        batch_id: BatchId,
        status: BatchStatus,
        sent: usize,
        failed: usize,
    ) -> Result<Batch> {
        let mut inner = self.inner.lock();
        let batch = inner
            .batches
            .get_mut(&batch_id)
            .ok_or(MsafaraError::BatchNotFound(batch_id))?;
        batch.status = status;
        batch.sent_count += sent as i64;
        batch.failed_count += failed as i64;
        batch.completed_at = Some(Utc::now());
        Ok(batch.clone())
    }

    async fn fail_batch(&self, batch_id: BatchId) -> Result<()> {
        let mut inner = self.inner.lock();
        let batch = inner
            .batches
            .get_mut(&batch_id)
            .ok_or(MsafaraError::BatchNotFound(batch_id))?;
        batch.status = BatchStatus::Failed;
        batch.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn pending_messages(&self, batch_id: BatchId) -> Result<Vec<Message<Pending>>> {
        let inner = self.inner.lock();
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.data().batch_id == batch_id)
            .filter_map(|m| m.clone().into_pending())
            .collect())
    }

    async fn batch_messages(&self, batch_id: BatchId) -> Result<Vec<AnyMessage>> {
        let inner = self.inner.lock();
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.data().batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn persist<T: MessageState + Clone>(&self, message: &Message<T>) -> Result<()>
    where
        AnyMessage: From<Message<T>>,
    {
        let any = AnyMessage::from(message.clone());
        let mut inner = self.inner.lock();
        match inner.messages.iter_mut().find(|m| m.id() == any.id()) {
            Some(slot) => {
                *slot = any;
                Ok(())
            }
            None => Err(MsafaraError::MessageNotFound(any.id())),
        }
    }

    async fn reset_failed(&self, batch_id: BatchId) -> Result<usize> {
        let mut inner = self.inner.lock();
        let mut reset = 0;
        for slot in inner
            .messages
            .iter_mut()
            .filter(|m| m.data().batch_id == batch_id && m.is_failed())
        {
            let data = slot.data().clone();
            *slot = AnyMessage::Pending(Message {
                data,
                state: Pending {
                    queued_at: Utc::now(),
                },
            });
            reset += 1;
        }
        if let Some(batch) = inner.batches.get_mut(&batch_id) {
            batch.failed_count = (batch.failed_count - reset as i64).max(0);
        }
        Ok(reset)
    }

    async fn balance(&self) -> Result<Decimal> {
        Ok(self.inner.lock().balance)
    }

    async fn debit(&self, amount: Decimal) -> Result<Decimal> {
        let mut inner = self.inner.lock();
        inner.balance -= amount;
        Ok(inner.balance)
    }

    async fn credit(&self, amount: Decimal) -> Result<Decimal> {
        let mut inner = self.inner.lock();
        inner.balance += amount;
        Ok(inner.balance)
    }

    async fn messages_since(&self, from: DateTime<Utc>) -> Result<Vec<AnyMessage>> {
        let inner = self.inner.lock();
        Ok(inner
            .messages
            .iter()
            .filter(|m| match m {
                // Pending messages have no timestamp yet and always count
                AnyMessage::Pending(_) => true,
                AnyMessage::Sent(s) => s.state.sent_at >= from,
                AnyMessage::Failed(f) => f.state.failed_at >= from,
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SendReceipt;

    #[tokio::test]
    async fn claim_is_exclusive_until_released() {
        let store = InMemoryStore::new();
        let batch = store.create_batch(None).await.unwrap();

        store.claim_batch(batch.id).await.unwrap();
        assert!(matches!(
            store.claim_batch(batch.id).await,
            Err(MsafaraError::BatchBusy(_))
        ));

        store
            .release_batch(batch.id, BatchStatus::Pending)
            .await
            .unwrap();
        store.claim_batch(batch.id).await.unwrap();
    }

    #[tokio::test]
    async fn claim_returns_pre_claim_snapshot() {
        let store = InMemoryStore::new();
        let batch = store.create_batch(None).await.unwrap();

        let snapshot = store.claim_batch(batch.id).await.unwrap();
        assert_eq!(snapshot.status, BatchStatus::Pending);
        assert_eq!(
            store.get_batch(batch.id).await.unwrap().status,
            BatchStatus::Sending
        );
    }

    #[tokio::test]
    async fn reset_failed_only_touches_failed_rows() {
        let store = InMemoryStore::new();
        let batch = store.create_batch(None).await.unwrap();

        let ok = store
            .enqueue_message(batch.id, "+254722000000".into(), "a".into())
            .await
            .unwrap();
        let bad = store
            .enqueue_message(batch.id, "+254722000001".into(), "b".into())
            .await
            .unwrap();
        let waiting = store
            .enqueue_message(batch.id, "+254722000002".into(), "c".into())
            .await
            .unwrap();

        let sent_id = ok.data.id;
        let failed_id = bad.data.id;
        ok.sent(
            SendReceipt {
                provider_message_id: "mid-1".into(),
                cost: None,
            },
            &store,
        )
        .await
        .unwrap();
        bad.failed("gateway rejected".into(), &store).await.unwrap();

        let reset = store.reset_failed(batch.id).await.unwrap();
        assert_eq!(reset, 1);

        let messages = store.batch_messages(batch.id).await.unwrap();
        let by_id = |id: MessageId| messages.iter().find(|m| m.id() == id).unwrap();
        assert!(by_id(sent_id).is_sent());
        assert!(by_id(failed_id).is_pending());
        assert!(by_id(waiting.data.id).is_pending());
    }

    #[tokio::test]
    async fn ledger_arithmetic_is_unconditional() {
        let store = InMemoryStore::new();
        store.credit(Decimal::new(500, 2)).await.unwrap(); // 5.00
        let after = store.debit(Decimal::new(700, 2)).await.unwrap(); // 7.00
        // No non-negative enforcement: the balance goes negative
        assert_eq!(after, Decimal::new(-200, 2));
        assert_eq!(store.balance().await.unwrap(), Decimal::new(-200, 2));
    }
}
