//! PostgreSQL store.
//!
//! Three tables: `sms_batches`, `sms_messages`, and the single-row
//! `sms_ledger`. The batch claim runs inside a transaction with a row lock so
//! exactly one dispatch pass can move a batch into `sending`. Message state
//! is a flat row with nullable per-state columns; which columns are populated
//! follows from the status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::{
    AnyMessage, Batch, BatchId, BatchStatus, Failed, Message, MessageData, MessageId,
    MessageState, Pending, Sent,
};
use crate::error::{MsafaraError, Result};
use crate::storage::Storage;

/// PostgreSQL implementation of [`Storage`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        crate::migrator().run(&pool).await.map_err(sqlx::Error::from)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn batch_from_row(row: &PgRow) -> Result<Batch> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<BatchStatus>()
        .map_err(|e| MsafaraError::Other(anyhow::anyhow!(e)))?;
    Ok(Batch {
        id: BatchId::from(row.try_get::<Uuid, _>("id")?),
        status,
        sent_count: row.try_get("sent_count")?,
        failed_count: row.try_get("failed_count")?,
        created_at: row.try_get("created_at")?,
        sent_at: row.try_get("sent_at")?,
        completed_at: row.try_get("completed_at")?,
        recorded_by: row.try_get("recorded_by")?,
    })
}

fn message_from_row(row: &PgRow) -> Result<AnyMessage> {
    let data = MessageData {
        id: MessageId::from(row.try_get::<Uuid, _>("id")?),
        batch_id: BatchId::from(row.try_get::<Uuid, _>("batch_id")?),
        recipient: row.try_get("recipient")?,
        body: row.try_get("body")?,
    };
    let status: String = row.try_get("status")?;
    match status.as_str() {
        "pending" => Ok(AnyMessage::Pending(Message {
            data,
            state: Pending {
                queued_at: row.try_get("queued_at")?,
            },
        })),
        "sent" => Ok(AnyMessage::Sent(Message {
            data,
            state: Sent {
                provider_message_id: row
                    .try_get::<Option<String>, _>("provider_message_id")?
                    .unwrap_or_default(),
                cost: row.try_get("cost")?,
                sent_at: row.try_get("sent_at")?,
            },
        })),
        "failed" => Ok(AnyMessage::Failed(Message {
            data,
            state: Failed {
                error: row
                    .try_get::<Option<String>, _>("error")?
                    .unwrap_or_default(),
                failed_at: row.try_get("failed_at")?,
            },
        })),
        other => Err(MsafaraError::Other(anyhow::anyhow!(
            "Invalid message status in database: {}",
            other
        ))),
    }
}

const MESSAGE_COLUMNS: &str =
    "id, batch_id, recipient, body, status, queued_at, provider_message_id, cost, sent_at, error, failed_at";

#[async_trait]
impl Storage for PostgresStore {
    async fn create_batch(&self, recorded_by: Option<String>) -> Result<Batch> {
        let row = sqlx::query(
            "INSERT INTO sms_batches (id, status, recorded_by)
             VALUES ($1, 'pending', $2)
             RETURNING id, status, sent_count, failed_count, created_at, sent_at, completed_at, recorded_by",
        )
        .bind(Uuid::new_v4())
        .bind(recorded_by)
        .fetch_one(&self.pool)
        .await?;
        batch_from_row(&row)
    }

    async fn enqueue_message(
        &self,
        batch_id: BatchId,
        recipient: String,
        body: String,
    ) -> Result<Message<Pending>> {
        let row = sqlx::query(
            "INSERT INTO sms_messages (id, batch_id, recipient, body, status)
             VALUES ($1, $2, $3, $4, 'pending')
             RETURNING id, queued_at",
        )
        .bind(Uuid::new_v4())
        .bind(batch_id.0)
        .bind(&recipient)
        .bind(&body)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            // Foreign key violation means the batch does not exist
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                MsafaraError::BatchNotFound(batch_id)
            }
            other => other.into(),
        })?;

        Ok(Message {
            data: MessageData {
                id: MessageId::from(row.try_get::<Uuid, _>("id")?),
                batch_id,
                recipient,
                body,
            },
            state: Pending {
                queued_at: row.try_get("queued_at")?,
            },
        })
    }

    async fn get_batch(&self, batch_id: BatchId) -> Result<Batch> {
        let row = sqlx::query(
            "SELECT id, status, sent_count, failed_count, created_at, sent_at, completed_at, recorded_by
             FROM sms_batches WHERE id = $1",
        )
        .bind(batch_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(MsafaraError::BatchNotFound(batch_id))?;
        batch_from_row(&row)
    }

    async fn claim_batch(&self, batch_id: BatchId) -> Result<Batch> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT id, status, sent_count, failed_count, created_at, sent_at, completed_at, recorded_by
             FROM sms_batches WHERE id = $1 FOR UPDATE",
        )
        .bind(batch_id.0)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(MsafaraError::BatchNotFound(batch_id))?;

        let snapshot = batch_from_row(&row)?;
        if snapshot.status == BatchStatus::Sending {
            return Err(MsafaraError::BatchBusy(batch_id));
        }

        sqlx::query("UPDATE sms_batches SET status = 'sending', sent_at = now() WHERE id = $1")
            .bind(batch_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(snapshot)
    }

    async fn release_batch(&self, batch_id: BatchId, status: BatchStatus) -> Result<()> {
        let result = sqlx::query("UPDATE sms_batches SET status = $2 WHERE id = $1")
            .bind(batch_id.0)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MsafaraError::BatchNotFound(batch_id));
        }
        Ok(())
    }

    async fn complete_batch(
        &self,
        batch_id: BatchId,
        status: BatchStatus,
        sent: usize,
        failed: usize,
    ) -> Result<Batch> {
        let row = sqlx::query(
            "UPDATE sms_batches
             SET status = $2,
                 sent_count = sent_count + $3,
                 failed_count = failed_count + $4,
                 completed_at = now()
             WHERE id = $1
             RETURNING id, status, sent_count, failed_count, created_at, sent_at, completed_at, recorded_by",
        )
        .bind(batch_id.0)
        .bind(status.as_str())
        .bind(sent as i64)
        .bind(failed as i64)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(MsafaraError::BatchNotFound(batch_id))?;
        batch_from_row(&row)
    }

    async fn fail_batch(&self, batch_id: BatchId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sms_batches SET status = 'failed', completed_at = now() WHERE id = $1",
        )
        .bind(batch_id.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MsafaraError::BatchNotFound(batch_id));
        }
        Ok(())
    }

    async fn pending_messages(&self, batch_id: BatchId) -> Result<Vec<Message<Pending>>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM sms_messages
             WHERE batch_id = $1 AND status = 'pending'
             ORDER BY queued_at, id"
        ))
        .bind(batch_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let message = message_from_row(row)?;
                message.into_pending().ok_or_else(|| {
                    MsafaraError::Other(anyhow::anyhow!("Status filter returned non-pending row"))
                })
            })
            .collect()
    }

    async fn batch_messages(&self, batch_id: BatchId) -> Result<Vec<AnyMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM sms_messages
             WHERE batch_id = $1
             ORDER BY queued_at, id"
        ))
        .bind(batch_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn persist<T: MessageState + Clone>(&self, message: &Message<T>) -> Result<()>
    where
        AnyMessage: From<Message<T>>,
    {
        let any = AnyMessage::from(message.clone());
        let id = any.id();
        let result = match &any {
            AnyMessage::Pending(m) => {
                sqlx::query(
                    "UPDATE sms_messages
                     SET status = 'pending', queued_at = $2,
                         provider_message_id = NULL, cost = NULL, sent_at = NULL,
                         error = NULL, failed_at = NULL
                     WHERE id = $1",
                )
                .bind(id.0)
                .bind(m.state.queued_at)
                .execute(&self.pool)
                .await?
            }
            AnyMessage::Sent(m) => {
                sqlx::query(
                    "UPDATE sms_messages
                     SET status = 'sent', provider_message_id = $2, cost = $3, sent_at = $4,
                         error = NULL, failed_at = NULL
                     WHERE id = $1",
                )
                .bind(id.0)
                .bind(&m.state.provider_message_id)
                .bind(m.state.cost)
                .bind(m.state.sent_at)
                .execute(&self.pool)
                .await?
            }
            AnyMessage::Failed(m) => {
                sqlx::query(
                    "UPDATE sms_messages
                     SET status = 'failed', error = $2, failed_at = $3,
                         provider_message_id = NULL, cost = NULL, sent_at = NULL
                     WHERE id = $1",
                )
                .bind(id.0)
                .bind(&m.state.error)
                .bind(m.state.failed_at)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(MsafaraError::MessageNotFound(id));
        }
        Ok(())
    }

    async fn reset_failed(&self, batch_id: BatchId) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE sms_messages
             SET status = 'pending', queued_at = now(),
                 provider_message_id = NULL, cost = NULL, sent_at = NULL,
                 error = NULL, failed_at = NULL
             WHERE batch_id = $1 AND status = 'failed'",
        )
        .bind(batch_id.0)
        .execute(&mut *tx)
        .await?;
        let reset = result.rows_affected() as usize;

        sqlx::query(
            "UPDATE sms_batches
             SET failed_count = GREATEST(failed_count - $2, 0)
             WHERE id = $1",
        )
        .bind(batch_id.0)
        .bind(reset as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reset)
    }

    async fn balance(&self) -> Result<Decimal> {
        let row = sqlx::query("SELECT balance FROM sms_ledger WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("balance")?)
    }

    async fn debit(&self, amount: Decimal) -> Result<Decimal> {
        let row = sqlx::query(
            "UPDATE sms_ledger SET balance = balance - $1 WHERE id = 1 RETURNING balance",
        )
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("balance")?)
    }

    async fn credit(&self, amount: Decimal) -> Result<Decimal> {
        let row = sqlx::query(
            "UPDATE sms_ledger SET balance = balance + $1 WHERE id = 1 RETURNING balance",
        )
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("balance")?)
    }

    async fn messages_since(&self, from: DateTime<Utc>) -> Result<Vec<AnyMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM sms_messages
             WHERE status = 'pending'
                OR (status = 'sent' AND sent_at >= $1)
                OR (status = 'failed' AND failed_at >= $1)
             ORDER BY queued_at, id"
        ))
        .bind(from)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }
}
