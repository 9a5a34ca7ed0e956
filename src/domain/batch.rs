//! Batch types for grouping outbound messages.
//!
//! A batch is a named group of messages submitted together for dispatch. It is
//! created by the composition feature (outside this crate) and mutated only by
//! the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::AnyMessage;

/// Unique identifier for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl From<Uuid> for BatchId {
    fn from(uuid: Uuid) -> Self {
        BatchId(uuid)
    }
}

impl std::ops::Deref for BatchId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Lifecycle status of a batch.
///
/// `Completed` means the dispatch pass ran to the end, not that every message
/// went out: a batch with partial failures is still `Completed`. `Failed` is
/// reserved for passes where nothing was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Sending,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Sending => "sending",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "sending" => Ok(BatchStatus::Sending),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            _ => Err(format!("Invalid batch status: {}", s)),
        }
    }
}

/// A batch of outbound messages.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub id: BatchId,
    pub status: BatchStatus,
    /// Messages confirmed sent across all passes of this batch
    pub sent_count: i64,
    /// Messages currently in the failed state
    pub failed_count: i64,
    pub created_at: DateTime<Utc>,
    /// When the most recent dispatch pass began
    pub sent_at: Option<DateTime<Utc>>,
    /// When the most recent dispatch pass finished
    pub completed_at: Option<DateTime<Utc>>,
    /// Acting identity that created the batch, passed explicitly by the
    /// composition layer rather than read from ambient session state
    pub recorded_by: Option<String>,
}

impl Batch {
    /// Derive the batch status from its message rows instead of the cached
    /// batch-level counters.
    ///
    /// If the process died between the last per-message write and the final
    /// aggregation step, the cached status stays `sending` forever while the
    /// message rows hold the truth. Readers that need a trustworthy answer
    /// should prefer this.
    pub fn derive_status(messages: &[AnyMessage]) -> BatchStatus {
        let total = messages.len();
        let pending = messages.iter().filter(|m| m.is_pending()).count();
        let sent = messages.iter().filter(|m| m.is_sent()).count();
        let failed = total - pending - sent;

        if total == 0 || pending == total {
            BatchStatus::Pending
        } else if pending > 0 {
            BatchStatus::Sending
        } else {
            final_status(sent, failed)
        }
    }
}

/// Final status rule for a finished pass: failures only matter when nothing
/// went out at all.
pub fn final_status(sent: usize, failed: usize) -> BatchStatus {
    if sent == 0 && failed > 0 {
        BatchStatus::Failed
    } else {
        BatchStatus::Completed
    }
}

/// Outcome of a dispatch pass, returned to the caller.
///
/// `success` reports whether the pass ran; callers must inspect
/// `failed_count` (not just the batch status) to detect partial failure.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub success: bool,
    pub message: String,
    pub sent_count: usize,
    pub failed_count: usize,
    /// Human-readable per-message error strings, each naming the recipient
    pub errors: Vec<String>,
}
