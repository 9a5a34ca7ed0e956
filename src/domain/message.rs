//! Message types and lifecycle using the typestate pattern.
//!
//! Each outbound message progresses through distinct states, enforced at
//! compile time: a `Message<Pending>` can only be recorded as sent or failed,
//! and only a `Message<Failed>` can be requeued by the resend flow. Every
//! transition is a single-row write through the [`Storage`] trait, persisted
//! before the dispatcher moves to the next message.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::batch::BatchId;
use crate::error::Result;
use crate::provider::SendReceipt;
use crate::storage::Storage;

/// Unique identifier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        MessageId(uuid)
    }
}

impl std::ops::Deref for MessageId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Database status column values for messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "sent" => Ok(MessageStatus::Sent),
            "failed" => Ok(MessageStatus::Failed),
            _ => Err(format!("Invalid message status: {}", s)),
        }
    }
}

/// Marker trait for valid message states.
pub trait MessageState: Send + Sync {}

/// An outbound message in the dispatch engine.
///
/// Uses the typestate pattern: the generic parameter `T` is the current state
/// and determines which transitions are available.
#[derive(Debug, Clone, Serialize)]
pub struct Message<T: MessageState> {
    /// The current state of the message.
    pub state: T,
    /// The immutable message content.
    pub data: MessageData,
}

/// Immutable content of a message, written once by the composition feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageData {
    pub id: MessageId,
    /// The batch this message belongs to
    pub batch_id: BatchId,
    /// Raw recipient number as enqueued (normalized at send time)
    pub recipient: String,
    /// Message body text
    pub body: String,
}

// ============================================================================
// Message States
// ============================================================================

/// Message is waiting to be dispatched.
#[derive(Debug, Clone, Serialize)]
pub struct Pending {
    pub queued_at: DateTime<Utc>,
}

impl MessageState for Pending {}

/// The gateway accepted the message.
#[derive(Debug, Clone, Serialize)]
pub struct Sent {
    /// Opaque id assigned by the gateway
    pub provider_message_id: String,
    /// Gateway-reported cost, or the configured fallback
    pub cost: Option<Decimal>,
    pub sent_at: DateTime<Utc>,
}

impl MessageState for Sent {}

/// The send attempt did not go through (transport failure, gateway rejection,
/// or a recipient number that failed validation).
#[derive(Debug, Clone, Serialize)]
pub struct Failed {
    /// Human-readable failure description
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl MessageState for Failed {}

// ============================================================================
// Transitions
// ============================================================================

impl Message<Pending> {
    /// Record a successful gateway send.
    pub async fn sent<S: Storage + ?Sized>(
        self,
        receipt: SendReceipt,
        store: &S,
    ) -> Result<Message<Sent>> {
        let message = Message {
            data: self.data,
            state: Sent {
                provider_message_id: receipt.provider_message_id,
                cost: receipt.cost,
                sent_at: Utc::now(),
            },
        };
        store.persist(&message).await?;
        Ok(message)
    }

    /// Record a failed send attempt.
    pub async fn failed<S: Storage + ?Sized>(
        self,
        error: String,
        store: &S,
    ) -> Result<Message<Failed>> {
        let message = Message {
            data: self.data,
            state: Failed {
                error,
                failed_at: Utc::now(),
            },
        };
        store.persist(&message).await?;
        Ok(message)
    }
}

impl Message<Failed> {
    /// Return the message to the queue for another dispatch pass, clearing
    /// the failure record. Used only by the resend flow.
    pub async fn requeue<S: Storage + ?Sized>(self, store: &S) -> Result<Message<Pending>> {
        let message = Message {
            data: self.data,
            state: Pending {
                queued_at: Utc::now(),
            },
        };
        store.persist(&message).await?;
        Ok(message)
    }
}

// ============================================================================
// Unified Message Representation
// ============================================================================

/// Enum that can hold a message in any state.
///
/// Used by storage and reporting where messages are handled uniformly
/// regardless of their current state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "message")]
pub enum AnyMessage {
    Pending(Message<Pending>),
    Sent(Message<Sent>),
    Failed(Message<Failed>),
}

impl AnyMessage {
    /// Get the message ID regardless of state.
    pub fn id(&self) -> MessageId {
        self.data().id
    }

    /// Get the message content regardless of state.
    pub fn data(&self) -> &MessageData {
        match self {
            AnyMessage::Pending(m) => &m.data,
            AnyMessage::Sent(m) => &m.data,
            AnyMessage::Failed(m) => &m.data,
        }
    }

    /// Get the status column value for the current state.
    pub fn status(&self) -> MessageStatus {
        match self {
            AnyMessage::Pending(_) => MessageStatus::Pending,
            AnyMessage::Sent(_) => MessageStatus::Sent,
            AnyMessage::Failed(_) => MessageStatus::Failed,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, AnyMessage::Pending(_))
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, AnyMessage::Sent(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, AnyMessage::Failed(_))
    }

    /// When the message was sent, if it has been.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AnyMessage::Sent(m) => Some(m.state.sent_at),
            _ => None,
        }
    }

    /// Recorded cost, if the message was sent.
    pub fn cost(&self) -> Option<Decimal> {
        match self {
            AnyMessage::Sent(m) => m.state.cost,
            _ => None,
        }
    }

    /// Try to take as a Pending message, consuming self.
    pub fn into_pending(self) -> Option<Message<Pending>> {
        match self {
            AnyMessage::Pending(m) => Some(m),
            _ => None,
        }
    }

    /// Try to take as a Failed message, consuming self.
    pub fn into_failed(self) -> Option<Message<Failed>> {
        match self {
            AnyMessage::Failed(m) => Some(m),
            _ => None,
        }
    }
}

// Conversion traits for going from typed Message to AnyMessage

impl From<Message<Pending>> for AnyMessage {
    fn from(m: Message<Pending>) -> Self {
        AnyMessage::Pending(m)
    }
}

impl From<Message<Sent>> for AnyMessage {
    fn from(m: Message<Sent>) -> Self {
        AnyMessage::Sent(m)
    }
}

impl From<Message<Failed>> for AnyMessage {
    fn from(m: Message<Failed>) -> Self {
        AnyMessage::Failed(m)
    }
}
