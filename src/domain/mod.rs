//! Domain types: batches, messages, and their lifecycles.

pub mod batch;
pub mod message;

pub use batch::{final_status, Batch, BatchId, BatchStatus, DispatchReport};
pub use message::{
    AnyMessage, Failed, Message, MessageData, MessageId, MessageState, MessageStatus, Pending,
    Sent,
};
