//! Bulk SMS dispatch engine.
//!
//! Takes batches of queued messages and pushes them through a rate-limited
//! SMS gateway: sequential sends with two throttle layers (between messages
//! and between chunks), a durable per-message status trail, and a prepaid
//! balance ledger debited per confirmed send.
//!
//! # Architecture
//!
//! - **[`domain`]**: batches and messages. Messages use the typestate pattern
//!   (`Message<Pending>` → `Message<Sent>` / `Message<Failed>`) so invalid
//!   transitions don't compile.
//! - **[`provider`]**: the [`provider::SmsProvider`] trait plus HTTP gateway
//!   adapters and a deterministic simulated provider.
//! - **[`storage`]**: the [`storage::Storage`] trait with in-memory and
//!   (feature `postgres`) database-backed implementations.
//! - **[`dispatch`]**: the [`dispatch::BatchCoordinator`] claiming batches and
//!   the chunk dispatcher doing the throttled sends.
//! - **[`stats`]**: windowed delivery statistics.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use msafara::config::DispatchConfig;
//! use msafara::dispatch::BatchCoordinator;
//! use msafara::provider::SimulatedProvider;
//! use msafara::storage::{InMemoryStore, Storage};
//!
//! # async fn run() -> msafara::Result<()> {
//! let store = Arc::new(InMemoryStore::new());
//! let provider = Arc::new(SimulatedProvider::new());
//!
//! let batch = store.create_batch(Some("admin".to_string())).await?;
//! store
//!     .enqueue_message(batch.id, "0722000000".to_string(), "Habari!".to_string())
//!     .await?;
//!
//! let coordinator = BatchCoordinator::new(store, provider, DispatchConfig::default());
//! let report = coordinator.process_batch(batch.id).await?;
//! assert_eq!(report.sent_count, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod phone;
pub mod provider;
pub mod stats;
pub mod storage;

pub use config::DispatchConfig;
pub use dispatch::BatchCoordinator;
pub use domain::{
    AnyMessage, Batch, BatchId, BatchStatus, DispatchReport, Message, MessageId, MessageStatus,
};
pub use error::{MsafaraError, Result};
pub use provider::{ProviderConfig, SimulatedProvider, SmsProvider};
pub use stats::{Period, SmsStatistics, StatisticsReporter};
pub use storage::{InMemoryStore, Storage};

/// Embedded database migrations for the `postgres` storage backend.
#[cfg(feature = "postgres")]
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}
