//! SMS gateway abstraction.
//!
//! This module defines the `SmsProvider` trait to abstract the one-message
//! send call, enabling testability with the deterministic simulated
//! implementation. The concrete provider is selected once at construction
//! time via [`ProviderConfig`], never re-dispatched per call.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::DispatchConfig;
use crate::error::Result;

pub mod http;
pub mod simulated;

pub use http::{CustomProvider, SwiftProvider, UjumbeProvider};
pub use simulated::{SimulatedCall, SimulatedProvider};

/// Receipt returned by a gateway for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    /// Opaque id the gateway assigned to the message
    pub provider_message_id: String,
    /// Gateway-reported cost, if any
    pub cost: Option<Decimal>,
}

/// Category of a per-message send failure.
///
/// The distinction matters for logging and operator triage; the chunk loop
/// treats both the same way (record and continue), matching the contract the
/// caller actually needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection error, timeout, non-2xx status, or malformed payload
    Transport,
    /// The gateway processed the request and declined the message
    /// (blacklisted recipient, exhausted provider credit, bad number)
    Rejected,
}

/// Why a single send did not go through.
///
/// This is per-message data, not a crate error: a total provider outage
/// surfaces as one of these per message, and the dispatch loop keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl SendFailure {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transport,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Rejected,
            message: message.into(),
        }
    }
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Transport => write!(f, "transport error: {}", self.message),
            FailureKind::Rejected => write!(f, "gateway rejected: {}", self.message),
        }
    }
}

/// Per-message send result.
pub type SendResult = std::result::Result<SendReceipt, SendFailure>;

/// Trait for sending a single message through an SMS gateway.
///
/// Implementations own all transport detail (endpoints, field names, response
/// vocabulary); the dispatcher only sees the common receipt/failure shape.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Send one message to a normalized recipient number.
    async fn send_single(&self, recipient: &str, body: &str) -> SendResult;
}

/// Gateway selection, resolved once at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Ujumbe gateway (form POST, `X-Authorization` key header)
    Ujumbe { api_key: String, account_id: String },
    /// Swift gateway (form POST, bearer token)
    Swift { api_key: String, account_id: String },
    /// Self-hosted gateway speaking the default vocabulary at a custom URL
    Custom {
        url: String,
        api_key: String,
        account_id: String,
    },
    /// Deterministic in-process provider for environments without credentials
    Simulated,
}

/// Build the configured provider.
///
/// Timeouts and the sender id come from the dispatch configuration so the
/// same tunables apply to every gateway variant.
pub fn from_config(
    provider: &ProviderConfig,
    config: &DispatchConfig,
) -> Result<Arc<dyn SmsProvider>> {
    Ok(match provider {
        ProviderConfig::Ujumbe {
            api_key,
            account_id,
        } => Arc::new(UjumbeProvider::new(
            api_key.clone(),
            account_id.clone(),
            config,
        )?),
        ProviderConfig::Swift {
            api_key,
            account_id,
        } => Arc::new(SwiftProvider::new(
            api_key.clone(),
            account_id.clone(),
            config,
        )?),
        ProviderConfig::Custom {
            url,
            api_key,
            account_id,
        } => Arc::new(CustomProvider::new(
            url.clone(),
            api_key.clone(),
            account_id.clone(),
            config,
        )?),
        ProviderConfig::Simulated => Arc::new(SimulatedProvider::new()),
    })
}
