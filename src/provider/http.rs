//! HTTP gateway adapters.
//!
//! Each adapter sends one form-encoded POST per message carrying the account
//! id, recipient, message text, and sender id, with the API key in a header.
//! The gateway answers with JSON carrying a status string ("Success" for an
//! accepted message, anything else is a rejection), an opaque message id, and
//! an optional cost. The adapters differ only in endpoint, header, and
//! field/response vocabulary, so they share one private [`Gateway`] core
//! wired up differently per variant.

use std::time::Duration;

use rust_decimal::Decimal;

use crate::config::DispatchConfig;
use crate::error::Result;
use crate::provider::{SendFailure, SendReceipt, SendResult, SmsProvider};
use async_trait::async_trait;

const UJUMBE_URL: &str = "https://api.ujumbesms.co.ke/api/messaging";
const SWIFT_URL: &str = "https://sms.swiftgateway.io/api/v3/send";

/// Field and response-key vocabulary of a gateway dialect.
#[derive(Debug, Clone)]
struct Vocabulary {
    account_field: &'static str,
    recipient_field: &'static str,
    text_field: &'static str,
    sender_field: &'static str,
    status_key: &'static str,
    message_id_key: &'static str,
    cost_key: &'static str,
}

/// Common transport core shared by the HTTP adapters.
struct Gateway {
    client: reqwest::Client,
    url: String,
    auth_header: &'static str,
    auth_value: String,
    account_id: String,
    sender_id: String,
    vocabulary: Vocabulary,
}

impl Gateway {
    fn new(
        url: String,
        auth_header: &'static str,
        auth_value: String,
        account_id: String,
        vocabulary: Vocabulary,
        config: &DispatchConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url,
            auth_header,
            auth_value,
            account_id,
            sender_id: config.sender_id.clone(),
            vocabulary,
        })
    }

    async fn send(&self, recipient: &str, body: &str) -> SendResult {
        let v = &self.vocabulary;
        let form = [
            (v.account_field, self.account_id.as_str()),
            (v.recipient_field, recipient),
            (v.text_field, body),
            (v.sender_field, self.sender_id.as_str()),
        ];

        tracing::debug!(url = %self.url, recipient = %recipient, "Posting message to gateway");

        let response = self
            .client
            .post(&self.url)
            .header(self.auth_header, &self.auth_value)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SendFailure::transport(format!("gateway request timed out: {}", e))
                } else {
                    SendFailure::transport(format!("gateway request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SendFailure::transport(format!(
                "gateway returned HTTP {}",
                status.as_u16()
            )));
        }

        let payload: serde_json::Value = response.json().await.map_err(|e| {
            SendFailure::transport(format!("malformed gateway response: {}", e))
        })?;

        self.parse_payload(&payload)
    }

    /// Normalize the gateway's JSON vocabulary into the common receipt shape.
    fn parse_payload(&self, payload: &serde_json::Value) -> SendResult {
        let v = &self.vocabulary;

        let status = payload
            .get(v.status_key)
            .and_then(|s| s.as_str())
            .ok_or_else(|| {
                SendFailure::transport(format!(
                    "gateway response missing '{}' field",
                    v.status_key
                ))
            })?;

        if !status.eq_ignore_ascii_case("success") {
            // Business-level rejection, distinct from transport failure
            return Err(SendFailure::rejected(status.to_string()));
        }

        // A success without a message id is a malformed payload, same as a
        // missing status field: there is nothing to correlate the send with.
        let provider_message_id = payload
            .get(v.message_id_key)
            .and_then(|s| s.as_str())
            .ok_or_else(|| {
                SendFailure::transport(format!(
                    "gateway response missing '{}' field",
                    v.message_id_key
                ))
            })?
            .to_string();

        let cost = payload.get(v.cost_key).and_then(parse_cost);

        Ok(SendReceipt {
            provider_message_id,
            cost,
        })
    }
}

/// Gateways report cost as a JSON number or a numeric string; accept both.
fn parse_cost(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// Ujumbe
// ============================================================================

/// Adapter for the Ujumbe SMS gateway.
pub struct UjumbeProvider {
    gateway: Gateway,
}

impl UjumbeProvider {
    pub fn new(api_key: String, account_id: String, config: &DispatchConfig) -> Result<Self> {
        let gateway = Gateway::new(
            UJUMBE_URL.to_string(),
            "X-Authorization",
            api_key,
            account_id,
            Vocabulary {
                account_field: "user_id",
                recipient_field: "phone",
                text_field: "message_text",
                sender_field: "sender",
                status_key: "status",
                message_id_key: "message_id",
                cost_key: "cost",
            },
            config,
        )?;
        Ok(Self { gateway })
    }
}

#[async_trait]
impl SmsProvider for UjumbeProvider {
    #[tracing::instrument(skip(self, body), fields(recipient = %recipient))]
    async fn send_single(&self, recipient: &str, body: &str) -> SendResult {
        self.gateway.send(recipient, body).await
    }
}

// ============================================================================
// Swift
// ============================================================================

/// Adapter for the Swift SMS gateway.
pub struct SwiftProvider {
    gateway: Gateway,
}

impl SwiftProvider {
    pub fn new(api_key: String, account_id: String, config: &DispatchConfig) -> Result<Self> {
        let gateway = Gateway::new(
            SWIFT_URL.to_string(),
            "Authorization",
            format!("Bearer {}", api_key),
            account_id,
            Vocabulary {
                account_field: "account",
                recipient_field: "to",
                text_field: "text",
                sender_field: "from",
                status_key: "result",
                message_id_key: "id",
                cost_key: "price",
            },
            config,
        )?;
        Ok(Self { gateway })
    }
}

#[async_trait]
impl SmsProvider for SwiftProvider {
    #[tracing::instrument(skip(self, body), fields(recipient = %recipient))]
    async fn send_single(&self, recipient: &str, body: &str) -> SendResult {
        self.gateway.send(recipient, body).await
    }
}

// ============================================================================
// Custom
// ============================================================================

/// Adapter for a self-hosted gateway speaking the default vocabulary.
pub struct CustomProvider {
    gateway: Gateway,
}

impl CustomProvider {
    pub fn new(
        url: String,
        api_key: String,
        account_id: String,
        config: &DispatchConfig,
    ) -> Result<Self> {
        let gateway = Gateway::new(
            url,
            "X-Api-Key",
            api_key,
            account_id,
            Vocabulary {
                account_field: "user_id",
                recipient_field: "phone",
                text_field: "message",
                sender_field: "sender_id",
                status_key: "status",
                message_id_key: "message_id",
                cost_key: "cost",
            },
            config,
        )?;
        Ok(Self { gateway })
    }
}

#[async_trait]
impl SmsProvider for CustomProvider {
    #[tracing::instrument(skip(self, body), fields(recipient = %recipient))]
    async fn send_single(&self, recipient: &str, body: &str) -> SendResult {
        self.gateway.send(recipient, body).await
    }
}
