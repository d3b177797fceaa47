//! Outbound mail transports.
//!
//! - Log (development, prints every message)
//! - Webhook (HTTP POST/PUT of the message as JSON)

mod log;
mod webhook;

pub use log::{LogTransport, LogTransportConfig};
pub use webhook::{RelayMethod, WebhookAuth, WebhookConfig, WebhookTransport};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A rendered message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message_id: String,
    pub to: String,
    pub from: String,
    pub reply_to: String,
    pub subject: String,
    pub body: String,
}

/// Trait for mail transports.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Get the transport type name.
    fn transport_type(&self) -> &'static str;

    /// Send one message. An `Err` leaves the message to be retried.
    async fn send(&self, message: &OutboundMessage) -> Result<()>;
}

/// Transport configuration wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    Log(LogTransportConfig),
    Webhook(WebhookConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Log(LogTransportConfig::default())
    }
}

impl TransportConfig {
    pub fn transport_type(&self) -> &'static str {
        match self {
            Self::Log(_) => "log",
            Self::Webhook(_) => "webhook",
        }
    }
}

/// Resolve the configured transport once, at startup.
pub fn build_transport(config: &TransportConfig) -> Result<Arc<dyn MailTransport>> {
    Ok(match config {
        TransportConfig::Log(c) => Arc::new(LogTransport::new(c.clone())),
        TransportConfig::Webhook(c) => Arc::new(WebhookTransport::new(c.clone())?),
    })
}
