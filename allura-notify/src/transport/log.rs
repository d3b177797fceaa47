//! Transport that writes messages to the log.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{MailTransport, OutboundMessage};
use crate::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogTransportConfig {
    /// Also log the message body.
    #[serde(default)]
    pub include_body: bool,
}

#[derive(Debug, Default)]
pub struct LogTransport {
    config: LogTransportConfig,
}

impl LogTransport {
    pub fn new(config: LogTransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailTransport for LogTransport {
    fn transport_type(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        info!(
            message_id = %message.message_id,
            to = %message.to,
            from = %message.from,
            reply_to = %message.reply_to,
            subject = %message.subject,
            body_len = message.body.len(),
            "Outbound message"
        );
        if self.config.include_body {
            debug!(message_id = %message.message_id, "{}", message.body);
        }
        Ok(())
    }
}
