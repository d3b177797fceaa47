//! Webhook mail transport.
//!
//! Posts each message as JSON to a mail relay. Sends to one recipient can be
//! limited to one per `min_interval_secs`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{MailTransport, OutboundMessage};
use crate::{Error, Result};

/// HTTP verb used against the relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelayMethod {
    #[default]
    Post,
    Put,
}

/// Credentials presented to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookAuth {
    Bearer { token: String },
    Basic { username: String, password: String },
    /// Arbitrary header such as `X-Api-Key`.
    Header { name: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Relay endpoint accepting one message per request.
    pub url: String,
    pub method: RelayMethod,
    /// Extra headers sent with every request.
    pub headers: BTreeMap<String, String>,
    pub auth: Option<WebhookAuth>,
    pub timeout_secs: u64,
    /// Minimum seconds between two sends to the same recipient, for relays
    /// that throttle per address. 0 (the default) disables the limit.
    pub min_interval_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: RelayMethod::Post,
            headers: BTreeMap::new(),
            auth: None,
            timeout_secs: 30,
            min_interval_secs: 0,
        }
    }
}

/// Wire body of one relayed message.
#[derive(Debug, Serialize)]
struct RelayPayload<'a> {
    message_id: &'a str,
    to: &'a str,
    from: &'a str,
    reply_to: &'a str,
    subject: &'a str,
    body: &'a str,
    timestamp: String,
}

impl<'a> From<&'a OutboundMessage> for RelayPayload<'a> {
    fn from(message: &'a OutboundMessage) -> Self {
        Self {
            message_id: &message.message_id,
            to: &message.to,
            from: &message.from,
            reply_to: &message.reply_to,
            subject: &message.subject,
            body: &message.body,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Last successful send per recipient.
#[derive(Debug, Default)]
struct RecipientLimiter {
    min_interval: Duration,
    last_sent: DashMap<String, Instant>,
}

impl RecipientLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: DashMap::new(),
        }
    }

    fn check(&self, recipient: &str, now: Instant) -> Result<()> {
        if self.min_interval.is_zero() {
            return Ok(());
        }
        if let Some(last) = self.last_sent.get(recipient) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.min_interval {
                let remaining = self.min_interval - elapsed;
                return Err(Error::RateLimited {
                    key: recipient.to_string(),
                    retry_after_secs: remaining.as_secs().max(1),
                });
            }
        }
        Ok(())
    }

    /// Remember a successful send and forget recipients whose window has passed.
    fn record(&self, recipient: &str, now: Instant) {
        if self.min_interval.is_zero() {
            return;
        }
        self.last_sent
            .retain(|_, last| now.saturating_duration_since(*last) < self.min_interval);
        self.last_sent.insert(recipient.to_string(), now);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.last_sent.len()
    }
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::config(format!("invalid webhook header name '{}': {}", name, e)))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| Error::config(format!("invalid value for webhook header '{}': {}", name, e)))?;
    Ok((header_name, header_value))
}

/// Hands messages to an HTTP mail relay.
pub struct WebhookTransport {
    config: WebhookConfig,
    client: Client,
    headers: HeaderMap,
    limiter: RecipientLimiter,
}

impl WebhookTransport {
    /// Fails on an empty url or a header that is not valid HTTP.
    pub fn new(config: WebhookConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(Error::config("webhook transport requires a url"));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let (name, value) = header_pair(name, value)?;
            headers.insert(name, value);
        }
        match &config.auth {
            Some(WebhookAuth::Bearer { token }) => {
                let (name, value) =
                    header_pair(reqwest::header::AUTHORIZATION.as_str(), &format!("Bearer {}", token))?;
                headers.insert(name, value);
            }
            Some(WebhookAuth::Header { name, value }) => {
                let (name, value) = header_pair(name, value)?;
                headers.insert(name, value);
            }
            Some(WebhookAuth::Basic { .. }) | None => {}
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let limiter = RecipientLimiter::new(Duration::from_secs(config.min_interval_secs));

        Ok(Self {
            config,
            client,
            headers,
            limiter,
        })
    }

    fn request(&self, message: &OutboundMessage) -> RequestBuilder {
        let request = match self.config.method {
            RelayMethod::Post => self.client.post(&self.config.url),
            RelayMethod::Put => self.client.put(&self.config.url),
        }
        .headers(self.headers.clone())
        .json(&RelayPayload::from(message));

        match &self.config.auth {
            Some(WebhookAuth::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            _ => request,
        }
    }
}

#[async_trait]
impl MailTransport for WebhookTransport {
    fn transport_type(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        self.limiter.check(&message.to, Instant::now())?;

        let response = self
            .request(message)
            .send()
            .await
            .map_err(|e| Error::transport("webhook", format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(to = %message.to, %status, "Relay rejected message: {}", detail);
            return Err(Error::transport(
                "webhook",
                format!("relay answered {}: {}", status, detail),
            ));
        }

        self.limiter.record(&message.to, Instant::now());
        debug!(message_id = %message.message_id, to = %message.to, "Message relayed");
        Ok(())
    }
}
