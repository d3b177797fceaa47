//! Pipeline configuration.
//!
//! Defaults, then an optional JSON file named by `NOTIFY_CONFIG_FILE`, then
//! individual environment variables.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bus::EventBusConfig;
use crate::identity::AccessProviderConfig;
use crate::mailbox::MailboxConfig;
use crate::notification::NotificationConfig;
use crate::scheduler::SchedulerConfig;
use crate::transport::TransportConfig;
use crate::{Error, Result};

pub const ENV_CONFIG_FILE: &str = "NOTIFY_CONFIG_FILE";
pub const ENV_DIGEST_INTERVAL_SECS: &str = "NOTIFY_DIGEST_INTERVAL_SECS";
pub const ENV_SUMMARY_INTERVAL_SECS: &str = "NOTIFY_SUMMARY_INTERVAL_SECS";
pub const ENV_SUMMARY_EXCERPT_CHARS: &str = "NOTIFY_SUMMARY_EXCERPT_CHARS";
pub const ENV_SEND_TIMEOUT_SECS: &str = "NOTIFY_SEND_TIMEOUT_SECS";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "NOTIFY_SWEEP_INTERVAL_SECS";
pub const ENV_REPLY_DOMAIN: &str = "NOTIFY_REPLY_DOMAIN";
pub const ENV_LOG_DIR: &str = "NOTIFY_LOG_DIR";

/// Everything needed to assemble a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub bus: EventBusConfig,
    pub notification: NotificationConfig,
    pub mailbox: MailboxConfig,
    pub scheduler: SchedulerConfig,
    pub transport: TransportConfig,
    pub access: AccessProviderConfig,
    pub log_dir: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bus: EventBusConfig::default(),
            notification: NotificationConfig::default(),
            mailbox: MailboxConfig::default(),
            scheduler: SchedulerConfig::default(),
            transport: TransportConfig::default(),
            access: AccessProviderConfig::default(),
            log_dir: "logs".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load from the process environment, falling back to defaults.
    pub fn from_env_or_default() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match non_empty(&lookup, ENV_CONFIG_FILE) {
            Some(path) => {
                info!(path = %path, "Loading pipeline config file");
                Self::from_json_file(&path)?
            }
            None => Self::default(),
        };

        if let Some(secs) = parse_var(&lookup, ENV_DIGEST_INTERVAL_SECS)? {
            config.mailbox.digest_interval_secs = secs;
        }
        if let Some(secs) = parse_var(&lookup, ENV_SUMMARY_INTERVAL_SECS)? {
            config.mailbox.summary_interval_secs = secs;
        }
        if let Some(chars) = parse_var(&lookup, ENV_SUMMARY_EXCERPT_CHARS)? {
            config.mailbox.summary_excerpt_chars = chars;
        }
        if let Some(secs) = parse_var(&lookup, ENV_SEND_TIMEOUT_SECS)? {
            config.mailbox.send_timeout_secs = secs;
        }
        if let Some(secs) = parse_var(&lookup, ENV_SWEEP_INTERVAL_SECS)? {
            config.scheduler.sweep_interval_secs = secs;
        }
        if let Some(domain) = non_empty(&lookup, ENV_REPLY_DOMAIN) {
            config.notification.reply_domain = domain;
        }
        if let Some(dir) = non_empty(&lookup, ENV_LOG_DIR) {
            config.log_dir = dir;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mailbox.summary_excerpt_chars == 0 {
            return Err(Error::config("summary_excerpt_chars must be greater than 0"));
        }
        if self.scheduler.sweep_interval_secs == 0 {
            return Err(Error::config("sweep_interval_secs must be greater than 0"));
        }
        if self.mailbox.send_timeout_secs == 0 {
            return Err(Error::config("send_timeout_secs must be greater than 0"));
        }
        if self.notification.reply_domain.trim().is_empty() {
            return Err(Error::config("reply_domain must not be empty"));
        }
        if self.bus.max_queue_size == 0 || self.bus.max_attempts == 0 {
            return Err(Error::config(
                "bus max_queue_size and max_attempts must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup, key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::config(format!("invalid {}={:?}: {}", key, raw, e))),
        None => Ok(None),
    }
}
