//! Delivery mode value object.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// How queued notifications reach a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// One message per notification, sent as soon as it is queued.
    #[default]
    Direct,
    /// One message per interval with every queued notification in full.
    Digest,
    /// One message per interval with a short excerpt of each notification.
    Summary,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Digest => "digest",
            Self::Summary => "summary",
        }
    }

    /// Whether notifications are held until the scheduler fires the mailbox.
    pub fn is_batched(&self) -> bool {
        !matches!(self, Self::Direct)
    }
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "digest" => Ok(Self::Digest),
            "summary" => Ok(Self::Summary),
            other => Err(Error::validation(format!("unknown delivery mode: {other}"))),
        }
    }
}
