//! Mailbox state.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::DeliveryMode;
use crate::subscription::Subscription;

/// Reference to a notification waiting in a mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedNotification {
    pub notification_id: String,
    pub queued_at: DateTime<Utc>,
}

/// Pending deliveries for one subscription. The id is the subscription id.
///
/// `queue` is read-only outside this module; it is kept in step with the
/// id index used for deduplication.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mailbox {
    pub id: String,
    pub subscription_id: String,
    pub user_id: String,
    pub project_id: String,
    pub app_config_id: String,
    pub mode: DeliveryMode,
    /// Arrival order.
    pub queue: Vec<QueuedNotification>,
    #[serde(skip)]
    index: HashSet<String>,
    /// `None` until the first successful flush.
    pub last_delivery: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Consecutive failed flushes.
    pub failed_attempts: u32,
    pub last_error: Option<String>,
    /// The subscription is gone; purge once the queue drains.
    pub detached: bool,
    /// Already dropped from the store; writers must fetch a fresh mailbox.
    #[serde(skip)]
    pub(crate) removed: bool,
}

impl Mailbox {
    pub fn for_subscription(subscription: &Subscription, now: DateTime<Utc>) -> Self {
        Self {
            id: subscription.id.clone(),
            subscription_id: subscription.id.clone(),
            user_id: subscription.user_id.clone(),
            project_id: subscription.project_id.clone(),
            app_config_id: subscription.app_config_id.clone(),
            mode: subscription.mode,
            queue: Vec::new(),
            index: HashSet::new(),
            last_delivery: None,
            created_at: now,
            failed_attempts: 0,
            last_error: None,
            detached: false,
            removed: false,
        }
    }

    pub fn contains(&self, notification_id: &str) -> bool {
        self.index.contains(notification_id)
    }

    /// Append unless already queued. Returns whether it was appended.
    pub fn push(&mut self, notification_id: &str, now: DateTime<Utc>) -> bool {
        if !self.index.insert(notification_id.to_string()) {
            return false;
        }
        self.queue.push(QueuedNotification {
            notification_id: notification_id.to_string(),
            queued_at: now,
        });
        true
    }

    pub fn queued_ids(&self) -> Vec<String> {
        self.queue
            .iter()
            .map(|q| q.notification_id.clone())
            .collect()
    }

    /// Whether a sweep at `now` should flush this mailbox.
    ///
    /// Direct mailboxes only hold a queue after a failed send and are
    /// retried on every sweep. A batched mailbox that never delivered is due
    /// as soon as it holds something.
    pub fn is_due(
        &self,
        now: DateTime<Utc>,
        digest_interval: chrono::Duration,
        summary_interval: chrono::Duration,
    ) -> bool {
        if self.queue.is_empty() {
            return false;
        }
        let waited = |interval| {
            self.last_delivery
                .is_none_or(|last| now - last >= interval)
        };
        match self.mode {
            DeliveryMode::Direct => true,
            DeliveryMode::Digest => waited(digest_interval),
            DeliveryMode::Summary => waited(summary_interval),
        }
    }

    /// Drop the delivered notifications and reset the delivery clock.
    pub fn acknowledge(&mut self, delivered: &[String], now: DateTime<Utc>) {
        self.remove_ids(delivered);
        self.last_delivery = Some(now);
        self.failed_attempts = 0;
        self.last_error = None;
    }

    /// Drop notifications without counting it as a delivery.
    pub fn discard(&mut self, ids: &[String]) {
        self.remove_ids(ids);
    }

    fn remove_ids(&mut self, ids: &[String]) {
        let mut dropped = 0;
        for id in ids {
            if self.index.remove(id) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            let index = &self.index;
            self.queue.retain(|q| index.contains(&q.notification_id));
        }
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.failed_attempts += 1;
        self.last_error = Some(error.into());
    }

    pub fn is_purgeable(&self) -> bool {
        self.detached && self.queue.is_empty()
    }
}
