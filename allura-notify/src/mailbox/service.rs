//! Mailbox service: enqueue, flush and sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::compose::compose;
use super::model::Mailbox;
use super::store::{MailboxHandle, MailboxStore};
use crate::domain::DeliveryMode;
use crate::identity::UserDirectory;
use crate::notification::{Notification, NotificationRepository};
use crate::subscription::{Subscription, SubscriptionRepository};
use crate::transport::MailTransport;
use crate::{Error, Result};

/// Configuration for mailbox delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Minimum seconds between two digest messages of one mailbox.
    pub digest_interval_secs: u64,
    /// Minimum seconds between two summary messages of one mailbox.
    pub summary_interval_secs: u64,
    /// Characters of each notification kept in a summary.
    pub summary_excerpt_chars: usize,
    /// Upper bound on each collaborator call made while flushing: loading
    /// notifications, looking up the recipient, one transport send.
    pub send_timeout_secs: u64,
    /// Sender of digest and summary messages.
    pub from_address: String,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            digest_interval_secs: 86400,
            summary_interval_secs: 86400,
            summary_excerpt_chars: 200,
            send_timeout_secs: 30,
            from_address: "Allura <noreply@p>".to_string(),
        }
    }
}

impl MailboxConfig {
    pub fn digest_interval(&self) -> chrono::Duration {
        secs_to_chrono(self.digest_interval_secs)
    }

    pub fn summary_interval(&self) -> chrono::Duration {
        secs_to_chrono(self.summary_interval_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

fn secs_to_chrono(secs: u64) -> chrono::Duration {
    chrono::Duration::from_std(Duration::from_secs(secs)).unwrap_or(chrono::Duration::MAX)
}

/// What `enqueue` did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Waiting for the next digest or summary sweep.
    Queued,
    /// Already in the mailbox; nothing changed.
    Duplicate,
    /// Direct delivery succeeded.
    Sent,
    /// Direct delivery failed; kept for the next sweep.
    SendFailed,
    /// The subscription was removed after it was resolved; nothing queued.
    Dropped,
}

/// Result of one `fire_ready` sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub fired: usize,
    pub messages_sent: usize,
    pub failed: usize,
    pub purged: usize,
    pub cancelled: bool,
}

/// Mailbox counts for status pages.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MailboxStats {
    pub mailboxes: usize,
    pub queued: usize,
    pub failing: usize,
    pub by_mode: HashMap<String, usize>,
}

#[derive(Debug, Default)]
struct FlushOutcome {
    messages_sent: usize,
    failure: Option<Error>,
}

pub struct MailboxService {
    config: MailboxConfig,
    store: MailboxStore,
    subscriptions: Arc<dyn SubscriptionRepository>,
    notifications: Arc<dyn NotificationRepository>,
    users: Arc<dyn UserDirectory>,
    transport: Arc<dyn MailTransport>,
}

impl MailboxService {
    pub fn new(
        config: MailboxConfig,
        subscriptions: Arc<dyn SubscriptionRepository>,
        notifications: Arc<dyn NotificationRepository>,
        users: Arc<dyn UserDirectory>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            config,
            store: MailboxStore::new(),
            subscriptions,
            notifications,
            users,
            transport,
        }
    }

    pub fn config(&self) -> &MailboxConfig {
        &self.config
    }

    /// Queue `notification` in the mailbox of `subscription`.
    ///
    /// Direct mailboxes send right away. A notification that is already
    /// queued is ignored, so a redelivered bus event queues it once. The
    /// subscription is looked up again under the mailbox lock; if it was
    /// deleted in the meantime nothing is queued and an empty mailbox is
    /// purged.
    pub async fn enqueue(
        &self,
        subscription: &Subscription,
        notification: &Notification,
    ) -> Result<EnqueueOutcome> {
        loop {
            let now = Utc::now();
            let handle = self.store.get_or_create(subscription, now);
            let mut mailbox = handle.lock().await;
            if mailbox.removed {
                // Purged while we waited for the lock.
                continue;
            }

            match self.subscriptions.get(&subscription.id).await {
                Ok(_) => {}
                Err(Error::NotFound { .. }) => {
                    mailbox.detached = true;
                    if mailbox.is_purgeable() {
                        self.purge(&mut mailbox, &handle);
                    }
                    debug!(
                        subscription_id = %subscription.id,
                        notification_id = %notification.id,
                        "Subscription removed before enqueue, dropping"
                    );
                    return Ok(EnqueueOutcome::Dropped);
                }
                Err(e) => return Err(e),
            }

            mailbox.mode = subscription.mode;
            if !mailbox.push(&notification.id, now) {
                debug!(
                    mailbox_id = %mailbox.id,
                    notification_id = %notification.id,
                    "Notification already queued"
                );
                return Ok(EnqueueOutcome::Duplicate);
            }

            if mailbox.mode != DeliveryMode::Direct {
                debug!(
                    mailbox_id = %mailbox.id,
                    notification_id = %notification.id,
                    queued = mailbox.queue.len(),
                    "Notification queued"
                );
                return Ok(EnqueueOutcome::Queued);
            }

            let outcome = self.flush(&mut mailbox, now).await;
            return Ok(if outcome.failure.is_none() {
                EnqueueOutcome::Sent
            } else {
                EnqueueOutcome::SendFailed
            });
        }
    }

    /// Flush every mailbox that is due at `now`.
    ///
    /// Each mailbox is flushed under its own lock; a failure in one mailbox
    /// is recorded and the sweep moves on. `cancel` is honored between
    /// mailboxes only.
    pub async fn fire_ready(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> SweepReport {
        let mut report = SweepReport::default();
        let digest_interval = self.config.digest_interval();
        let summary_interval = self.config.summary_interval();

        for id in self.store.ids() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let Some(handle) = self.store.get(&id) else {
                continue;
            };
            report.examined += 1;

            let mut mailbox = handle.lock().await;
            if mailbox.removed {
                continue;
            }

            if mailbox.is_due(now, digest_interval, summary_interval) {
                report.fired += 1;
                let outcome = self.flush(&mut mailbox, now).await;
                report.messages_sent += outcome.messages_sent;
                if outcome.failure.is_some() {
                    report.failed += 1;
                }
            }

            if mailbox.is_purgeable() && self.purge(&mut mailbox, &handle) {
                report.purged += 1;
            }
        }

        if report.fired > 0 || report.cancelled {
            info!(
                examined = report.examined,
                fired = report.fired,
                sent = report.messages_sent,
                failed = report.failed,
                purged = report.purged,
                cancelled = report.cancelled,
                "Mailbox sweep finished"
            );
        }
        report
    }

    /// Called when the subscription behind `subscription_id` is deleted.
    ///
    /// Returns whether the mailbox was purged now. A mailbox with queued
    /// notifications is kept until a flush empties it.
    pub async fn detach(&self, subscription_id: &str) -> bool {
        let Some(handle) = self.store.get(subscription_id) else {
            return false;
        };
        let mut mailbox = handle.lock().await;
        if mailbox.removed {
            return false;
        }
        mailbox.detached = true;
        if mailbox.is_purgeable() {
            return self.purge(&mut mailbox, &handle);
        }
        debug!(
            mailbox_id = %mailbox.id,
            queued = mailbox.queue.len(),
            "Mailbox detached, waiting for final flush"
        );
        false
    }

    /// Snapshot of one mailbox.
    pub async fn get(&self, id: &str) -> Option<Mailbox> {
        let handle = self.store.get(id)?;
        let mailbox = handle.lock().await;
        (!mailbox.removed).then(|| mailbox.clone())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub async fn stats(&self) -> MailboxStats {
        let mut stats = MailboxStats::default();
        for id in self.store.ids() {
            let Some(handle) = self.store.get(&id) else {
                continue;
            };
            let mailbox = handle.lock().await;
            if mailbox.removed {
                continue;
            }
            stats.mailboxes += 1;
            stats.queued += mailbox.queue.len();
            if mailbox.failed_attempts > 0 {
                stats.failing += 1;
            }
            *stats
                .by_mode
                .entry(mailbox.mode.as_str().to_string())
                .or_default() += 1;
        }
        stats
    }

    fn purge(&self, mailbox: &mut Mailbox, handle: &MailboxHandle) -> bool {
        mailbox.removed = true;
        let purged = self.store.remove_if_current(&mailbox.id, handle);
        if purged {
            info!(mailbox_id = %mailbox.id, user_id = %mailbox.user_id, "Mailbox purged");
        }
        purged
    }

    /// Send the queue of a locked mailbox.
    ///
    /// Only notifications covered by a successful send leave the queue. The
    /// lock is held until the send attempt has finished.
    async fn flush(&self, mailbox: &mut Mailbox, now: DateTime<Utc>) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();

        match self.try_flush(mailbox, now, &mut outcome).await {
            Ok(()) => {
                if outcome.messages_sent > 0 {
                    debug!(
                        mailbox_id = %mailbox.id,
                        mode = %mailbox.mode,
                        messages = outcome.messages_sent,
                        "Mailbox flushed"
                    );
                }
            }
            Err(e) => {
                if e.is_delivery_failure() {
                    warn!(
                        mailbox_id = %mailbox.id,
                        user_id = %mailbox.user_id,
                        queued = mailbox.queue.len(),
                        "Delivery failed, keeping queue: {}",
                        e
                    );
                } else {
                    error!(
                        mailbox_id = %mailbox.id,
                        user_id = %mailbox.user_id,
                        queued = mailbox.queue.len(),
                        "Mailbox flush failed: {}",
                        e
                    );
                }
                mailbox.record_failure(e.to_string());
                outcome.failure = Some(e);
            }
        }
        outcome
    }

    async fn try_flush(
        &self,
        mailbox: &mut Mailbox,
        now: DateTime<Utc>,
        outcome: &mut FlushOutcome,
    ) -> Result<()> {
        let queued = mailbox.queued_ids();
        if queued.is_empty() {
            return Ok(());
        }

        let limit = self.config.send_timeout();
        let notifications = bounded(
            limit,
            || format!("loading {} queued notifications", queued.len()),
            self.notifications.get_many(&queued),
        )
        .await?;
        if notifications.len() < queued.len() {
            let missing: Vec<String> = queued
                .iter()
                .filter(|id| !notifications.iter().any(|n| &n.id == *id))
                .cloned()
                .collect();
            warn!(
                mailbox_id = %mailbox.id,
                missing = missing.len(),
                "Dropping queued notifications that no longer exist"
            );
            mailbox.discard(&missing);
        }
        if notifications.is_empty() {
            return Ok(());
        }

        let recipient = bounded(
            limit,
            || format!("user lookup for {}", mailbox.user_id),
            self.users.get_user(&mailbox.user_id),
        )
        .await?;
        let messages = compose(mailbox.mode, &notifications, &recipient, &self.config)?;

        for composed in messages {
            bounded(
                limit,
                || {
                    format!(
                        "{} send to {}",
                        self.transport.transport_type(),
                        composed.message.to
                    )
                },
                self.transport.send(&composed.message),
            )
            .await?;
            mailbox.acknowledge(&composed.notification_ids, now);
            outcome.messages_sent += 1;
        }
        Ok(())
    }
}

/// Await `fut` for at most `limit`; running out is `Error::Timeout`.
async fn bounded<T, F>(
    limit: Duration,
    operation: impl FnOnce() -> String,
    fut: F,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation(),
            after_ms: limit.as_millis() as u64,
        }),
    }
}
