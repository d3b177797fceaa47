//! Posting notifications and fanning them out to mailboxes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::model::{Notification, NotificationRepository, PostFields};
use super::notices::{UserNotice, UserNotices};
use super::render::{RenderInput, RenderRegistry, Rendered};
use crate::bus::{BusEvent, EventBus, EventEnvelope, EventHandler, topics};
use crate::domain::{ArtifactRef, EventKind, RequestContext, ToolKind};
use crate::identity::{UserDirectory, UserProfile};
use crate::mailbox::{EnqueueOutcome, MailboxService};
use crate::subscription::SubscriptionService;
use crate::{Error, Result};

/// Configuration for notification rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Domain of generated sender and reply addresses.
    pub reply_domain: String,
    /// Tools whose events can be rendered.
    pub installed_tools: Vec<ToolKind>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            reply_domain: "p".to_string(),
            installed_tools: ToolKind::ALL.to_vec(),
        }
    }
}

/// Fan-out result for one notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub subscribers: usize,
    pub queued: usize,
    pub sent: usize,
    pub send_failed: usize,
    pub duplicates: usize,
    /// Subscriptions deleted between resolution and enqueue.
    pub dropped: usize,
}

pub struct NotificationService {
    config: NotificationConfig,
    renderers: RenderRegistry,
    notifications: Arc<dyn NotificationRepository>,
    users: Arc<dyn UserDirectory>,
    subscriptions: Arc<SubscriptionService>,
    mailboxes: Arc<MailboxService>,
    bus: Arc<EventBus>,
    notices: UserNotices,
}

impl NotificationService {
    pub fn new(
        config: NotificationConfig,
        notifications: Arc<dyn NotificationRepository>,
        users: Arc<dyn UserDirectory>,
        subscriptions: Arc<SubscriptionService>,
        mailboxes: Arc<MailboxService>,
        bus: Arc<EventBus>,
    ) -> Self {
        let renderers = RenderRegistry::with_tools(&config.installed_tools);
        Self {
            config,
            renderers,
            notifications,
            users,
            subscriptions,
            mailboxes,
            bus,
            notices: UserNotices::new(),
        }
    }

    /// Record an event on `artifact` and schedule its delivery.
    ///
    /// Fails with `Rendering` when the artifact's tool cannot render the
    /// event; nothing is stored or published in that case. If publishing
    /// fails the stored record is removed again and the error returned.
    pub async fn post(
        &self,
        ctx: &RequestContext,
        artifact: &ArtifactRef,
        kind: EventKind,
        fields: PostFields,
    ) -> Result<Notification> {
        ctx.check_scope(artifact)?;
        let actor = self.users.get_user(&ctx.user_id).await?;
        let rendered = self.render(artifact, kind, &actor, &fields)?;

        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            artifact: artifact.clone(),
            kind,
            topic: fields.topic,
            subject: rendered.subject,
            text: rendered.body,
            author_id: Some(actor.id.clone()),
            from_address: format!(
                "{} <{}@{}>",
                actor.display_name, actor.username, self.config.reply_domain
            ),
            reply_to: self.reply_address(artifact),
            created_at: Utc::now(),
        };

        self.notifications.insert(&notification).await?;
        let published = self.bus.publish(
            topics::NOTIFICATIONS,
            BusEvent::NotificationPosted {
                notification_id: notification.id.clone(),
                artifact_index: artifact.index_id(),
            },
        );
        if let Err(e) = published {
            warn!(
                notification_id = %notification.id,
                artifact = %artifact.index_id(),
                "Publish failed, discarding notification: {}",
                e
            );
            if let Err(cleanup) = self.notifications.delete(&notification.id).await {
                error!(
                    notification_id = %notification.id,
                    "Could not discard unpublished notification: {}",
                    cleanup
                );
            }
            return Err(e);
        }

        info!(
            notification_id = %notification.id,
            artifact = %artifact.index_id(),
            kind = %kind,
            "Notification posted"
        );
        Ok(notification)
    }

    /// Queue a one-time notice for `user_id` about `artifact`.
    ///
    /// Bypasses subscriptions and mailboxes; the notice is returned once by
    /// [`Self::pop_user_notifications`].
    pub async fn post_user(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        artifact: &ArtifactRef,
        kind: EventKind,
        fields: PostFields,
    ) -> Result<UserNotice> {
        ctx.check_scope(artifact)?;
        let actor = self.users.get_user(&ctx.user_id).await?;
        let rendered = self.render(artifact, kind, &actor, &fields)?;

        let notice = UserNotice {
            subject: rendered.subject,
            text: rendered.body,
            created_at: Utc::now(),
        };
        self.notices.push(user_id, notice.clone());
        debug!(user_id = %user_id, artifact = %artifact.index_id(), "User notice queued");
        Ok(notice)
    }

    /// Return and forget the pending notices of `user_id`.
    pub fn pop_user_notifications(&self, user_id: &str) -> Vec<UserNotice> {
        self.notices.pop(user_id)
    }

    /// Enqueue a stored notification into every resolved subscriber's mailbox.
    ///
    /// An error from any mailbox is returned after every subscriber has been
    /// tried, so the bus redelivers; mailboxes ignore repeats.
    pub async fn deliver(&self, notification_id: &str) -> Result<DeliveryReport> {
        let notification = match self.notifications.get(notification_id).await {
            Ok(n) => n,
            Err(Error::NotFound { .. }) => {
                warn!(notification_id = %notification_id, "Notification vanished before delivery");
                return Ok(DeliveryReport::default());
            }
            Err(e) => return Err(e),
        };

        let subscribers = self
            .subscriptions
            .resolve(&notification.artifact, notification.topic.as_deref())
            .await?;

        let mut report = DeliveryReport {
            subscribers: subscribers.len(),
            ..Default::default()
        };
        let mut first_error = None;

        for subscription in &subscribers {
            match self.mailboxes.enqueue(subscription, &notification).await {
                Ok(EnqueueOutcome::Queued) => report.queued += 1,
                Ok(EnqueueOutcome::Sent) => report.sent += 1,
                Ok(EnqueueOutcome::SendFailed) => report.send_failed += 1,
                Ok(EnqueueOutcome::Duplicate) => report.duplicates += 1,
                Ok(EnqueueOutcome::Dropped) => report.dropped += 1,
                Err(e) => {
                    error!(
                        notification_id = %notification.id,
                        subscription_id = %subscription.id,
                        "Failed to enqueue notification: {}",
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        debug!(
            notification_id = %notification.id,
            subscribers = report.subscribers,
            queued = report.queued,
            sent = report.sent,
            "Notification delivered to mailboxes"
        );
        Ok(report)
    }

    fn render(
        &self,
        artifact: &ArtifactRef,
        kind: EventKind,
        actor: &UserProfile,
        fields: &PostFields,
    ) -> Result<Rendered> {
        self.renderers
            .render(&RenderInput {
                artifact,
                kind,
                actor,
                fields,
            })
            .inspect_err(|e| {
                warn!(
                    artifact = %artifact.index_id(),
                    kind = %kind,
                    "Dropping event that cannot be rendered: {}",
                    e
                );
            })
    }

    /// `Home@wiki.test.p`
    fn reply_address(&self, artifact: &ArtifactRef) -> String {
        let local: String = artifact
            .title
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .collect();
        format!(
            "{}@{}.{}.{}",
            local, artifact.mount_point, artifact.project_shortname, self.config.reply_domain
        )
    }
}

#[async_trait]
impl EventHandler for NotificationService {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        match &envelope.event {
            BusEvent::NotificationPosted {
                notification_id, ..
            } => self.deliver(notification_id).await.map(|_| ()),
        }
    }
}
