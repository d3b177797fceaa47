//! Notification records and their repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::domain::{ArtifactRef, EventKind};
use crate::{Error, Result};

/// Extra fields supplied by the producer of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostFields {
    /// Free text appended to the rendered body, or the message text.
    pub text: Option<String>,
    /// Topic used to filter topic-scoped subscriptions.
    pub topic: Option<String>,
    /// Replaces the generated subject (the `[project:tool]` prefix is kept).
    pub subject: Option<String>,
}

impl PostFields {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// What happened to which artifact, rendered once and shared by every mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub artifact: ArtifactRef,
    pub kind: EventKind,
    pub topic: Option<String>,
    pub subject: String,
    pub text: String,
    /// User whose action produced the event.
    pub author_id: Option<String>,
    pub from_address: String,
    pub reply_to: String,
    pub created_at: DateTime<Utc>,
}

/// Storage for notifications. Records are never updated.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Notification>;
    /// Fetch in the order of `ids`, skipping ids that no longer exist.
    async fn get_many(&self, ids: &[String]) -> Result<Vec<Notification>>;
    /// Remove a record that was never published. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// Notification repository held in memory.
#[derive(Default)]
pub struct InMemoryNotificationRepository {
    notifications: DashMap<String, Notification>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        if self.notifications.contains_key(&notification.id) {
            return Err(Error::validation(format!(
                "notification {} already exists",
                notification.id
            )));
        }
        self.notifications
            .insert(notification.id.clone(), notification.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Notification> {
        self.notifications
            .get(id)
            .map(|n| n.value().clone())
            .ok_or_else(|| Error::not_found("Notification", id))
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<Notification>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.notifications.get(id).map(|n| n.value().clone()))
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.notifications.remove(id).is_some())
    }
}
