//! Subscription records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ArtifactRef, DeliveryMode};

/// What a subscription is attached to inside a tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionTarget {
    /// Every artifact of the tool.
    Tool,
    /// One discussion thread.
    Thread { thread_id: String },
    /// One artifact.
    Artifact { artifact_id: String },
}

impl SubscriptionTarget {
    /// Higher is more specific.
    pub fn specificity(&self) -> u8 {
        match self {
            Self::Tool => 0,
            Self::Thread { .. } => 1,
            Self::Artifact { .. } => 2,
        }
    }

    /// Whether an event on `artifact` falls under this target.
    ///
    /// The caller is responsible for matching project and tool.
    pub fn covers(&self, artifact: &ArtifactRef) -> bool {
        match self {
            Self::Tool => true,
            Self::Thread { thread_id } => artifact.thread_id.as_deref() == Some(thread_id.as_str()),
            Self::Artifact { artifact_id } => *artifact_id == artifact.artifact_id,
        }
    }
}

/// Tool plus target; the thing a user subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionScope {
    pub project_id: String,
    pub app_config_id: String,
    pub target: SubscriptionTarget,
}

impl SubscriptionScope {
    /// The whole tool.
    pub fn tool(project_id: impl Into<String>, app_config_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            app_config_id: app_config_id.into(),
            target: SubscriptionTarget::Tool,
        }
    }

    /// A single artifact.
    pub fn artifact(artifact: &ArtifactRef) -> Self {
        Self {
            project_id: artifact.project_id.clone(),
            app_config_id: artifact.app_config_id.clone(),
            target: SubscriptionTarget::Artifact {
                artifact_id: artifact.artifact_id.clone(),
            },
        }
    }

    /// The discussion thread attached to `artifact`, if it has one.
    pub fn thread_of(artifact: &ArtifactRef) -> Option<Self> {
        artifact.thread_id.as_ref().map(|thread_id| Self {
            project_id: artifact.project_id.clone(),
            app_config_id: artifact.app_config_id.clone(),
            target: SubscriptionTarget::Thread {
                thread_id: thread_id.clone(),
            },
        })
    }

    /// Short description used in logs and permission errors.
    pub fn describe(&self) -> String {
        match &self.target {
            SubscriptionTarget::Tool => format!("{}/{}", self.project_id, self.app_config_id),
            SubscriptionTarget::Thread { thread_id } => format!(
                "{}/{}/thread/{}",
                self.project_id, self.app_config_id, thread_id
            ),
            SubscriptionTarget::Artifact { artifact_id } => {
                format!("{}/{}/{}", self.project_id, self.app_config_id, artifact_id)
            }
        }
    }
}

/// Uniqueness key: at most one subscription exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub user_id: String,
    pub scope: SubscriptionScope,
    pub topic: Option<String>,
}

/// A user's standing interest in an artifact, thread or tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub project_id: String,
    pub app_config_id: String,
    pub target: SubscriptionTarget,
    /// Only notifications with this topic match, when set.
    pub topic: Option<String>,
    pub mode: DeliveryMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        user_id: impl Into<String>,
        scope: SubscriptionScope,
        mode: DeliveryMode,
        topic: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            project_id: scope.project_id,
            app_config_id: scope.app_config_id,
            target: scope.target,
            topic,
            mode,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn scope(&self) -> SubscriptionScope {
        SubscriptionScope {
            project_id: self.project_id.clone(),
            app_config_id: self.app_config_id.clone(),
            target: self.target.clone(),
        }
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey {
            user_id: self.user_id.clone(),
            scope: self.scope(),
            topic: self.topic.clone(),
        }
    }

    /// Whether a notification about `artifact` with `topic` should reach this subscription.
    pub fn matches(&self, artifact: &ArtifactRef, topic: Option<&str>) -> bool {
        if self.project_id != artifact.project_id || self.app_config_id != artifact.app_config_id {
            return false;
        }
        if let Some(wanted) = self.topic.as_deref() {
            if topic != Some(wanted) {
                return false;
            }
        }
        self.target.covers(artifact)
    }
}
