//! Subscribe, unsubscribe and subscriber resolution.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::model::{Subscription, SubscriptionKey, SubscriptionScope};
use super::repository::SubscriptionRepository;
use crate::domain::{ArtifactRef, DeliveryMode, RequestContext};
use crate::identity::AccessControl;
use crate::mailbox::MailboxService;
use crate::{Error, Result};

pub struct SubscriptionService {
    repository: Arc<dyn SubscriptionRepository>,
    access: Arc<dyn AccessControl>,
    mailboxes: Arc<MailboxService>,
}

impl SubscriptionService {
    pub fn new(
        repository: Arc<dyn SubscriptionRepository>,
        access: Arc<dyn AccessControl>,
        mailboxes: Arc<MailboxService>,
    ) -> Self {
        Self {
            repository,
            access,
            mailboxes,
        }
    }

    /// Subscribe the acting user to `scope`.
    ///
    /// Subscribing again under the same key updates the mode of the existing
    /// subscription. Fails with `PermissionDenied` and writes nothing when the
    /// user cannot read the target.
    pub async fn subscribe(
        &self,
        ctx: &RequestContext,
        scope: SubscriptionScope,
        mode: DeliveryMode,
        topic: Option<String>,
    ) -> Result<Subscription> {
        check_context(ctx, &scope)?;

        if !self.access.can_read(&ctx.user_id, &scope).await? {
            warn!(
                user_id = %ctx.user_id,
                target = %scope.describe(),
                "Subscription rejected: no read access"
            );
            return Err(Error::PermissionDenied {
                user_id: ctx.user_id.clone(),
                target: scope.describe(),
            });
        }

        let target = scope.describe();
        let stored = self
            .repository
            .upsert(Subscription::new(ctx.user_id.clone(), scope, mode, topic))
            .await?;

        info!(
            subscription_id = %stored.id,
            user_id = %stored.user_id,
            target = %target,
            mode = %stored.mode,
            "Subscribed"
        );
        Ok(stored)
    }

    /// Remove the acting user's subscription to `scope`.
    ///
    /// Returns whether a subscription existed. Its mailbox is purged if
    /// empty, otherwise purged after its last flush.
    pub async fn unsubscribe(
        &self,
        ctx: &RequestContext,
        scope: SubscriptionScope,
        topic: Option<String>,
    ) -> Result<bool> {
        let key = SubscriptionKey {
            user_id: ctx.user_id.clone(),
            scope,
            topic,
        };

        let Some(removed) = self.repository.delete_by_key(&key).await? else {
            debug!(user_id = %ctx.user_id, target = %key.scope.describe(), "Nothing to unsubscribe");
            return Ok(false);
        };

        let purged = self.mailboxes.detach(&removed.id).await;
        info!(
            subscription_id = %removed.id,
            user_id = %removed.user_id,
            mailbox_purged = purged,
            "Unsubscribed"
        );
        Ok(true)
    }

    /// Subscriptions that should receive a notification about `artifact`.
    ///
    /// At most one subscription per user: the most specific target wins, and
    /// at equal specificity a topic-filtered subscription beats a catch-all.
    pub async fn resolve(
        &self,
        artifact: &ArtifactRef,
        topic: Option<&str>,
    ) -> Result<Vec<Subscription>> {
        let candidates = self
            .repository
            .list_for_tool(&artifact.project_id, &artifact.app_config_id)
            .await?;

        let mut best: HashMap<String, Subscription> = HashMap::new();
        for subscription in candidates
            .into_iter()
            .filter(|s| s.matches(artifact, topic))
        {
            match best.get(&subscription.user_id) {
                Some(current) if precedence(current) >= precedence(&subscription) => {}
                _ => {
                    best.insert(subscription.user_id.clone(), subscription);
                }
            }
        }

        let mut resolved: Vec<Subscription> = best.into_values().collect();
        resolved.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(resolved)
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        self.repository.list_for_user(user_id).await
    }

    pub async fn get(&self, id: &str) -> Result<Subscription> {
        self.repository.get(id).await
    }
}

fn precedence(subscription: &Subscription) -> (u8, bool) {
    (
        subscription.target.specificity(),
        subscription.topic.is_some(),
    )
}

fn check_context(ctx: &RequestContext, scope: &SubscriptionScope) -> Result<()> {
    if ctx.project_id != scope.project_id || ctx.app_config_id != scope.app_config_id {
        return Err(Error::validation(format!(
            "subscription target {} is outside the request context {}/{}",
            scope.describe(),
            ctx.project_id,
            ctx.app_config_id
        )));
    }
    Ok(())
}
