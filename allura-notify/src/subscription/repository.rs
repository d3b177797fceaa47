//! Subscription storage.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::model::{Subscription, SubscriptionKey};
use crate::{Error, Result};

/// Storage for subscriptions, unique per [`SubscriptionKey`].
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Insert `candidate`, or update the mode of the subscription already
    /// stored under the same key. Returns the stored subscription.
    async fn upsert(&self, candidate: Subscription) -> Result<Subscription>;

    async fn get(&self, id: &str) -> Result<Subscription>;

    async fn get_by_key(&self, key: &SubscriptionKey) -> Result<Option<Subscription>>;

    /// Remove and return the subscription stored under `key`.
    async fn delete_by_key(&self, key: &SubscriptionKey) -> Result<Option<Subscription>>;

    /// Every subscription attached to one tool installation.
    async fn list_for_tool(&self, project_id: &str, app_config_id: &str)
    -> Result<Vec<Subscription>>;

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Subscription>>;
}

/// Subscription repository held in memory.
///
/// Uniqueness is enforced under the shard lock of the key map.
#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    by_key: DashMap<SubscriptionKey, Subscription>,
    keys_by_id: DashMap<String, SubscriptionKey>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn upsert(&self, candidate: Subscription) -> Result<Subscription> {
        let stored = match self.by_key.entry(candidate.key()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if existing.mode != candidate.mode {
                    existing.mode = candidate.mode;
                    existing.updated_at = Utc::now();
                }
                existing.clone()
            }
            Entry::Vacant(entry) => {
                self.keys_by_id
                    .insert(candidate.id.clone(), entry.key().clone());
                entry.insert(candidate).clone()
            }
        };
        Ok(stored)
    }

    async fn get(&self, id: &str) -> Result<Subscription> {
        let key = self
            .keys_by_id
            .get(id)
            .map(|k| k.value().clone())
            .ok_or_else(|| Error::not_found("Subscription", id))?;
        self.by_key
            .get(&key)
            .map(|s| s.value().clone())
            .ok_or_else(|| Error::not_found("Subscription", id))
    }

    async fn get_by_key(&self, key: &SubscriptionKey) -> Result<Option<Subscription>> {
        Ok(self.by_key.get(key).map(|s| s.value().clone()))
    }

    async fn delete_by_key(&self, key: &SubscriptionKey) -> Result<Option<Subscription>> {
        let removed = self.by_key.remove(key).map(|(_, s)| s);
        if let Some(subscription) = &removed {
            self.keys_by_id.remove(&subscription.id);
        }
        Ok(removed)
    }

    async fn list_for_tool(
        &self,
        project_id: &str,
        app_config_id: &str,
    ) -> Result<Vec<Subscription>> {
        Ok(self
            .by_key
            .iter()
            .filter(|s| s.project_id == project_id && s.app_config_id == app_config_id)
            .map(|s| s.value().clone())
            .collect())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        let mut subscriptions: Vec<Subscription> = self
            .by_key
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.value().clone())
            .collect();
        subscriptions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(subscriptions)
    }
}
