//! Mailboxes keyed by id, each behind its own lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::model::Mailbox;
use crate::subscription::Subscription;

pub type MailboxHandle = Arc<Mutex<Mailbox>>;

/// Mailboxes for different subscriptions never share a lock.
#[derive(Default)]
pub struct MailboxStore {
    mailboxes: DashMap<String, MailboxHandle>,
}

impl MailboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mailbox of `subscription`, created on first use.
    pub fn get_or_create(&self, subscription: &Subscription, now: DateTime<Utc>) -> MailboxHandle {
        self.mailboxes
            .entry(subscription.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Mailbox::for_subscription(subscription, now))))
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<MailboxHandle> {
        self.mailboxes.get(id).map(|m| Arc::clone(m.value()))
    }

    pub fn ids(&self) -> Vec<String> {
        self.mailboxes.iter().map(|m| m.key().clone()).collect()
    }

    /// Remove `id` only if it still maps to `handle`.
    ///
    /// The caller holds the mailbox lock and has marked it removed.
    pub fn remove_if_current(&self, id: &str, handle: &MailboxHandle) -> bool {
        self.mailboxes
            .remove_if(id, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeliveryMode;
    use crate::subscription::SubscriptionScope;

    #[tokio::test]
    async fn test_get_or_create_returns_same_mailbox() {
        let store = MailboxStore::new();
        let sub = Subscription::new(
            "u1",
            SubscriptionScope::tool("p1", "ac1"),
            DeliveryMode::Digest,
            None,
        );
        let now = Utc::now();

        let a = store.get_or_create(&sub, now);
        a.lock().await.push("n1", now);
        let b = store.get_or_create(&sub, now);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.lock().await.queue.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_if_current_ignores_replaced_handle() {
        let store = MailboxStore::new();
        let sub = Subscription::new(
            "u1",
            SubscriptionScope::tool("p1", "ac1"),
            DeliveryMode::Digest,
            None,
        );
        let now = Utc::now();

        let stale = store.get_or_create(&sub, now);
        assert!(store.remove_if_current(&sub.id, &stale));
        let fresh = store.get_or_create(&sub, now);
        assert!(!store.remove_if_current(&sub.id, &stale));
        assert!(store.get(&sub.id).is_some());
        assert!(store.remove_if_current(&sub.id, &fresh));
        assert!(store.is_empty());
    }
}
