//! In-session notices shown once to a single user.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A flash notice; never mailed, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNotice {
    pub subject: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Per-user notice queues.
#[derive(Default)]
pub struct UserNotices {
    by_user: DashMap<String, Vec<UserNotice>>,
}

impl UserNotices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, user_id: &str, notice: UserNotice) {
        self.by_user
            .entry(user_id.to_string())
            .or_default()
            .push(notice);
    }

    /// Take every pending notice for `user_id`, oldest first.
    pub fn pop(&self, user_id: &str) -> Vec<UserNotice> {
        self.by_user
            .remove(user_id)
            .map(|(_, notices)| notices)
            .unwrap_or_default()
    }

    pub fn pending(&self, user_id: &str) -> usize {
        self.by_user.get(user_id).map(|n| n.len()).unwrap_or(0)
    }
}
