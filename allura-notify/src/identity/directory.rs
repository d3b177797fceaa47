//! User lookup.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// What the pipeline needs to know about a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub display_name: String,
    /// Delivery address; users without one cannot receive mail.
    pub email: Option<String>,
}

impl UserProfile {
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        display_name: impl Into<String>,
        email: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            display_name: display_name.into(),
            email,
        }
    }
}

/// Resolves user ids to profiles. Backed by the application's identity store.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<UserProfile>;
}

/// Directory held in memory.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<String, UserProfile>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: UserProfile) {
        self.users.insert(profile.id.clone(), profile);
    }

    pub fn remove(&self, user_id: &str) -> Option<UserProfile> {
        self.users.remove(user_id).map(|(_, p)| p)
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user(&self, user_id: &str) -> Result<UserProfile> {
        self.users
            .get(user_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| Error::not_found("User", user_id))
    }
}
