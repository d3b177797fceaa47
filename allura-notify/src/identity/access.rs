//! Read-access checks and the provider registry.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::Result;
use crate::subscription::{SubscriptionScope, SubscriptionTarget};

/// Authorization check delegated to the host application.
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Whether `user_id` may read everything `scope` covers.
    async fn can_read(&self, user_id: &str, scope: &SubscriptionScope) -> Result<bool>;
}

/// Grants read access to everyone.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAccess;

#[async_trait]
impl AccessControl for OpenAccess {
    async fn can_read(&self, _user_id: &str, _scope: &SubscriptionScope) -> Result<bool> {
        Ok(true)
    }
}

/// A single read grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclGrant {
    pub user_id: String,
    pub project_id: String,
    pub app_config_id: String,
    /// Limits the grant to one artifact; `None` covers the whole tool.
    #[serde(default)]
    pub artifact_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GrantKey {
    project_id: String,
    app_config_id: String,
    artifact_id: Option<String>,
}

/// Explicit per-user grants.
///
/// A tool grant covers every artifact and thread of the tool. An artifact
/// grant covers that artifact only; thread and tool subscriptions need a
/// tool grant.
#[derive(Default)]
pub struct AclAccessControl {
    grants: DashMap<String, HashSet<GrantKey>>,
}

impl AclAccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_grants(grants: &[AclGrant]) -> Self {
        let acl = Self::new();
        for grant in grants {
            acl.grant(grant.clone());
        }
        acl
    }

    pub fn grant(&self, grant: AclGrant) {
        self.grants.entry(grant.user_id).or_default().insert(GrantKey {
            project_id: grant.project_id,
            app_config_id: grant.app_config_id,
            artifact_id: grant.artifact_id,
        });
    }

    pub fn revoke_all(&self, user_id: &str) {
        self.grants.remove(user_id);
    }
}

#[async_trait]
impl AccessControl for AclAccessControl {
    async fn can_read(&self, user_id: &str, scope: &SubscriptionScope) -> Result<bool> {
        let Some(grants) = self.grants.get(user_id) else {
            return Ok(false);
        };

        let tool_grant = GrantKey {
            project_id: scope.project_id.clone(),
            app_config_id: scope.app_config_id.clone(),
            artifact_id: None,
        };
        if grants.contains(&tool_grant) {
            return Ok(true);
        }

        match &scope.target {
            SubscriptionTarget::Artifact { artifact_id } => Ok(grants.contains(&GrantKey {
                artifact_id: Some(artifact_id.clone()),
                ..tool_grant
            })),
            SubscriptionTarget::Tool | SubscriptionTarget::Thread { .. } => Ok(false),
        }
    }
}

/// Which access provider to use; resolved once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessProviderConfig {
    /// Everyone may read everything.
    #[default]
    Open,
    /// Explicit grant list.
    Acl {
        #[serde(default)]
        grants: Vec<AclGrant>,
    },
}

impl AccessProviderConfig {
    pub fn provider_type(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acl { .. } => "acl",
        }
    }
}

/// Build the configured access provider.
pub fn build_access_control(config: &AccessProviderConfig) -> Arc<dyn AccessControl> {
    let provider: Arc<dyn AccessControl> = match config {
        AccessProviderConfig::Open => Arc::new(OpenAccess),
        AccessProviderConfig::Acl { grants } => Arc::new(AclAccessControl::from_grants(grants)),
    };
    info!("Access control provider: {}", config.provider_type());
    provider
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact_scope(id: &str) -> SubscriptionScope {
        SubscriptionScope {
            project_id: "p1".to_string(),
            app_config_id: "ac1".to_string(),
            target: SubscriptionTarget::Artifact {
                artifact_id: id.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_tool_grant_covers_artifacts() {
        let acl = AclAccessControl::new();
        acl.grant(AclGrant {
            user_id: "u1".to_string(),
            project_id: "p1".to_string(),
            app_config_id: "ac1".to_string(),
            artifact_id: None,
        });

        assert!(acl.can_read("u1", &artifact_scope("Home")).await.unwrap());
        assert!(acl.can_read("u1", &SubscriptionScope::tool("p1", "ac1")).await.unwrap());
        assert!(!acl.can_read("u2", &artifact_scope("Home")).await.unwrap());
    }

    #[tokio::test]
    async fn test_artifact_grant_is_narrow() {
        let acl = AclAccessControl::from_grants(&[AclGrant {
            user_id: "u1".to_string(),
            project_id: "p1".to_string(),
            app_config_id: "ac1".to_string(),
            artifact_id: Some("Home".to_string()),
        }]);

        assert!(acl.can_read("u1", &artifact_scope("Home")).await.unwrap());
        assert!(!acl.can_read("u1", &artifact_scope("Other")).await.unwrap());
        assert!(!acl.can_read("u1", &SubscriptionScope::tool("p1", "ac1")).await.unwrap());
    }

    #[test]
    fn test_provider_config_serde() {
        let config: AccessProviderConfig = serde_json::from_str(
            r#"{"type":"acl","grants":[{"user_id":"u1","project_id":"p1","app_config_id":"ac1"}]}"#,
        )
        .unwrap();
        assert_eq!(config.provider_type(), "acl");

        let config: AccessProviderConfig = serde_json::from_str(r#"{"type":"open"}"#).unwrap();
        assert_eq!(config.provider_type(), "open");
    }

    #[tokio::test]
    async fn test_build_open_provider() {
        let provider = build_access_control(&AccessProviderConfig::Open);
        assert!(provider.can_read("anyone", &artifact_scope("x")).await.unwrap());
    }
}
