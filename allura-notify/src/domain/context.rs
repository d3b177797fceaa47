//! Explicit request context.

use serde::{Deserialize, Serialize};

use super::ArtifactRef;
use crate::{Error, Result};

/// Who is acting, and inside which project tool.
///
/// Passed to every operation performed on behalf of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: String,
    pub project_id: String,
    pub app_config_id: String,
}

impl RequestContext {
    pub fn new(
        user_id: impl Into<String>,
        project_id: impl Into<String>,
        app_config_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
            app_config_id: app_config_id.into(),
        }
    }

    /// Context for acting on `artifact` as `user_id`.
    pub fn for_artifact(user_id: impl Into<String>, artifact: &ArtifactRef) -> Self {
        Self::new(user_id, &artifact.project_id, &artifact.app_config_id)
    }

    /// Reject artifacts that live outside this context's tool.
    pub fn check_scope(&self, artifact: &ArtifactRef) -> Result<()> {
        if artifact.project_id != self.project_id || artifact.app_config_id != self.app_config_id {
            return Err(Error::validation(format!(
                "artifact {} is outside project {} / tool {}",
                artifact.index_id(),
                self.project_id,
                self.app_config_id
            )));
        }
        Ok(())
    }
}
