//! Artifact references and event kinds.

use serde::{Deserialize, Serialize};

/// The tool an artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Wiki pages.
    Wiki,
    /// Tracker tickets.
    Tracker,
    /// Discussion forum posts.
    Discussion,
}

impl ToolKind {
    /// All known tool kinds.
    pub const ALL: [ToolKind; 3] = [ToolKind::Wiki, ToolKind::Tracker, ToolKind::Discussion];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wiki => "wiki",
            Self::Tracker => "tracker",
            Self::Discussion => "discussion",
        }
    }

    /// Human label used when describing an artifact of this tool.
    pub fn artifact_label(&self) -> &'static str {
        match self {
            Self::Wiki => "WikiPage",
            Self::Tracker => "Ticket",
            Self::Discussion => "ForumPost",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Fields of the artifact changed.
    Metadata,
    /// A message was posted to the artifact's discussion thread.
    Message,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Message => "message",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a trackable artifact owned by a tool installed in a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub project_id: String,
    /// Short project name used in subjects and reply addresses.
    pub project_shortname: String,
    /// Id of the tool installation (app config) inside the project.
    pub app_config_id: String,
    pub tool: ToolKind,
    /// Where the tool is mounted in the project, e.g. `wiki`.
    pub mount_point: String,
    pub artifact_id: String,
    pub title: String,
    /// Discussion thread attached to the artifact, if any.
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl ArtifactRef {
    /// Stable index id, unique across projects.
    pub fn index_id(&self) -> String {
        format!(
            "{}/{}/{}",
            self.project_shortname, self.mount_point, self.artifact_id
        )
    }

    /// Human description such as `WikiPage Home`.
    pub fn display_ref(&self) -> String {
        format!("{} {}", self.tool.artifact_label(), self.title)
    }

    /// Subject prefix such as `[test:wiki]`.
    pub fn subject_prefix(&self) -> String {
        format!("[{}:{}]", self.project_shortname, self.mount_point)
    }

    /// Attach a discussion thread.
    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}
