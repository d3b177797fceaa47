//! Per-tool rendering of notification subjects and bodies.

use std::collections::HashMap;

use crate::domain::{ArtifactRef, EventKind, ToolKind};
use crate::identity::UserProfile;
use crate::{Error, Result};

use super::PostFields;

/// Everything a renderer may look at.
#[derive(Debug, Clone, Copy)]
pub struct RenderInput<'a> {
    pub artifact: &'a ArtifactRef,
    pub kind: EventKind,
    pub actor: &'a UserProfile,
    pub fields: &'a PostFields,
}

impl RenderInput<'_> {
    /// `WikiPage Home modified by Test Admin`
    fn modified_line(&self) -> String {
        format!(
            "{} modified by {}",
            self.artifact.display_ref(),
            self.actor.display_name
        )
    }

    fn message_text(&self) -> &str {
        self.fields.text.as_deref().unwrap_or_default()
    }
}

/// Subject and body rendering for one tool.
pub trait Renderable {
    fn subject(&self, input: &RenderInput<'_>) -> String;
    fn body(&self, input: &RenderInput<'_>) -> String;
}

/// Metadata body shared by every tool: the change line, then the free text.
fn metadata_body(input: &RenderInput<'_>) -> String {
    match input.fields.text.as_deref() {
        Some(text) if !text.is_empty() => format!("{}\n\n{}", input.modified_line(), text),
        _ => input.modified_line(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WikiRenderer;

impl Renderable for WikiRenderer {
    fn subject(&self, input: &RenderInput<'_>) -> String {
        match input.kind {
            EventKind::Metadata => input.modified_line(),
            EventKind::Message => format!("Re: {}", input.artifact.display_ref()),
        }
    }

    fn body(&self, input: &RenderInput<'_>) -> String {
        match input.kind {
            EventKind::Metadata => metadata_body(input),
            EventKind::Message => input.message_text().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TrackerRenderer;

impl Renderable for TrackerRenderer {
    fn subject(&self, input: &RenderInput<'_>) -> String {
        let artifact = input.artifact;
        match input.kind {
            EventKind::Metadata => format!(
                "#{} {} modified by {}",
                artifact.artifact_id, artifact.title, input.actor.display_name
            ),
            EventKind::Message => format!("Re: #{} {}", artifact.artifact_id, artifact.title),
        }
    }

    fn body(&self, input: &RenderInput<'_>) -> String {
        match input.kind {
            EventKind::Metadata => metadata_body(input),
            EventKind::Message => format!(
                "Comment on ticket #{}:\n\n{}",
                input.artifact.artifact_id,
                input.message_text()
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiscussionRenderer;

impl Renderable for DiscussionRenderer {
    fn subject(&self, input: &RenderInput<'_>) -> String {
        match input.kind {
            EventKind::Metadata => input.modified_line(),
            EventKind::Message => format!("Re: {}", input.artifact.title),
        }
    }

    fn body(&self, input: &RenderInput<'_>) -> String {
        match input.kind {
            EventKind::Metadata => metadata_body(input),
            EventKind::Message => format!(
                "{} wrote:\n\n{}",
                input.actor.display_name,
                input.message_text()
            ),
        }
    }
}

/// Renderer for one tool, dispatched statically on the tool kind.
#[derive(Debug, Clone, Copy)]
pub enum ToolRenderer {
    Wiki(WikiRenderer),
    Tracker(TrackerRenderer),
    Discussion(DiscussionRenderer),
}

impl ToolRenderer {
    pub fn for_tool(tool: ToolKind) -> Self {
        match tool {
            ToolKind::Wiki => Self::Wiki(WikiRenderer),
            ToolKind::Tracker => Self::Tracker(TrackerRenderer),
            ToolKind::Discussion => Self::Discussion(DiscussionRenderer),
        }
    }

    pub fn tool(&self) -> ToolKind {
        match self {
            Self::Wiki(_) => ToolKind::Wiki,
            Self::Tracker(_) => ToolKind::Tracker,
            Self::Discussion(_) => ToolKind::Discussion,
        }
    }
}

impl Renderable for ToolRenderer {
    fn subject(&self, input: &RenderInput<'_>) -> String {
        match self {
            Self::Wiki(r) => r.subject(input),
            Self::Tracker(r) => r.subject(input),
            Self::Discussion(r) => r.subject(input),
        }
    }

    fn body(&self, input: &RenderInput<'_>) -> String {
        match self {
            Self::Wiki(r) => r.body(input),
            Self::Tracker(r) => r.body(input),
            Self::Discussion(r) => r.body(input),
        }
    }
}

/// A rendered subject and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub body: String,
}

/// Renderers for the tools installed in this deployment.
#[derive(Debug, Clone, Default)]
pub struct RenderRegistry {
    renderers: HashMap<ToolKind, ToolRenderer>,
}

impl RenderRegistry {
    /// An empty registry; every render fails until tools are installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the given tools installed.
    pub fn with_tools(tools: &[ToolKind]) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            registry.install(ToolRenderer::for_tool(*tool));
        }
        registry
    }

    pub fn install(&mut self, renderer: ToolRenderer) {
        self.renderers.insert(renderer.tool(), renderer);
    }

    pub fn is_installed(&self, tool: ToolKind) -> bool {
        self.renderers.contains_key(&tool)
    }

    /// Render subject and body, with the `[project:tool]` subject prefix.
    pub fn render(&self, input: &RenderInput<'_>) -> Result<Rendered> {
        let renderer = self.renderers.get(&input.artifact.tool).ok_or_else(|| {
            Error::rendering(format!(
                "no renderer installed for tool {}",
                input.artifact.tool
            ))
        })?;

        if input.kind == EventKind::Message
            && input.fields.text.as_deref().is_none_or(str::is_empty)
        {
            return Err(Error::rendering(format!(
                "message event on {} has no text",
                input.artifact.index_id()
            )));
        }

        let subject = match input.fields.subject.as_deref() {
            Some(custom) if !custom.trim().is_empty() => custom.trim().to_string(),
            _ => renderer.subject(input),
        };

        Ok(Rendered {
            subject: format!("{} {}", input.artifact.subject_prefix(), subject),
            body: renderer.body(input),
        })
    }
}
