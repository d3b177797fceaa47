//! Domain value objects shared by every pipeline stage.

pub mod artifact;
pub mod context;
pub mod delivery_mode;

pub use artifact::{ArtifactRef, EventKind, ToolKind};
pub use context::RequestContext;
pub use delivery_mode::DeliveryMode;
