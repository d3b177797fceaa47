//! Notifications: what happened to which artifact.
//!
//! A notification is rendered once by the artifact's tool, stored, and then
//! referenced by every subscriber's mailbox.

mod model;
mod notices;
mod render;
mod service;

pub use model::{InMemoryNotificationRepository, Notification, NotificationRepository, PostFields};
pub use notices::{UserNotice, UserNotices};
pub use render::{
    DiscussionRenderer, RenderInput, RenderRegistry, Renderable, Rendered, ToolRenderer,
    TrackerRenderer, WikiRenderer,
};
pub use service::{DeliveryReport, NotificationConfig, NotificationService};
