//! allura-notify library crate.
//!
//! Subscription and mailbox delivery of artifact notifications: events are
//! posted, fanned out over the bus to subscribers' mailboxes, and delivered
//! directly or batched into digests and summaries by the scheduler.

pub mod bus;
pub mod config;
pub mod domain;
pub mod error;
pub mod identity;
pub mod logging;
pub mod mailbox;
pub mod notification;
pub mod pipeline;
pub mod scheduler;
pub mod subscription;
pub mod transport;

pub use error::{Error, Result};
pub use pipeline::{NotifyPipeline, PipelineDeps, PipelineStats};
