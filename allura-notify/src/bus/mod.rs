//! Event bus between artifact producers and mailbox delivery.
//!
//! Delivery is at-least-once: an envelope leaves its topic only after the
//! handler acknowledges it. Topics are FIFO; there is no ordering across
//! topics.

mod event;
mod service;

pub use event::{BusEvent, EventEnvelope, topics};
pub use service::{BusStats, DrainReport, EventBus, EventBusConfig, EventHandler};
