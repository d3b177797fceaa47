//! Per-subscription mailboxes and their delivery.
//!
//! Every mutation of a mailbox, an enqueue or a whole flush, runs under
//! that mailbox's own lock. Mailboxes never share a lock.

mod compose;
mod model;
mod service;
mod store;

pub use compose::{ComposedMessage, compose, excerpt};
pub use model::{Mailbox, QueuedNotification};
pub use service::{EnqueueOutcome, MailboxConfig, MailboxService, MailboxStats, SweepReport};
pub use store::{MailboxHandle, MailboxStore};
