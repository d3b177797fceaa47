//! User subscriptions to tools, threads and artifacts.

pub mod model;
pub mod repository;
pub mod service;

pub use model::{Subscription, SubscriptionKey, SubscriptionScope, SubscriptionTarget};
pub use repository::{InMemorySubscriptionRepository, SubscriptionRepository};
pub use service::SubscriptionService;
