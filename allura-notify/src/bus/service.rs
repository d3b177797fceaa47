//! Topic outbox with at-least-once handling.
//!
//! Each topic keeps its pending envelopes in FIFO order. A consumer holds the
//! topic's lease while draining, hands the head envelope to the registered
//! handler, and only removes it once the handler acknowledges. A handler
//! error, a panic that unwinds the consumer, or a dropped handling future all
//! leave the envelope at the head, to be handed out again.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event::{BusEvent, EventEnvelope};
use crate::{Error, Result};

/// Configuration for the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Maximum pending envelopes per topic.
    pub max_queue_size: usize,
    /// Handling attempts before an envelope is dead-lettered.
    pub max_attempts: u32,
    /// Initial consumer backoff after a failed drain, in milliseconds.
    pub initial_retry_delay_ms: u64,
    /// Maximum consumer backoff, in milliseconds.
    pub max_retry_delay_ms: u64,
    /// How often the consumer drains without being woken, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            max_attempts: 5,
            initial_retry_delay_ms: 500,
            max_retry_delay_ms: 30_000,
            poll_interval_ms: 1_000,
        }
    }
}

impl EventBusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Consumer of one topic.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an envelope. Returning `Ok` acknowledges it.
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()>;
}

/// Outcome of draining one or more topics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Envelopes acknowledged.
    pub handled: usize,
    /// Handling attempts that failed.
    pub failed: usize,
    /// Envelopes moved to the dead-letter map.
    pub dead_lettered: usize,
}

impl DrainReport {
    fn merge(&mut self, other: DrainReport) {
        self.handled += other.handled;
        self.failed += other.failed;
        self.dead_lettered += other.dead_lettered;
    }
}

/// Bus statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusStats {
    /// Pending envelopes per topic.
    pub pending: HashMap<String, usize>,
    pub dead_letter_count: usize,
}

enum FailureOutcome {
    Retained(u32),
    DeadLettered(EventEnvelope),
}

struct TopicQueue {
    pending: Mutex<VecDeque<EventEnvelope>>,
    /// Held by whoever is draining the topic.
    consumer: tokio::sync::Mutex<()>,
}

impl TopicQueue {
    fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            consumer: tokio::sync::Mutex::new(()),
        }
    }

    fn push(&self, envelope: EventEnvelope, max_queue_size: usize) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.len() >= max_queue_size {
            return Err(Error::validation(format!(
                "topic {} is full ({} pending)",
                envelope.topic,
                pending.len()
            )));
        }
        pending.push_back(envelope);
        Ok(())
    }

    fn head(&self) -> Option<EventEnvelope> {
        self.pending.lock().front().cloned()
    }

    fn ack(&self, id: u64) -> bool {
        let mut pending = self.pending.lock();
        if pending.front().map(|e| e.id) == Some(id) {
            pending.pop_front();
            true
        } else {
            false
        }
    }

    fn record_failure(&self, id: u64, error: String, max_attempts: u32) -> Option<FailureOutcome> {
        let mut pending = self.pending.lock();
        let front = pending.front_mut().filter(|e| e.id == id)?;
        front.attempts += 1;
        front.last_error = Some(error);
        if front.attempts >= max_attempts {
            pending.pop_front().map(FailureOutcome::DeadLettered)
        } else {
            Some(FailureOutcome::Retained(front.attempts))
        }
    }

    fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// In-process event bus.
pub struct EventBus {
    config: EventBusConfig,
    topics: DashMap<String, Arc<TopicQueue>>,
    handlers: RwLock<HashMap<String, Arc<dyn EventHandler>>>,
    dead_letters: DashMap<u64, EventEnvelope>,
    next_id: AtomicU64,
    wakeup: Notify,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            config,
            topics: DashMap::new(),
            handlers: RwLock::new(HashMap::new()),
            dead_letters: DashMap::new(),
            next_id: AtomicU64::new(1),
            wakeup: Notify::new(),
        }
    }

    fn topic(&self, name: &str) -> Arc<TopicQueue> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TopicQueue::new()))
            .value()
            .clone()
    }

    /// Register the consumer of `topic`, replacing any previous one.
    pub fn register_handler(&self, topic: &str, handler: Arc<dyn EventHandler>) {
        if self
            .handlers
            .write()
            .insert(topic.to_string(), handler)
            .is_some()
        {
            warn!(topic = %topic, "Replaced existing event handler");
        }
    }

    /// Append an event to `topic`. Returns the envelope id.
    pub fn publish(&self, topic: &str, event: BusEvent) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event_type = event.event_type();
        self.topic(topic)
            .push(EventEnvelope::new(id, topic, event), self.config.max_queue_size)?;
        debug!(topic = %topic, event_id = id, event_type, "Event published");
        self.wakeup.notify_one();
        Ok(id)
    }

    /// Drain `topic` until it is empty or its head fails.
    pub async fn handle(&self, topic: &str) -> DrainReport {
        let mut report = DrainReport::default();

        let Some(queue) = self.topics.get(topic).map(|q| q.value().clone()) else {
            return report;
        };
        let Some(handler) = self.handlers.read().get(topic).cloned() else {
            if queue.len() > 0 {
                warn!(topic = %topic, pending = queue.len(), "No handler registered for topic");
            }
            return report;
        };

        let _lease = queue.consumer.lock().await;

        while let Some(envelope) = queue.head() {
            match handler.handle(&envelope).await {
                Ok(()) => {
                    queue.ack(envelope.id);
                    report.handled += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    match queue.record_failure(envelope.id, e.to_string(), self.config.max_attempts)
                    {
                        Some(FailureOutcome::DeadLettered(dead)) => {
                            warn!(
                                topic = %topic,
                                event_id = dead.id,
                                attempts = dead.attempts,
                                "Event dead-lettered: {}",
                                e
                            );
                            self.dead_letters.insert(dead.id, dead);
                            report.dead_lettered += 1;
                        }
                        Some(FailureOutcome::Retained(attempts)) => {
                            warn!(
                                topic = %topic,
                                event_id = envelope.id,
                                attempts,
                                "Event handling failed, will retry: {}",
                                e
                            );
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        report
    }

    /// Drain every topic once.
    pub async fn handle_all(&self) -> DrainReport {
        let topics: Vec<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        let mut report = DrainReport::default();
        for topic in topics {
            report.merge(self.handle(&topic).await);
        }
        report
    }

    /// Pending envelopes on `topic`.
    pub fn pending_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|q| q.len()).unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<EventEnvelope> {
        let mut entries: Vec<EventEnvelope> =
            self.dead_letters.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    /// Put a dead-lettered envelope back at the tail of its topic.
    pub fn retry_dead_letter(&self, id: u64) -> Result<()> {
        let Some((_, mut envelope)) = self.dead_letters.remove(&id) else {
            return Err(Error::not_found("DeadLetter", id.to_string()));
        };
        envelope.attempts = 0;
        envelope.last_error = None;
        let topic = envelope.topic.clone();
        self.topic(&topic).push(envelope, self.config.max_queue_size)?;
        self.wakeup.notify_one();
        Ok(())
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            pending: self
                .topics
                .iter()
                .map(|e| (e.key().clone(), e.value().len()))
                .collect(),
            dead_letter_count: self.dead_letters.len(),
        }
    }

    /// Backoff with jitter after `failures` consecutive failed drains.
    fn retry_delay(&self, failures: u32) -> Duration {
        let base = self.config.initial_retry_delay_ms;
        let delay_ms = base
            .saturating_mul(2u64.saturating_pow(failures))
            .min(self.config.max_retry_delay_ms);

        // ±25%
        let jitter_range = delay_ms / 4;
        let delay_ms = if jitter_range > 0 {
            let offset = rand::random::<u64>() % (jitter_range * 2);
            delay_ms - jitter_range + offset
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }

    /// Spawn the continuous consumer.
    ///
    /// Drains on every publish and on each poll tick, and backs off while
    /// handlers keep failing. A drain in progress always runs to completion.
    pub fn run(self: &Arc<Self>, cancellation_token: CancellationToken) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            info!("Event bus consumer started");
            let mut consecutive_failures = 0u32;

            loop {
                let report = bus.handle_all().await;

                let delay = if report.failed > 0 {
                    let delay = bus.retry_delay(consecutive_failures);
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    delay
                } else {
                    consecutive_failures = 0;
                    bus.config.poll_interval()
                };

                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        debug!("Event bus consumer shutting down");
                        break;
                    }
                    _ = bus.wakeup.notified(), if report.failed == 0 => {}
                    _ = sleep(delay) => {}
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
