//! Periodic mailbox sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::mailbox::{MailboxService, SweepReport};

/// Configuration for the delivery scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between two sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Fires due mailboxes on a fixed cadence.
pub struct DeliveryScheduler {
    mailboxes: Arc<MailboxService>,
    config: SchedulerConfig,
    cancellation_token: CancellationToken,
}

impl DeliveryScheduler {
    pub fn new(
        mailboxes: Arc<MailboxService>,
        config: SchedulerConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            mailboxes,
            config,
            cancellation_token,
        }
    }

    /// One sweep over every mailbox.
    pub async fn run_once(&self) -> SweepReport {
        self.mailboxes
            .fire_ready(Utc::now(), &self.cancellation_token)
            .await
    }

    /// Start the sweep loop. The first sweep runs immediately.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.config.sweep_interval().as_secs(),
                "Delivery scheduler started"
            );
            let mut interval = tokio::time::interval(self.config.sweep_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = self.cancellation_token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                // Not a select branch: a flush in progress is never interrupted.
                let report = self.run_once().await;
                if report.cancelled {
                    break;
                }
            }
            debug!("Delivery scheduler stopped");
        })
    }

    /// Stop after the mailbox currently being flushed.
    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
