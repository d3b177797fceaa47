//! Service container for the notification pipeline.
//!
//! Wires repositories, services, the bus consumer and the delivery
//! scheduler, and manages their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::bus::{BusStats, DrainReport, EventBus, topics};
use crate::config::PipelineConfig;
use crate::domain::{ArtifactRef, DeliveryMode, EventKind, RequestContext};
use crate::identity::{AccessControl, UserDirectory, build_access_control};
use crate::mailbox::{MailboxService, MailboxStats, SweepReport};
use crate::notification::{
    InMemoryNotificationRepository, Notification, NotificationRepository, NotificationService,
    PostFields, UserNotice,
};
use crate::scheduler::DeliveryScheduler;
use crate::subscription::{
    InMemorySubscriptionRepository, Subscription, SubscriptionRepository, SubscriptionScope,
    SubscriptionService,
};
use crate::transport::{MailTransport, build_transport};

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Collaborators supplied by the host application.
pub struct PipelineDeps {
    pub users: Arc<dyn UserDirectory>,
    pub access: Arc<dyn AccessControl>,
    pub transport: Arc<dyn MailTransport>,
}

/// Pipeline statistics.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub bus: BusStats,
    pub mailboxes: MailboxStats,
}

/// The assembled pipeline.
pub struct NotifyPipeline {
    pub bus: Arc<EventBus>,
    pub notifications: Arc<NotificationService>,
    pub subscriptions: Arc<SubscriptionService>,
    pub mailboxes: Arc<MailboxService>,
    pub scheduler: Arc<DeliveryScheduler>,
    config: PipelineConfig,
    cancellation_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NotifyPipeline {
    pub fn new(config: PipelineConfig, deps: PipelineDeps) -> Self {
        let notification_repo: Arc<dyn NotificationRepository> =
            Arc::new(InMemoryNotificationRepository::new());
        let subscription_repo: Arc<dyn SubscriptionRepository> =
            Arc::new(InMemorySubscriptionRepository::new());

        let bus = Arc::new(EventBus::with_config(config.bus.clone()));
        let mailboxes = Arc::new(MailboxService::new(
            config.mailbox.clone(),
            Arc::clone(&subscription_repo),
            Arc::clone(&notification_repo),
            Arc::clone(&deps.users),
            deps.transport,
        ));
        let subscriptions = Arc::new(SubscriptionService::new(
            subscription_repo,
            deps.access,
            Arc::clone(&mailboxes),
        ));
        let notifications = Arc::new(NotificationService::new(
            config.notification.clone(),
            notification_repo,
            deps.users,
            Arc::clone(&subscriptions),
            Arc::clone(&mailboxes),
            Arc::clone(&bus),
        ));
        bus.register_handler(topics::NOTIFICATIONS, notifications.clone());

        let cancellation_token = CancellationToken::new();
        let scheduler = Arc::new(DeliveryScheduler::new(
            Arc::clone(&mailboxes),
            config.scheduler.clone(),
            cancellation_token.child_token(),
        ));

        Self {
            bus,
            notifications,
            subscriptions,
            mailboxes,
            scheduler,
            config,
            cancellation_token,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Build with the transport and access providers named in `config`.
    pub fn from_config(config: PipelineConfig, users: Arc<dyn UserDirectory>) -> Result<Self> {
        let transport = build_transport(&config.transport)?;
        let access = build_access_control(&config.access);
        info!(transport = transport.transport_type(), "Mail transport ready");
        Ok(Self::new(
            config,
            PipelineDeps {
                users,
                access,
                transport,
            },
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Spawn the bus consumer and the delivery scheduler.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            warn!("Pipeline already started");
            return;
        }
        tasks.push(self.bus.run(self.cancellation_token.clone()));
        tasks.push(Arc::clone(&self.scheduler).start());
        info!("Notification pipeline started");
    }

    pub async fn post(
        &self,
        ctx: &RequestContext,
        artifact: &ArtifactRef,
        kind: EventKind,
        fields: PostFields,
    ) -> Result<Notification> {
        self.notifications.post(ctx, artifact, kind, fields).await
    }

    pub async fn post_user(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        artifact: &ArtifactRef,
        kind: EventKind,
        fields: PostFields,
    ) -> Result<UserNotice> {
        self.notifications
            .post_user(ctx, user_id, artifact, kind, fields)
            .await
    }

    pub fn pop_user_notifications(&self, user_id: &str) -> Vec<UserNotice> {
        self.notifications.pop_user_notifications(user_id)
    }

    pub async fn subscribe(
        &self,
        ctx: &RequestContext,
        scope: SubscriptionScope,
        mode: DeliveryMode,
        topic: Option<String>,
    ) -> Result<Subscription> {
        self.subscriptions.subscribe(ctx, scope, mode, topic).await
    }

    pub async fn unsubscribe(
        &self,
        ctx: &RequestContext,
        scope: SubscriptionScope,
        topic: Option<String>,
    ) -> Result<bool> {
        self.subscriptions.unsubscribe(ctx, scope, topic).await
    }

    /// Drain every bus topic now.
    pub async fn handle_all(&self) -> DrainReport {
        self.bus.handle_all().await
    }

    /// Run one mailbox sweep now.
    pub async fn sweep(&self) -> SweepReport {
        self.scheduler.run_once().await
    }

    /// Run one mailbox sweep as if the clock read `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        self.mailboxes
            .fire_ready(now, &self.cancellation_token)
            .await
    }

    pub async fn stats(&self) -> PipelineStats {
        PipelineStats {
            bus: self.bus.stats(),
            mailboxes: self.mailboxes.stats().await,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Stop background tasks, then drain the bus once.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down notification pipeline (timeout: {:?})", timeout);
        self.cancellation_token.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        let joined = tokio::time::timeout(timeout, async {
            for task in tasks {
                if let Err(e) = task.await {
                    warn!("Pipeline task ended abnormally: {}", e);
                }
            }
        })
        .await;
        if joined.is_err() {
            warn!("Shutdown timeout reached, abandoning background tasks");
        }

        let report = self.bus.handle_all().await;
        info!(
            handled = report.handled,
            failed = report.failed,
            "Notification pipeline shut down"
        );
        Ok(())
    }
}
