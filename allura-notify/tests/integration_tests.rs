//! Integration tests for the assembled notification pipeline.
//!
//! Every test drives a `NotifyPipeline` through its public API with an
//! in-memory user directory and a recording mail transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use allura_notify::config::PipelineConfig;
use allura_notify::domain::{ArtifactRef, DeliveryMode, EventKind, RequestContext, ToolKind};
use allura_notify::identity::{
    AccessControl, AclAccessControl, AclGrant, InMemoryUserDirectory, OpenAccess, UserProfile,
};
use allura_notify::mailbox::EnqueueOutcome;
use allura_notify::notification::PostFields;
use allura_notify::subscription::SubscriptionScope;
use allura_notify::transport::{MailTransport, OutboundMessage};
use allura_notify::{Error, NotifyPipeline, PipelineDeps, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

const ADMIN: &str = "u-admin";
const ALICE: &str = "u-alice";
const BOB: &str = "u-bob";
const CAROL: &str = "u-carol";

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<OutboundMessage>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    fn sent_to(&self, user: &str) -> Vec<OutboundMessage> {
        let address = format!("<{}@example.com>", user);
        self.sent
            .lock()
            .iter()
            .filter(|m| m.to.ends_with(&address))
            .cloned()
            .collect()
    }

    fn count(&self) -> usize {
        self.sent.lock().len()
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    fn transport_type(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::transport("recording", "mail relay unavailable"));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

struct Harness {
    pipeline: Arc<NotifyPipeline>,
    transport: Arc<RecordingTransport>,
}

fn setup_with(config: PipelineConfig, access: Arc<dyn AccessControl>) -> Harness {
    let users = Arc::new(InMemoryUserDirectory::new());
    users.insert(UserProfile::new(
        ADMIN,
        "test-admin",
        "Test Admin",
        Some("u-admin@example.com".to_string()),
    ));
    for (id, name) in [(ALICE, "Alice"), (BOB, "Bob"), (CAROL, "Carol")] {
        users.insert(UserProfile::new(
            id,
            name.to_lowercase(),
            name,
            Some(format!("{}@example.com", id)),
        ));
    }

    let transport = Arc::new(RecordingTransport::default());
    let pipeline = NotifyPipeline::new(
        config,
        PipelineDeps {
            users,
            access,
            transport: transport.clone(),
        },
    );
    Harness {
        pipeline: Arc::new(pipeline),
        transport,
    }
}

fn setup() -> Harness {
    setup_with(PipelineConfig::default(), Arc::new(OpenAccess))
}

fn home() -> ArtifactRef {
    ArtifactRef {
        project_id: "p-test".to_string(),
        project_shortname: "test".to_string(),
        app_config_id: "ac-wiki".to_string(),
        tool: ToolKind::Wiki,
        mount_point: "wiki".to_string(),
        artifact_id: "Home".to_string(),
        title: "Home".to_string(),
        thread_id: None,
    }
}

fn ticket() -> ArtifactRef {
    ArtifactRef {
        project_id: "p-test".to_string(),
        project_shortname: "test".to_string(),
        app_config_id: "ac-bugs".to_string(),
        tool: ToolKind::Tracker,
        mount_point: "bugs".to_string(),
        artifact_id: "1".to_string(),
        title: "Crash on save".to_string(),
        thread_id: None,
    }
}

fn as_user(user: &str, artifact: &ArtifactRef) -> RequestContext {
    RequestContext::for_artifact(user, artifact)
}

async fn edit(h: &Harness, artifact: &ArtifactRef, text: &str) {
    h.pipeline
        .post(
            &as_user(ADMIN, artifact),
            artifact,
            EventKind::Metadata,
            PostFields::text(text),
        )
        .await
        .unwrap();
}

fn after_digest_interval() -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::days(2)
}

mod delivery_tests {
    use super::*;

    #[tokio::test]
    async fn test_direct_subscriber_gets_one_message_per_edit() {
        let h = setup();
        let page = home();
        h.pipeline
            .subscribe(
                &as_user(ALICE, &page),
                SubscriptionScope::artifact(&page),
                DeliveryMode::Direct,
                None,
            )
            .await
            .unwrap();

        edit(&h, &page, "").await;
        let drained = h.pipeline.handle_all().await;
        assert_eq!(drained.handled, 1);

        let sent = h.transport.sent_to(ALICE);
        assert_eq!(sent.len(), 1);
        let message = &sent[0];
        assert!(message.subject.starts_with("[test:wiki]"));
        assert!(message.body.starts_with("WikiPage Home modified by Test Admin"));
        assert!(message.from.contains("Test Admin"));
        assert_eq!(message.reply_to, "Home@wiki.test.p");
    }

    #[tokio::test]
    async fn test_first_digest_is_sent_on_first_sweep() {
        let h = setup();
        let page = home();
        h.pipeline
            .subscribe(
                &as_user(BOB, &page),
                SubscriptionScope::artifact(&page),
                DeliveryMode::Digest,
                None,
            )
            .await
            .unwrap();

        edit(&h, &page, "first edit").await;
        edit(&h, &page, "second edit").await;
        h.pipeline.handle_all().await;
        assert_eq!(h.transport.count(), 0);

        let report = h.pipeline.sweep().await;
        assert_eq!(report.messages_sent, 1);

        let sent = h.transport.sent_to(BOB);
        assert_eq!(sent.len(), 1);
        let body = &sent[0].body;
        let first = body.find("first edit").unwrap();
        let second = body.find("second edit").unwrap();
        assert!(first < second);

        // The next digest waits for the interval.
        edit(&h, &page, "third edit").await;
        h.pipeline.handle_all().await;
        assert_eq!(h.pipeline.sweep().await.fired, 0);
        let later = h.pipeline.sweep_at(after_digest_interval()).await;
        assert_eq!(later.messages_sent, 1);
        assert!(h.transport.sent_to(BOB)[1].body.contains("third edit"));
    }

    #[tokio::test]
    async fn test_failed_digest_is_kept_and_sent_later() {
        let h = setup();
        let page = home();
        let sub = h
            .pipeline
            .subscribe(
                &as_user(CAROL, &page),
                SubscriptionScope::artifact(&page),
                DeliveryMode::Digest,
                None,
            )
            .await
            .unwrap();

        edit(&h, &page, "first edit").await;
        edit(&h, &page, "second edit").await;
        h.pipeline.handle_all().await;

        h.transport.set_failing(true);
        let failed = h.pipeline.sweep_at(after_digest_interval()).await;
        assert_eq!(failed.failed, 1);
        assert_eq!(failed.messages_sent, 0);

        let mailbox = h.pipeline.mailboxes.get(&sub.id).await.unwrap();
        assert_eq!(mailbox.queue.len(), 2);
        assert_eq!(mailbox.failed_attempts, 1);

        h.transport.set_failing(false);
        let retried = h.pipeline.sweep_at(after_digest_interval()).await;
        assert_eq!(retried.messages_sent, 1);
        let sent = h.transport.sent_to(CAROL);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("first edit"));
        assert!(sent[0].body.contains("second edit"));
        assert!(h.pipeline.mailboxes.get(&sub.id).await.unwrap().queue.is_empty());
    }

    #[tokio::test]
    async fn test_second_sweep_with_empty_queue_sends_nothing() {
        let h = setup();
        let page = home();
        h.pipeline
            .subscribe(
                &as_user(BOB, &page),
                SubscriptionScope::tool(&page.project_id, &page.app_config_id),
                DeliveryMode::Digest,
                None,
            )
            .await
            .unwrap();
        edit(&h, &page, "edit").await;
        h.pipeline.handle_all().await;

        let first = h.pipeline.sweep_at(after_digest_interval()).await;
        let second = h.pipeline.sweep_at(after_digest_interval()).await;
        assert_eq!(first.messages_sent, 1);
        assert_eq!(second.messages_sent, 0);
        assert_eq!(h.transport.count(), 1);
    }

    #[tokio::test]
    async fn test_summary_is_shorter_than_digest() {
        let h = setup();
        let page = home();
        for (user, mode) in [(BOB, DeliveryMode::Digest), (CAROL, DeliveryMode::Summary)] {
            h.pipeline
                .subscribe(&as_user(user, &page), SubscriptionScope::artifact(&page), mode, None)
                .await
                .unwrap();
        }

        edit(&h, &page, &"x".repeat(1024)).await;
        h.pipeline.handle_all().await;
        h.pipeline.sweep_at(after_digest_interval()).await;

        let digest = &h.transport.sent_to(BOB)[0];
        let summary = &h.transport.sent_to(CAROL)[0];
        assert!(digest.body.len() > 1024);
        assert!(summary.body.len() < 1024);
        assert!(summary.body.len() < digest.body.len());
    }

    #[tokio::test]
    async fn test_message_event_addresses() {
        let h = setup();
        let page = home();
        h.pipeline
            .subscribe(
                &as_user(ALICE, &page),
                SubscriptionScope::artifact(&page),
                DeliveryMode::Direct,
                None,
            )
            .await
            .unwrap();

        h.pipeline
            .post(
                &as_user(ADMIN, &page),
                &page,
                EventKind::Message,
                PostFields::text("This is a very cool message"),
            )
            .await
            .unwrap();
        h.pipeline.handle_all().await;

        let sent = h.transport.sent_to(ALICE);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, "Test Admin <test-admin@p>");
        assert_eq!(sent[0].reply_to, "Home@wiki.test.p");
        assert!(sent[0].body.starts_with("This is a very cool message"));
    }

    #[tokio::test]
    async fn test_artifact_subscription_overrides_tool_subscription() {
        let h = setup();
        let page = home();
        let ctx = as_user(ALICE, &page);
        let tool_sub = h
            .pipeline
            .subscribe(
                &ctx,
                SubscriptionScope::tool(&page.project_id, &page.app_config_id),
                DeliveryMode::Digest,
                None,
            )
            .await
            .unwrap();
        h.pipeline
            .subscribe(&ctx, SubscriptionScope::artifact(&page), DeliveryMode::Direct, None)
            .await
            .unwrap();

        edit(&h, &page, "edit").await;
        h.pipeline.handle_all().await;

        assert_eq!(h.transport.sent_to(ALICE).len(), 1);
        assert!(h.pipeline.mailboxes.get(&tool_sub.id).await.is_none());

        let mut other = home();
        other.artifact_id = "Other".to_string();
        other.title = "Other".to_string();
        edit(&h, &other, "edit").await;
        h.pipeline.handle_all().await;
        assert_eq!(
            h.pipeline.mailboxes.get(&tool_sub.id).await.unwrap().queue.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_topic_subscription_only_sees_its_topic() {
        let h = setup();
        let page = home();
        h.pipeline
            .subscribe(
                &as_user(ALICE, &page),
                SubscriptionScope::tool(&page.project_id, &page.app_config_id),
                DeliveryMode::Direct,
                Some("releases".to_string()),
            )
            .await
            .unwrap();

        edit(&h, &page, "untagged").await;
        let ctx = as_user(ADMIN, &page);
        h.pipeline
            .post(
                &ctx,
                &page,
                EventKind::Metadata,
                PostFields::text("tagged").with_topic("releases"),
            )
            .await
            .unwrap();
        h.pipeline.handle_all().await;

        let sent = h.transport.sent_to(ALICE);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("tagged"));
        assert!(!sent[0].body.contains("untagged"));
    }

    #[tokio::test]
    async fn test_concurrent_edits_all_reach_digest() {
        let h = setup();
        let page = home();
        h.pipeline
            .subscribe(
                &as_user(BOB, &page),
                SubscriptionScope::artifact(&page),
                DeliveryMode::Digest,
                None,
            )
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let pipeline = Arc::clone(&h.pipeline);
            let page = page.clone();
            handles.push(tokio::spawn(async move {
                pipeline
                    .post(
                        &as_user(ADMIN, &page),
                        &page,
                        EventKind::Metadata,
                        PostFields::text(format!("edit number {i}.")),
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let drained = h.pipeline.handle_all().await;
        assert_eq!(drained.handled, 20);
        h.pipeline.sweep_at(after_digest_interval()).await;

        let sent = h.transport.sent_to(BOB);
        assert_eq!(sent.len(), 1);
        for i in 0..20 {
            assert!(sent[0].body.contains(&format!("edit number {i}.")));
        }
    }
}

mod subscription_tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_twice_keeps_one_subscription() {
        let h = setup();
        let page = home();
        for _ in 0..2 {
            h.pipeline
                .subscribe(
                    &as_user(ALICE, &page),
                    SubscriptionScope::artifact(&page),
                    DeliveryMode::Direct,
                    None,
                )
                .await
                .unwrap();
        }
        assert_eq!(
            h.pipeline.subscriptions.list_for_user(ALICE).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_subscribe_without_read_access_is_rejected() {
        let page = home();
        let acl = AclAccessControl::from_grants(&[AclGrant {
            user_id: ALICE.to_string(),
            project_id: page.project_id.clone(),
            app_config_id: page.app_config_id.clone(),
            artifact_id: None,
        }]);
        let h = setup_with(PipelineConfig::default(), Arc::new(acl));

        let denied = h
            .pipeline
            .subscribe(
                &as_user(BOB, &page),
                SubscriptionScope::artifact(&page),
                DeliveryMode::Direct,
                None,
            )
            .await;
        assert!(matches!(denied, Err(Error::PermissionDenied { .. })));
        assert!(h.pipeline.subscriptions.list_for_user(BOB).await.unwrap().is_empty());

        h.pipeline
            .subscribe(
                &as_user(ALICE, &page),
                SubscriptionScope::artifact(&page),
                DeliveryMode::Direct,
                None,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_empty_mailbox() {
        let h = setup();
        let page = home();
        let scope = SubscriptionScope::artifact(&page);
        let sub = h
            .pipeline
            .subscribe(&as_user(ALICE, &page), scope.clone(), DeliveryMode::Direct, None)
            .await
            .unwrap();
        edit(&h, &page, "edit").await;
        h.pipeline.handle_all().await;
        assert!(h.pipeline.mailboxes.get(&sub.id).await.is_some());

        assert!(
            h.pipeline
                .unsubscribe(&as_user(ALICE, &page), scope, None)
                .await
                .unwrap()
        );
        assert!(h.pipeline.subscriptions.list_for_user(ALICE).await.unwrap().is_empty());
        assert!(h.pipeline.mailboxes.get(&sub.id).await.is_none());
    }

    #[tokio::test]
    async fn test_resolved_then_unsubscribed_gets_nothing() {
        let h = setup();
        let page = home();
        let scope = SubscriptionScope::artifact(&page);
        h.pipeline
            .subscribe(&as_user(BOB, &page), scope.clone(), DeliveryMode::Digest, None)
            .await
            .unwrap();
        let notification = h
            .pipeline
            .post(
                &as_user(ADMIN, &page),
                &page,
                EventKind::Metadata,
                PostFields::text("edit"),
            )
            .await
            .unwrap();

        let resolved = h
            .pipeline
            .subscriptions
            .resolve(&page, None)
            .await
            .unwrap();
        assert_eq!(resolved.len(), 1);
        h.pipeline
            .unsubscribe(&as_user(BOB, &page), scope, None)
            .await
            .unwrap();

        let outcome = h
            .pipeline
            .mailboxes
            .enqueue(&resolved[0], &notification)
            .await
            .unwrap();
        assert_eq!(outcome, EnqueueOutcome::Dropped);

        h.pipeline.handle_all().await;
        h.pipeline.sweep_at(after_digest_interval()).await;
        h.pipeline.sweep_at(after_digest_interval()).await;
        assert!(h.transport.sent_to(BOB).is_empty());
        assert!(h.pipeline.mailboxes.get(&resolved[0].id).await.is_none());
        assert!(h.pipeline.mailboxes.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_with_pending_digest_flushes_then_purges() {
        let h = setup();
        let page = home();
        let scope = SubscriptionScope::artifact(&page);
        let sub = h
            .pipeline
            .subscribe(&as_user(BOB, &page), scope.clone(), DeliveryMode::Digest, None)
            .await
            .unwrap();
        edit(&h, &page, "pending edit").await;
        h.pipeline.handle_all().await;

        h.pipeline
            .unsubscribe(&as_user(BOB, &page), scope, None)
            .await
            .unwrap();
        assert!(h.pipeline.mailboxes.get(&sub.id).await.unwrap().detached);

        edit(&h, &page, "after unsubscribe").await;
        h.pipeline.handle_all().await;

        let report = h.pipeline.sweep_at(after_digest_interval()).await;
        assert_eq!(report.purged, 1);
        let sent = h.transport.sent_to(BOB);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("pending edit"));
        assert!(!sent[0].body.contains("after unsubscribe"));
        assert!(h.pipeline.mailboxes.get(&sub.id).await.is_none());
    }
}

mod notification_tests {
    use super::*;

    #[tokio::test]
    async fn test_unrenderable_event_is_dropped_without_blocking_others() {
        let mut config = PipelineConfig::default();
        config.notification.installed_tools = vec![ToolKind::Wiki];
        let h = setup_with(config, Arc::new(OpenAccess));

        let bug = ticket();
        let page = home();
        h.pipeline
            .subscribe(
                &as_user(ALICE, &bug),
                SubscriptionScope::artifact(&bug),
                DeliveryMode::Direct,
                None,
            )
            .await
            .unwrap();
        h.pipeline
            .subscribe(
                &as_user(ALICE, &page),
                SubscriptionScope::artifact(&page),
                DeliveryMode::Direct,
                None,
            )
            .await
            .unwrap();

        let result = h
            .pipeline
            .post(
                &as_user(ADMIN, &bug),
                &bug,
                EventKind::Metadata,
                PostFields::default(),
            )
            .await;
        assert!(matches!(result, Err(Error::Rendering(_))));

        edit(&h, &page, "wiki edit").await;
        let drained = h.pipeline.handle_all().await;
        assert_eq!(drained.handled, 1);
        assert_eq!(drained.failed, 0);

        let sent = h.transport.sent_to(ALICE);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.starts_with("[test:wiki]"));
    }

    #[tokio::test]
    async fn test_post_user_is_popped_once() {
        let h = setup();
        let page = home();
        h.pipeline
            .subscribe(
                &as_user(ALICE, &page),
                SubscriptionScope::artifact(&page),
                DeliveryMode::Direct,
                None,
            )
            .await
            .unwrap();

        h.pipeline
            .post_user(
                &as_user(ADMIN, &page),
                BOB,
                &page,
                EventKind::Metadata,
                PostFields::default(),
            )
            .await
            .unwrap();
        h.pipeline.handle_all().await;

        assert_eq!(h.transport.count(), 0);
        let notices = h.pipeline.pop_user_notifications(BOB);
        assert_eq!(notices.len(), 1);
        assert!(notices[0].text.starts_with("WikiPage Home modified by Test Admin"));
        assert!(h.pipeline.pop_user_notifications(BOB).is_empty());
        assert!(h.pipeline.pop_user_notifications(ALICE).is_empty());
    }

    #[tokio::test]
    async fn test_post_outside_context_is_rejected() {
        let h = setup();
        let page = home();
        let result = h
            .pipeline
            .post(
                &as_user(ADMIN, &ticket()),
                &page,
                EventKind::Metadata,
                PostFields::default(),
            )
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(h.pipeline.handle_all().await.handled, 0);
    }
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_started_pipeline_delivers_and_shuts_down() {
        let h = setup();
        let page = home();
        h.pipeline
            .subscribe(
                &as_user(ALICE, &page),
                SubscriptionScope::artifact(&page),
                DeliveryMode::Direct,
                None,
            )
            .await
            .unwrap();

        h.pipeline.start();
        edit(&h, &page, "live edit").await;

        for _ in 0..100 {
            if h.transport.count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(h.transport.sent_to(ALICE).len(), 1);

        tokio::time::timeout(Duration::from_secs(5), h.pipeline.shutdown())
            .await
            .unwrap()
            .unwrap();
        assert!(h.pipeline.is_shutting_down());
        assert!(h.pipeline.scheduler.is_stopped());
    }

    #[tokio::test]
    async fn test_stats() {
        let h = setup();
        let page = home();
        h.pipeline
            .subscribe(
                &as_user(BOB, &page),
                SubscriptionScope::artifact(&page),
                DeliveryMode::Digest,
                None,
            )
            .await
            .unwrap();
        edit(&h, &page, "edit").await;

        let before = h.pipeline.stats().await;
        assert_eq!(before.bus.pending.get("notifications"), Some(&1));

        h.pipeline.handle_all().await;
        let after = h.pipeline.stats().await;
        assert_eq!(after.bus.pending.get("notifications").copied().unwrap_or(0), 0);
        assert_eq!(after.mailboxes.mailboxes, 1);
        assert_eq!(after.mailboxes.queued, 1);
    }
}
