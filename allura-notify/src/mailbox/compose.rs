//! Turns queued notifications into outbound messages.
//!
//! Per item, summary framing is shorter than digest framing and the summary
//! text is an excerpt, so a summary is always shorter than the digest of the
//! same notifications.

use uuid::Uuid;

use super::service::MailboxConfig;
use crate::domain::DeliveryMode;
use crate::identity::UserProfile;
use crate::notification::Notification;
use crate::transport::OutboundMessage;
use crate::{Error, Result};

const EXCERPT_ELLIPSIS: &str = "...";
const BATCH_FOOTER: &str = "\n---\nYou are receiving this because of your notification subscriptions.\n";

/// A message plus the queued notifications it delivers.
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    pub message: OutboundMessage,
    pub notification_ids: Vec<String>,
}

/// Compose the messages for one flush, in the order they must be sent.
pub fn compose(
    mode: DeliveryMode,
    items: &[Notification],
    recipient: &UserProfile,
    config: &MailboxConfig,
) -> Result<Vec<ComposedMessage>> {
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let to = recipient_address(recipient)?;

    Ok(match mode {
        DeliveryMode::Direct => items
            .iter()
            .map(|n| ComposedMessage {
                message: direct_message(n, &to),
                notification_ids: vec![n.id.clone()],
            })
            .collect(),
        DeliveryMode::Digest => vec![batch_message(
            format!("Digest of {} notifications", items.len()),
            items.iter().map(digest_item).collect(),
            items,
            &to,
            config,
        )],
        DeliveryMode::Summary => vec![batch_message(
            format!("Summary of {} notifications", items.len()),
            items
                .iter()
                .map(|n| summary_item(n, config.summary_excerpt_chars))
                .collect(),
            items,
            &to,
            config,
        )],
    })
}

fn recipient_address(recipient: &UserProfile) -> Result<String> {
    match recipient.email.as_deref() {
        Some(email) if !email.trim().is_empty() => {
            Ok(format!("{} <{}>", recipient.display_name, email.trim()))
        }
        _ => Err(Error::validation(format!(
            "user {} has no email address",
            recipient.id
        ))),
    }
}

fn direct_message(notification: &Notification, to: &str) -> OutboundMessage {
    let artifact = &notification.artifact;
    let body = format!(
        "{}\n\n---\n\nSent from {}:{} because you indicated interest in {}\n",
        notification.text,
        artifact.project_shortname,
        artifact.mount_point,
        artifact.display_ref()
    );
    OutboundMessage {
        message_id: notification.id.clone(),
        to: to.to_string(),
        from: notification.from_address.clone(),
        reply_to: notification.reply_to.clone(),
        subject: notification.subject.clone(),
        body,
    }
}

fn digest_item(notification: &Notification) -> String {
    format!("{}\n\n{}\n\n----\n\n", notification.subject, notification.text)
}

fn summary_item(notification: &Notification, excerpt_chars: usize) -> String {
    format!(
        "* {}\n  {}\n",
        notification.subject,
        excerpt(&notification.text, excerpt_chars)
    )
}

/// The first `max_chars` characters on one line, with an ellipsis if cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let cut = match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}{}", &text[..index], EXCERPT_ELLIPSIS),
        None => text.to_string(),
    };
    cut.replace('\n', " ")
}

fn batch_message(
    subject: String,
    rendered_items: Vec<String>,
    items: &[Notification],
    to: &str,
    config: &MailboxConfig,
) -> ComposedMessage {
    let mut body = rendered_items.concat();
    body.push_str(BATCH_FOOTER);
    ComposedMessage {
        message: OutboundMessage {
            message_id: Uuid::new_v4().to_string(),
            to: to.to_string(),
            from: config.from_address.clone(),
            reply_to: config.from_address.clone(),
            subject,
            body,
        },
        notification_ids: items.iter().map(|n| n.id.clone()).collect(),
    }
}
