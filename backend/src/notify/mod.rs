//! E-mail notifications.
//!
//! Handlers queue messages in the `notification_outbox` table through
//! [`Notifier`]; an [`OutboxDispatcher`] drains the table over SMTP.

mod mailer;
mod outbox;

pub use mailer::*;
pub use outbox::*;

use crate::config::Config;
use crate::db::Repository;
use crate::errors::AppError;

#[derive(Debug, Clone, Default)]
pub struct Notifier {
    enabled: bool,
    sender: Option<String>,
}

impl Notifier {
    pub fn new(enabled: bool, sender: Option<String>) -> Self {
        Self { enabled, sender }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.enable_email, config.email_sender.clone())
    }

    /// Queue a message. Returns the outbox id, or `None` when nothing was queued.
    pub async fn notify(
        &self,
        repo: &Repository,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> Result<Option<i64>, AppError> {
        if recipients.is_empty() {
            return Ok(None);
        }

        let Some(sender) = self.sender.as_deref().filter(|_| self.enabled) else {
            tracing::info!(
                "Email disabled, skipped '{}' to {} recipient(s)",
                subject,
                recipients.len()
            );
            return Ok(None);
        };

        let id = repo.enqueue_notification(subject, body, recipients).await?;
        tracing::info!(
            "Queued email {} '{}' from {} to {} recipient(s)",
            id,
            subject,
            sender,
            recipients.len()
        );
        Ok(Some(id))
    }

    /// Best-effort variant for handlers: a failed enqueue must not fail the request.
    pub async fn notify_quietly(
        &self,
        repo: &Repository,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) {
        if let Err(e) = self.notify(repo, subject, body, recipients).await {
            tracing::warn!("Failed to queue notification '{}': {}", subject, e);
        }
    }
}
