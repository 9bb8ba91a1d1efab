//! Background delivery of the notification outbox.

use std::time::Duration;

use tokio::task::JoinHandle;

use super::mailer::{build_message, Mailer};
use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{OutboxMessage, MAX_DELIVERY_ATTEMPTS};

const BATCH_SIZE: i64 = 20;

pub struct OutboxDispatcher<M> {
    repo: Repository,
    mailer: M,
    sender: String,
}

impl<M: Mailer> OutboxDispatcher<M> {
    pub fn new(repo: Repository, mailer: M, sender: String) -> Self {
        Self {
            repo,
            mailer,
            sender,
        }
    }

    /// Deliver one batch of pending messages. Returns how many were sent.
    ///
    /// A failed message keeps its row with the error and is retried on a later
    /// run until it reaches the attempt limit.
    pub async fn run_once(&self) -> Result<usize, AppError> {
        let pending = self
            .repo
            .pending_notifications(BATCH_SIZE, MAX_DELIVERY_ATTEMPTS)
            .await?;

        let mut sent = 0;
        for message in pending {
            match self.deliver(&message).await {
                Ok(()) => {
                    self.repo.mark_notification_sent(message.id).await?;
                    tracing::info!(
                        "Sent email {} '{}' to {} recipient(s)",
                        message.id,
                        message.subject,
                        message.recipients.len()
                    );
                    sent += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Email {} attempt {} failed: {}",
                        message.id,
                        message.attempts + 1,
                        e
                    );
                    self.repo
                        .mark_notification_failed(message.id, e.message())
                        .await?;
                }
            }
        }
        Ok(sent)
    }

    async fn deliver(&self, message: &OutboxMessage) -> Result<(), AppError> {
        let email = build_message(
            &self.sender,
            &message.subject,
            &message.body,
            &message.recipients,
        )?;
        self.mailer.send(email).await
    }
}

impl<M: Mailer + 'static> OutboxDispatcher<M> {
    /// Run the dispatcher on a fixed interval until the runtime shuts down.
    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    tracing::warn!("Outbox delivery run failed: {}", e);
                }
            }
        })
    }
}
