//! SMTP delivery through `lettre`.

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::Config;
use crate::errors::AppError;

/// Something that can hand a finished message to a mail server.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), AppError>;
}

/// Relay over SMTP. STARTTLS and login are used when credentials are configured.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build a relay from the config, or `None` when no SMTP host is set.
    pub fn from_config(config: &Config) -> Result<Option<Self>, AppError> {
        let Some(host) = config.smtp_host.as_deref() else {
            return Ok(None);
        };

        let transport = match (&config.smtp_username, &config.smtp_password) {
            (Some(username), Some(password)) => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                    .map_err(|e| AppError::Internal(format!("Invalid SMTP host {}: {}", host, e)))?
                    .port(config.smtp_port)
                    .credentials(Credentials::new(username.clone(), password.clone()))
                    .build()
            }
            _ => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .port(config.smtp_port)
                .build(),
        };

        Ok(Some(Self { transport }))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: Message) -> Result<(), AppError> {
        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| AppError::Internal(format!("SMTP delivery failed: {}", e)))
    }
}

/// Plain-text message from `sender` to every recipient.
pub fn build_message(
    sender: &str,
    subject: &str,
    body: &str,
    recipients: &[String],
) -> Result<Message, AppError> {
    let mut builder = Message::builder()
        .from(parse_mailbox(sender)?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN);
    for recipient in recipients {
        builder = builder.to(parse_mailbox(recipient)?);
    }

    builder
        .body(body.to_string())
        .map_err(|e| AppError::Validation(format!("Cannot build e-mail '{}': {}", subject, e)))
}

fn parse_mailbox(address: &str) -> Result<Mailbox, AppError> {
    address
        .parse()
        .map_err(|e| AppError::Validation(format!("Invalid e-mail address {}: {}", address, e)))
}
