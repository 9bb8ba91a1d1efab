//! Queued e-mail notifications.

/// Maximum delivery attempts before a queued message is left alone.
pub const MAX_DELIVERY_ATTEMPTS: i64 = 5;

/// A message waiting in the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    pub id: i64,
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
    pub attempts: i64,
}
