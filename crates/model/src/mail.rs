use async_trait::async_trait;

use crate::error::ServiceError;

/// A message left through the contact form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContactMessage {
    /// The message text as typed by the visitor.
    pub body: String,
    /// The visitor's `User-Agent`, if sent.
    pub user_agent: Option<String>,
    /// Milliseconds since the Unix epoch when the message was received.
    pub received_at_ms: i64,
}

/// An outbound mail provider.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Delivers a contact message to the site owner.
    async fn send_contact(
        &self,
        message: &ContactMessage,
    ) -> Result<(), ServiceError>;
}
