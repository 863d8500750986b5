use crate::config::AccountConfig;
use crate::message::{Attachment, Body, Message};

#[derive(Debug)]
pub enum ProviderError {
    Http(String),
    Parse(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Http(e) => write!(f, "HTTP error: {}", e),
            ProviderError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Mailbox operations the runner and dispatcher need from the mail service.
pub trait MailProvider {
    /// Unread inbox messages, newest first. Body and attachments are not
    /// populated.
    fn list_unread(&self) -> Result<Vec<Message>, ProviderError>;
    fn get_body(&self, message_id: &str) -> Result<Body, ProviderError>;
    fn list_attachments(&self, message_id: &str) -> Result<Vec<Attachment>, ProviderError>;
    fn mark_read(&self, message_id: &str) -> Result<(), ProviderError>;
    fn forward(
        &self,
        message_id: &str,
        recipients: &[String],
        comment: &str,
    ) -> Result<(), ProviderError>;
}

/// Authenticates an account and hands back a provider bound to its mailbox.
pub trait MailConnector {
    fn connect(
        &self,
        account: &AccountConfig,
        secret: &str,
    ) -> Result<Box<dyn MailProvider>, ProviderError>;
}
