//! Message view returned to API callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Container, MemberId, MessageId};
use crate::storage::MessageRow;

/// Lightweight projection of a message for display
///
/// Carries the photo of each party but none of the member record itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub sender_id: MemberId,
    pub sender_username: String,
    pub sender_photo_url: Option<String>,
    pub recipient_id: MemberId,
    pub recipient_username: String,
    pub recipient_photo_url: Option<String>,
    pub content: String,
    pub date_read: Option<DateTime<Utc>>,
    pub message_sent: DateTime<Utc>,
}

impl From<MessageRow> for MessageView {
    fn from(row: MessageRow) -> Self {
        let message = row.message;
        Self {
            id: message.id,
            sender_id: message.sender_id,
            sender_username: message.sender_username,
            sender_photo_url: row.sender_photo_url,
            recipient_id: message.recipient_id,
            recipient_username: message.recipient_username,
            recipient_photo_url: row.recipient_photo_url,
            content: message.content,
            date_read: message.date_read,
            message_sent: message.message_sent,
        }
    }
}

/// Caller-supplied mailbox query
///
/// Paging values are kept raw so the repository can reject bad input
/// instead of the caller silently clamping it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxParams {
    pub username: String,
    pub container: Container,
    /// Defaults to the first page
    pub page_number: Option<i64>,
    /// Defaults to the configured page size
    pub page_size: Option<i64>,
}

impl MailboxParams {
    pub fn new(username: impl Into<String>, container: Container) -> Self {
        Self {
            username: username.into(),
            container,
            page_number: None,
            page_size: None,
        }
    }

    pub fn page(mut self, page_number: i64, page_size: i64) -> Self {
        self.page_number = Some(page_number);
        self.page_size = Some(page_size);
        self
    }
}
