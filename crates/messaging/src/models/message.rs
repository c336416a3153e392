//! Message model representing a direct message between two members

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::{Member, MemberId};

/// Unique identifier for a message, assigned by the store on commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl MessageId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of a message a member is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Sender,
    Recipient,
}

/// A stored direct message
///
/// Sender and recipient usernames are kept next to the member references so
/// mailbox filters never need a join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: MemberId,
    pub sender_username: String,
    pub recipient_id: MemberId,
    pub recipient_username: String,
    pub content: String,
    /// When the message was sent
    pub message_sent: DateTime<Utc>,
    /// When the recipient first opened the thread containing this message
    pub date_read: Option<DateTime<Utc>>,
    pub sender_deleted: bool,
    pub recipient_deleted: bool,
}

impl Message {
    /// Which party `username` is on, if any
    pub fn party_of(&self, username: &str) -> Option<Party> {
        if self.sender_username == username {
            Some(Party::Sender)
        } else if self.recipient_username == username {
            Some(Party::Recipient)
        } else {
            None
        }
    }

    /// True if `username` is the recipient and has not read the message yet
    pub fn is_unread_by(&self, username: &str) -> bool {
        self.recipient_username == username && self.date_read.is_none()
    }

    /// Record the first read of this message.
    ///
    /// Returns false and leaves the existing timestamp alone if the message
    /// was already read.
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        if self.date_read.is_some() {
            return false;
        }
        self.date_read = Some(at);
        true
    }

    /// Hide the message from one party
    pub fn hide_for(&mut self, party: Party) {
        match party {
            Party::Sender => self.sender_deleted = true,
            Party::Recipient => self.recipient_deleted = true,
        }
    }

    /// Both parties have deleted the message, so it can be removed
    pub fn deleted_by_both(&self) -> bool {
        self.sender_deleted && self.recipient_deleted
    }
}

/// A message that has been composed but not committed yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub sender_id: MemberId,
    pub sender_username: String,
    pub recipient_id: MemberId,
    pub recipient_username: String,
    pub content: String,
    pub message_sent: DateTime<Utc>,
}

impl NewMessage {
    /// Compose a message from `sender` to `recipient`, sent now
    ///
    /// The send time is truncated to microseconds, the precision the
    /// SQLite store keeps.
    pub fn between(sender: &Member, recipient: &Member, content: impl Into<String>) -> Self {
        Self {
            sender_id: sender.id,
            sender_username: sender.username.clone(),
            recipient_id: recipient.id,
            recipient_username: recipient.username.clone(),
            content: content.into(),
            message_sent: Utc::now().trunc_subsecs(6),
        }
    }

    /// Override the send time
    pub fn sent_at(mut self, message_sent: DateTime<Utc>) -> Self {
        self.message_sent = message_sent;
        self
    }

    /// Turn into a stored message once the store has assigned an id
    pub fn into_message(self, id: MessageId) -> Message {
        Message {
            id,
            sender_id: self.sender_id,
            sender_username: self.sender_username,
            recipient_id: self.recipient_id,
            recipient_username: self.recipient_username,
            content: self.content,
            message_sent: self.message_sent,
            date_read: None,
            sender_deleted: false,
            recipient_deleted: false,
        }
    }
}
