//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{Container, Member, Message, MessageId, NewMember, NewMessage, Party};

/// A message joined with the main photo of each party
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub message: Message,
    pub sender_photo_url: Option<String>,
    pub recipient_photo_url: Option<String>,
}

/// A mutation waiting for the next commit
#[derive(Debug, Clone, PartialEq)]
pub enum StagedChange {
    Insert(NewMessage),
    /// Set one party's soft-delete flag. The row is removed in the same
    /// transaction once both flags are set.
    HideFor { id: MessageId, party: Party },
    Remove(MessageId),
}

/// One page of a mailbox together with the size of the whole container,
/// read from the same snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MailboxSlice {
    pub rows: Vec<MessageRow>,
    pub total_count: usize,
}

/// Outcome of applying a batch of staged changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedChanges {
    /// Rows inserted, updated or deleted
    pub rows_affected: usize,
    /// Ids assigned to inserted messages, in staging order
    pub inserted_ids: Vec<MessageId>,
}

/// Trait for message storage operations
///
/// Abstracts over storage backends (SQLite, in-memory). Implementations must
/// apply each write method as a single transaction: either every row changes
/// or none do.
pub trait MessageStore: Send + Sync {
    /// Insert a member, or update the profile fields of an existing username
    fn upsert_member(&self, member: NewMember) -> Result<Member>;

    /// Get a member by username
    fn get_member(&self, username: &str) -> Result<Option<Member>>;

    /// Get a message by ID
    fn get_message(&self, id: MessageId) -> Result<Option<Message>>;

    /// List one page of a member's mailbox, newest first
    ///
    /// Ties on send time are broken by id, highest first.
    fn list_mailbox(
        &self,
        username: &str,
        container: Container,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageRow>>;

    /// Count all messages in a member's mailbox container
    fn count_mailbox(&self, username: &str, container: Container) -> Result<usize>;

    /// List one page of a mailbox and count the whole container in a single
    /// read, so the count always agrees with the rows
    fn mailbox_slice(
        &self,
        username: &str,
        container: Container,
        limit: usize,
        offset: usize,
    ) -> Result<MailboxSlice>;

    /// List the conversation between two members, oldest first
    ///
    /// Messages hidden by `current` are left out.
    fn list_thread(&self, current: &str, other: &str) -> Result<Vec<MessageRow>>;

    /// Set the read time of the given messages that are still unread.
    ///
    /// Returns how many rows changed. Messages that already have a read time
    /// keep it.
    fn mark_read(&self, ids: &[MessageId], read_at: DateTime<Utc>) -> Result<usize>;

    /// Apply staged changes in one transaction
    fn apply_changes(&self, changes: &[StagedChange]) -> Result<AppliedChanges>;

    /// Clear all data (for testing)
    fn clear(&self) -> Result<()>;
}
