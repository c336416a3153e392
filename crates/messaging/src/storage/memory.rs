//! In-memory storage implementation
//!
//! Used by tests and by callers that don't need durability. All state sits
//! behind one lock so each write method is atomic.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};

use super::traits::{AppliedChanges, MailboxSlice, MessageRow, MessageStore, StagedChange};
use crate::models::{Container, Member, MemberId, Message, MessageId, NewMember};

#[derive(Default)]
struct Inner {
    /// Members keyed by username
    members: HashMap<String, Member>,
    /// Messages keyed by id
    messages: BTreeMap<i64, Message>,
    next_member_id: i64,
    next_message_id: i64,
}

impl Inner {
    fn photo_of(&self, username: &str) -> Option<String> {
        self.members
            .get(username)
            .and_then(|member| member.photo_url.clone())
    }

    fn row(&self, message: &Message) -> MessageRow {
        MessageRow {
            sender_photo_url: self.photo_of(&message.sender_username),
            recipient_photo_url: self.photo_of(&message.recipient_username),
            message: message.clone(),
        }
    }

    fn has_member_id(&self, id: MemberId) -> bool {
        self.members.values().any(|m| m.id == id)
    }

    /// Every message in a container, newest first with the highest id
    /// winning ties
    fn mailbox(&self, username: &str, container: Container) -> Vec<&Message> {
        let mut matching: Vec<&Message> = self
            .messages
            .values()
            .filter(|m| in_container(m, username, container))
            .collect();
        matching.sort_by_key(|m| Reverse((m.message_sent, m.id)));
        matching
    }

    fn mailbox_page(
        &self,
        username: &str,
        container: Container,
        limit: usize,
        offset: usize,
    ) -> Vec<MessageRow> {
        self.mailbox(username, container)
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|m| self.row(m))
            .collect()
    }
}

fn in_container(message: &Message, username: &str, container: Container) -> bool {
    match container {
        Container::Inbox => message.recipient_username == username && !message.recipient_deleted,
        Container::Outbox => message.sender_username == username && !message.sender_deleted,
        Container::Unread => {
            message.recipient_username == username
                && message.date_read.is_none()
                && !message.recipient_deleted
        }
    }
}

/// In-memory implementation of MessageStore
pub struct InMemoryMessageStore {
    inner: RwLock<Inner>,
    /// Number of write transactions that reached the store
    writes: AtomicUsize,
}

impl InMemoryMessageStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            writes: AtomicUsize::new(0),
        }
    }

    /// How many write transactions (member upserts, read marks, commits)
    /// have been applied
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("In-memory message store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        let guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("In-memory message store lock poisoned"))?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(guard)
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore for InMemoryMessageStore {
    fn upsert_member(&self, member: NewMember) -> Result<Member> {
        let mut inner = self.write()?;

        if let Some(existing) = inner.members.get_mut(&member.username) {
            existing.known_as = member.known_as;
            existing.photo_url = member.photo_url;
            return Ok(existing.clone());
        }

        inner.next_member_id += 1;
        let member = member.into_member(MemberId::new(inner.next_member_id));
        inner.members.insert(member.username.clone(), member.clone());
        Ok(member)
    }

    fn get_member(&self, username: &str) -> Result<Option<Member>> {
        Ok(self.read()?.members.get(username).cloned())
    }

    fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        Ok(self.read()?.messages.get(&id.0).cloned())
    }

    fn list_mailbox(
        &self,
        username: &str,
        container: Container,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageRow>> {
        Ok(self.read()?.mailbox_page(username, container, limit, offset))
    }

    fn count_mailbox(&self, username: &str, container: Container) -> Result<usize> {
        let inner = self.read()?;
        Ok(inner
            .messages
            .values()
            .filter(|m| in_container(m, username, container))
            .count())
    }

    fn mailbox_slice(
        &self,
        username: &str,
        container: Container,
        limit: usize,
        offset: usize,
    ) -> Result<MailboxSlice> {
        let inner = self.read()?;
        Ok(MailboxSlice {
            rows: inner.mailbox_page(username, container, limit, offset),
            total_count: inner.mailbox(username, container).len(),
        })
    }

    fn list_thread(&self, current: &str, other: &str) -> Result<Vec<MessageRow>> {
        let inner = self.read()?;

        let mut thread: Vec<&Message> = inner
            .messages
            .values()
            .filter(|m| {
                (m.recipient_username == current
                    && m.sender_username == other
                    && !m.recipient_deleted)
                    || (m.sender_username == current
                        && m.recipient_username == other
                        && !m.sender_deleted)
            })
            .collect();

        thread.sort_by_key(|m| (m.message_sent, m.id));

        Ok(thread.into_iter().map(|m| inner.row(m)).collect())
    }

    fn mark_read(&self, ids: &[MessageId], read_at: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.write()?;

        let mut changed = 0;
        for id in ids {
            if let Some(message) = inner.messages.get_mut(&id.0)
                && message.mark_read(read_at)
            {
                changed += 1;
            }
        }

        Ok(changed)
    }

    fn apply_changes(&self, changes: &[StagedChange]) -> Result<AppliedChanges> {
        let mut inner = self.write()?;

        // Work on a copy so a failing change leaves the store untouched
        let mut messages = inner.messages.clone();
        let mut next_message_id = inner.next_message_id;
        let mut applied = AppliedChanges::default();

        for change in changes {
            match change {
                StagedChange::Insert(new_message) => {
                    if !inner.has_member_id(new_message.sender_id)
                        || !inner.has_member_id(new_message.recipient_id)
                    {
                        bail!(
                            "Message from {} to {} references an unknown member",
                            new_message.sender_username,
                            new_message.recipient_username
                        );
                    }
                    next_message_id += 1;
                    let id = MessageId::new(next_message_id);
                    messages.insert(id.0, new_message.clone().into_message(id));
                    applied.inserted_ids.push(id);
                    applied.rows_affected += 1;
                }
                StagedChange::HideFor { id, party } => {
                    let Some(message) = messages.get_mut(&id.0) else {
                        continue;
                    };
                    message.hide_for(*party);
                    applied.rows_affected += 1;
                    if message.deleted_by_both() {
                        messages.remove(&id.0);
                        applied.rows_affected += 1;
                    }
                }
                StagedChange::Remove(id) => {
                    if messages.remove(&id.0).is_some() {
                        applied.rows_affected += 1;
                    }
                }
            }
        }

        inner.messages = messages;
        inner.next_message_id = next_message_id;
        Ok(applied)
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.write()?;
        *inner = Inner::default();
        Ok(())
    }
}
