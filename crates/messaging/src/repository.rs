//! Message repository: the per-request unit of work over a message store
//!
//! A [`MessageRepository`] is created for one request. Reads go straight to
//! the store. Adds and deletes are staged in the session and only reach the
//! store on [`MessageRepository::commit`], all in one transaction. The one
//! exception is opening a thread, which persists read receipts before it
//! returns.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use log::{debug, info, warn};

use crate::config::MessagingConfig;
use crate::error::{MessagingError, Result};
use crate::models::{Member, Message, MessageId, NewMessage};
use crate::pagination::{PageRequest, PagedList};
use crate::query::{MailboxParams, MessageView};
use crate::storage::{MessageStore, StagedChange};

/// What a per-party delete ended up staging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// No message with that id
    NotFound,
    /// Hidden from the caller; the other party still sees it
    Hidden,
    /// Both parties deleted it, so the row is removed
    Removed,
}

/// Read-time precision shared by every backend
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Message data access for a single request
pub struct MessageRepository {
    store: Arc<dyn MessageStore>,
    staged: Vec<StagedChange>,
    last_inserted: Vec<MessageId>,
    default_page_size: usize,
    max_page_size: usize,
}

impl MessageRepository {
    /// Create a session with the default paging limits
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_config(store, &MessagingConfig::default())
    }

    /// Create a session using the paging limits from `config`
    pub fn with_config(store: Arc<dyn MessageStore>, config: &MessagingConfig) -> Self {
        Self {
            store,
            staged: Vec::new(),
            last_inserted: Vec::new(),
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
        }
    }

    // ========================================================================
    // Staged mutations
    // ========================================================================

    /// Register a new message for insertion on the next commit
    pub fn stage_add(&mut self, message: NewMessage) {
        debug!(
            "Staging message from {} to {}",
            message.sender_username, message.recipient_username
        );
        self.staged.push(StagedChange::Insert(message));
    }

    /// Register a message for removal on the next commit
    pub fn stage_delete(&mut self, message: &Message) {
        debug!("Staging removal of message {}", message.id);
        self.staged.push(StagedChange::Remove(message.id));
    }

    /// Compose a message between two members and stage it
    ///
    /// Both usernames must belong to known members, and they must differ.
    pub fn stage_send(
        &mut self,
        sender_username: &str,
        recipient_username: &str,
        content: impl Into<String>,
    ) -> Result<NewMessage> {
        if sender_username == recipient_username {
            return Err(MessagingError::CannotMessageSelf);
        }

        let sender = self.require_member(sender_username)?;
        let recipient = self.require_member(recipient_username)?;

        let message = NewMessage::between(&sender, &recipient, content);
        self.stage_add(message.clone());
        Ok(message)
    }

    /// Delete a message on behalf of one participant
    ///
    /// The message stays visible to the other participant until they delete
    /// it too. Only the caller's own flag is staged, and the store removes
    /// the row when it sees both flags set, so concurrent deletes by the two
    /// participants never undo each other. The returned outcome is what this
    /// session expects from its own view of the message.
    pub fn stage_delete_for(&mut self, id: MessageId, username: &str) -> Result<DeleteOutcome> {
        let Some(mut message) = self.store.get_message(id)? else {
            return Ok(DeleteOutcome::NotFound);
        };

        let party = message
            .party_of(username)
            .ok_or_else(|| MessagingError::NotParticipant {
                username: username.to_string(),
                message_id: id.as_i64(),
            })?;

        for change in &self.staged {
            if let StagedChange::HideFor {
                id: staged_id,
                party: staged_party,
            } = change
                && *staged_id == id
            {
                message.hide_for(*staged_party);
            }
        }
        message.hide_for(party);

        debug!("Staging {:?} delete of message {} for {}", party, id, username);
        self.staged.push(StagedChange::HideFor { id, party });

        if message.deleted_by_both() {
            Ok(DeleteOutcome::Removed)
        } else {
            Ok(DeleteOutcome::Hidden)
        }
    }

    /// Flush all staged changes in one transaction
    ///
    /// Returns false when there was nothing to write, or nothing changed.
    /// On error the staged changes are kept so the caller can retry or
    /// [`discard`](Self::discard) them.
    pub fn commit(&mut self) -> Result<bool> {
        if self.staged.is_empty() {
            debug!("Commit with no staged changes");
            return Ok(false);
        }

        let applied = self.store.apply_changes(&self.staged)?;

        info!(
            "Committed {} staged changes ({} rows affected)",
            self.staged.len(),
            applied.rows_affected
        );

        self.staged.clear();
        self.last_inserted = applied.inserted_ids;
        Ok(applied.rows_affected > 0)
    }

    /// Drop all staged changes
    pub fn discard(&mut self) {
        if !self.staged.is_empty() {
            debug!("Discarding {} staged changes", self.staged.len());
        }
        self.staged.clear();
    }

    pub fn has_changes(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Ids assigned by the last successful commit, in staging order
    pub fn last_inserted_ids(&self) -> &[MessageId] {
        &self.last_inserted
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Look up a message by id
    pub fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        Ok(self.store.get_message(id)?)
    }

    /// List one page of a member's mailbox, newest first
    ///
    /// The page and its totals come from one read of the store.
    pub fn get_mailbox(&self, params: &MailboxParams) -> Result<PagedList<MessageView>> {
        let request = PageRequest::new(
            params.page_number.unwrap_or(1),
            params
                .page_size
                .unwrap_or(self.default_page_size as i64),
            self.max_page_size,
        )?;

        let slice = self.store.mailbox_slice(
            &params.username,
            params.container,
            request.page_size(),
            request.offset(),
        )?;

        debug!(
            "{} for {}: page {} has {} of {} messages",
            params.container,
            params.username,
            request.page_number(),
            slice.rows.len(),
            slice.total_count
        );

        Ok(PagedList::new(slice.rows, request, slice.total_count).map(MessageView::from))
    }

    /// Load the conversation between `current` and `other`, oldest first,
    /// and mark everything `other` sent to `current` as read.
    ///
    /// The read receipts are written in one transaction before this returns.
    /// If there is nothing unread, the store is not written to.
    pub fn get_thread_and_mark_read(&self, current: &str, other: &str) -> Result<Vec<MessageView>> {
        let mut rows = self.store.list_thread(current, other)?;

        let unread: Vec<MessageId> = rows
            .iter()
            .filter(|row| row.message.is_unread_by(current))
            .map(|row| row.message.id)
            .collect();

        if unread.is_empty() {
            debug!("Thread {} <-> {}: nothing unread", current, other);
            return Ok(rows.into_iter().map(MessageView::from).collect());
        }

        let read_at = now();
        let marked = self.store.mark_read(&unread, read_at)?;
        info!(
            "Marked {} of {} messages read for {} in thread with {}",
            marked,
            unread.len(),
            current,
            other
        );

        if marked == unread.len() {
            for row in &mut rows {
                if row.message.is_unread_by(current) {
                    row.message.mark_read(read_at);
                }
            }
        } else {
            // Another request read some of these first; return the stored
            // read times rather than ours
            warn!(
                "Thread {} <-> {}: {} messages were already marked read",
                current,
                other,
                unread.len() - marked
            );
            rows = self.store.list_thread(current, other)?;
        }

        Ok(rows.into_iter().map(MessageView::from).collect())
    }

    fn require_member(&self, username: &str) -> Result<Member> {
        self.store
            .get_member(username)?
            .ok_or_else(|| MessagingError::MemberNotFound {
                username: username.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Container, NewMember};
    use crate::storage::InMemoryMessageStore;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 18, minute, 0).unwrap()
    }

    fn setup() -> (Arc<InMemoryMessageStore>, MessageRepository) {
        let store = Arc::new(InMemoryMessageStore::new());
        for name in ["alice", "bob", "carol"] {
            store.upsert_member(NewMember::new(name)).unwrap();
        }
        let repo = MessageRepository::new(store.clone());
        (store, repo)
    }

    fn send(repo: &mut MessageRepository, from: &str, to: &str, minute: u32) -> MessageId {
        let message = repo.stage_send(from, to, format!("{from} -> {to}")).unwrap();
        repo.discard();
        repo.stage_add(message.sent_at(at(minute)));
        assert!(repo.commit().unwrap());
        repo.last_inserted_ids()[0]
    }

    #[test]
    fn test_commit_without_changes_is_noop() {
        let (store, mut repo) = setup();
        let before = store.write_count();
        assert!(!repo.commit().unwrap());
        assert_eq!(store.write_count(), before);
    }

    #[test]
    fn test_stage_add_then_commit() {
        let (_store, mut repo) = setup();
        let id = send(&mut repo, "alice", "bob", 0);

        let message = repo.get_message(id).unwrap().unwrap();
        assert_eq!(message.content, "alice -> bob");
        assert!(!repo.has_changes());
    }

    #[test]
    fn test_staged_add_not_visible_before_commit() {
        let (_store, mut repo) = setup();
        repo.stage_send("alice", "bob", "pending").unwrap();

        let inbox = repo
            .get_mailbox(&MailboxParams::new("bob", Container::Inbox))
            .unwrap();
        assert_eq!(inbox.total_count, 0);
        assert!(repo.has_changes());
    }

    #[test]
    fn test_cannot_message_self() {
        let (_store, mut repo) = setup();
        let err = repo.stage_send("alice", "alice", "me").unwrap_err();
        assert!(matches!(err, MessagingError::CannotMessageSelf));
        assert!(!repo.has_changes());
    }

    #[test]
    fn test_unknown_recipient() {
        let (_store, mut repo) = setup();
        let err = repo.stage_send("alice", "zed", "hello?").unwrap_err();
        assert!(matches!(err, MessagingError::MemberNotFound { ref username } if username == "zed"));
    }

    #[test]
    fn test_get_message_missing_is_none() {
        let (_store, repo) = setup();
        assert!(repo.get_message(MessageId::new(12345)).unwrap().is_none());
    }

    #[test]
    fn test_mailbox_rejects_bad_paging() {
        let (_store, repo) = setup();
        let params = MailboxParams::new("bob", Container::Inbox).page(0, 10);
        assert!(matches!(
            repo.get_mailbox(&params),
            Err(MessagingError::InvalidPageNumber(0))
        ));
        let params = MailboxParams::new("bob", Container::Inbox).page(1, -5);
        assert!(matches!(
            repo.get_mailbox(&params),
            Err(MessagingError::InvalidPageSize(-5))
        ));
    }

    #[test]
    fn test_mailbox_uses_default_page_size() {
        let (_store, mut repo) = setup();
        for minute in 0..12 {
            send(&mut repo, "alice", "bob", minute);
        }

        let page = repo
            .get_mailbox(&MailboxParams::new("bob", Container::Inbox))
            .unwrap();
        assert_eq!(page.current_page, 1);
        assert_eq!(page.page_size, 10);
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.total_count, 12);
        assert_eq!(page.total_pages, 2);
    }

    #[test]
    fn test_thread_marks_only_incoming_unread() {
        let (store, mut repo) = setup();
        let from_bob = send(&mut repo, "bob", "alice", 0);
        let from_alice = send(&mut repo, "alice", "bob", 1);

        let thread = repo.get_thread_and_mark_read("alice", "bob").unwrap();
        assert_eq!(thread.len(), 2);
        assert!(thread[0].date_read.is_some());
        assert!(thread[1].date_read.is_none());

        let stored = store.get_message(from_bob).unwrap().unwrap();
        assert_eq!(stored.date_read, thread[0].date_read);
        assert!(store.get_message(from_alice).unwrap().unwrap().date_read.is_none());
    }

    #[test]
    fn test_thread_without_unread_does_not_write() {
        let (store, mut repo) = setup();
        send(&mut repo, "alice", "bob", 0);

        let before = store.write_count();
        let thread = repo.get_thread_and_mark_read("alice", "bob").unwrap();
        assert_eq!(thread.len(), 1);
        assert_eq!(store.write_count(), before);
    }

    #[test]
    fn test_thread_keeps_existing_read_time() {
        let (store, mut repo) = setup();
        let first = send(&mut repo, "bob", "alice", 0);
        send(&mut repo, "bob", "alice", 1);

        store.mark_read(&[first], at(30)).unwrap();
        let thread = repo.get_thread_and_mark_read("alice", "bob").unwrap();

        assert_eq!(thread[0].date_read, Some(at(30)));
        assert!(thread[1].date_read.is_some());
        assert_eq!(
            store.get_message(first).unwrap().unwrap().date_read,
            Some(at(30))
        );
    }

    /// Store that lets another "request" read the whole thread right after
    /// our first thread load
    struct RacingStore {
        inner: Arc<InMemoryMessageStore>,
        raced: std::sync::atomic::AtomicBool,
    }

    impl MessageStore for RacingStore {
        fn upsert_member(&self, member: NewMember) -> anyhow::Result<Member> {
            self.inner.upsert_member(member)
        }

        fn get_member(&self, username: &str) -> anyhow::Result<Option<Member>> {
            self.inner.get_member(username)
        }

        fn get_message(&self, id: MessageId) -> anyhow::Result<Option<Message>> {
            self.inner.get_message(id)
        }

        fn list_mailbox(
            &self,
            username: &str,
            container: Container,
            limit: usize,
            offset: usize,
        ) -> anyhow::Result<Vec<crate::storage::MessageRow>> {
            self.inner.list_mailbox(username, container, limit, offset)
        }

        fn count_mailbox(&self, username: &str, container: Container) -> anyhow::Result<usize> {
            self.inner.count_mailbox(username, container)
        }

        fn mailbox_slice(
            &self,
            username: &str,
            container: Container,
            limit: usize,
            offset: usize,
        ) -> anyhow::Result<crate::storage::MailboxSlice> {
            self.inner.mailbox_slice(username, container, limit, offset)
        }

        fn list_thread(
            &self,
            current: &str,
            other: &str,
        ) -> anyhow::Result<Vec<crate::storage::MessageRow>> {
            let rows = self.inner.list_thread(current, other)?;
            if !self.raced.swap(true, std::sync::atomic::Ordering::SeqCst) {
                let ids: Vec<MessageId> = rows.iter().map(|r| r.message.id).collect();
                self.inner.mark_read(&ids, at(45))?;
            }
            Ok(rows)
        }

        fn mark_read(&self, ids: &[MessageId], read_at: DateTime<Utc>) -> anyhow::Result<usize> {
            self.inner.mark_read(ids, read_at)
        }

        fn apply_changes(
            &self,
            changes: &[StagedChange],
        ) -> anyhow::Result<crate::storage::AppliedChanges> {
            self.inner.apply_changes(changes)
        }

        fn clear(&self) -> anyhow::Result<()> {
            self.inner.clear()
        }
    }

    #[test]
    fn test_thread_returns_read_time_of_concurrent_reader() {
        let (inner, mut repo) = setup();
        send(&mut repo, "bob", "alice", 0);
        send(&mut repo, "bob", "alice", 1);

        let racing = Arc::new(RacingStore {
            inner: inner.clone(),
            raced: std::sync::atomic::AtomicBool::new(false),
        });
        let repo = MessageRepository::new(racing);
        let thread = repo.get_thread_and_mark_read("alice", "bob").unwrap();

        assert_eq!(thread.len(), 2);
        assert!(thread.iter().all(|m| m.date_read == Some(at(45))));
    }

    /// Store whose write transactions fail while `failing` is set
    struct FailingStore {
        inner: Arc<InMemoryMessageStore>,
        failing: std::sync::atomic::AtomicBool,
    }

    impl FailingStore {
        fn check(&self) -> anyhow::Result<()> {
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("database is locked");
            }
            Ok(())
        }
    }

    impl MessageStore for FailingStore {
        fn upsert_member(&self, member: NewMember) -> anyhow::Result<Member> {
            self.inner.upsert_member(member)
        }

        fn get_member(&self, username: &str) -> anyhow::Result<Option<Member>> {
            self.inner.get_member(username)
        }

        fn get_message(&self, id: MessageId) -> anyhow::Result<Option<Message>> {
            self.inner.get_message(id)
        }

        fn list_mailbox(
            &self,
            username: &str,
            container: Container,
            limit: usize,
            offset: usize,
        ) -> anyhow::Result<Vec<crate::storage::MessageRow>> {
            self.inner.list_mailbox(username, container, limit, offset)
        }

        fn count_mailbox(&self, username: &str, container: Container) -> anyhow::Result<usize> {
            self.inner.count_mailbox(username, container)
        }

        fn mailbox_slice(
            &self,
            username: &str,
            container: Container,
            limit: usize,
            offset: usize,
        ) -> anyhow::Result<crate::storage::MailboxSlice> {
            self.inner.mailbox_slice(username, container, limit, offset)
        }

        fn list_thread(
            &self,
            current: &str,
            other: &str,
        ) -> anyhow::Result<Vec<crate::storage::MessageRow>> {
            self.inner.list_thread(current, other)
        }

        fn mark_read(&self, ids: &[MessageId], read_at: DateTime<Utc>) -> anyhow::Result<usize> {
            self.check()?;
            self.inner.mark_read(ids, read_at)
        }

        fn apply_changes(
            &self,
            changes: &[StagedChange],
        ) -> anyhow::Result<crate::storage::AppliedChanges> {
            self.check()?;
            self.inner.apply_changes(changes)
        }

        fn clear(&self) -> anyhow::Result<()> {
            self.inner.clear()
        }
    }

    fn failing(inner: &Arc<InMemoryMessageStore>) -> Arc<FailingStore> {
        Arc::new(FailingStore {
            inner: inner.clone(),
            failing: std::sync::atomic::AtomicBool::new(true),
        })
    }

    #[test]
    fn test_failed_read_receipts_return_no_thread() {
        let (inner, mut repo) = setup();
        let id = send(&mut repo, "bob", "alice", 0);

        let repo = MessageRepository::new(failing(&inner));
        let result = repo.get_thread_and_mark_read("alice", "bob");

        assert!(matches!(result, Err(MessagingError::Storage(_))));
        assert!(inner.get_message(id).unwrap().unwrap().date_read.is_none());
    }

    #[test]
    fn test_failed_commit_keeps_staged_changes() {
        let (inner, _repo) = setup();
        let store = failing(&inner);
        let mut repo = MessageRepository::new(store.clone());

        repo.stage_send("alice", "bob", "retry me").unwrap();
        assert!(matches!(repo.commit(), Err(MessagingError::Storage(_))));
        assert!(repo.has_changes());
        assert!(repo.last_inserted_ids().is_empty());
        assert_eq!(inner.count_mailbox("bob", Container::Inbox).unwrap(), 0);

        store
            .failing
            .store(false, std::sync::atomic::Ordering::SeqCst);
        assert!(repo.commit().unwrap());
        assert!(!repo.has_changes());
        assert_eq!(inner.count_mailbox("bob", Container::Inbox).unwrap(), 1);
    }

    #[test]
    fn test_delete_for_one_then_both() {
        let (store, mut repo) = setup();
        let id = send(&mut repo, "alice", "bob", 0);

        assert_eq!(repo.stage_delete_for(id, "alice").unwrap(), DeleteOutcome::Hidden);
        assert!(repo.commit().unwrap());
        let outbox = repo
            .get_mailbox(&MailboxParams::new("alice", Container::Outbox))
            .unwrap();
        assert_eq!(outbox.total_count, 0);
        assert!(store.get_message(id).unwrap().is_some());

        assert_eq!(repo.stage_delete_for(id, "bob").unwrap(), DeleteOutcome::Removed);
        assert!(repo.commit().unwrap());
        assert!(store.get_message(id).unwrap().is_none());
    }

    #[test]
    fn test_concurrent_deletes_by_both_parties_remove_message() {
        let (store, mut repo) = setup();
        let id = send(&mut repo, "alice", "bob", 0);

        let mut alice = MessageRepository::new(store.clone());
        let mut bob = MessageRepository::new(store.clone());
        assert_eq!(alice.stage_delete_for(id, "alice").unwrap(), DeleteOutcome::Hidden);
        assert_eq!(bob.stage_delete_for(id, "bob").unwrap(), DeleteOutcome::Hidden);

        assert!(alice.commit().unwrap());
        let outbox = alice
            .get_mailbox(&MailboxParams::new("alice", Container::Outbox))
            .unwrap();
        assert_eq!(outbox.total_count, 0);

        assert!(bob.commit().unwrap());
        assert!(store.get_message(id).unwrap().is_none());
        let outbox = alice
            .get_mailbox(&MailboxParams::new("alice", Container::Outbox))
            .unwrap();
        assert_eq!(outbox.total_count, 0);
    }

    #[test]
    fn test_both_deletes_in_one_session_remove_message() {
        let (store, mut repo) = setup();
        let id = send(&mut repo, "alice", "bob", 0);

        assert_eq!(repo.stage_delete_for(id, "alice").unwrap(), DeleteOutcome::Hidden);
        assert_eq!(repo.stage_delete_for(id, "bob").unwrap(), DeleteOutcome::Removed);
        assert!(repo.commit().unwrap());
        assert!(store.get_message(id).unwrap().is_none());
    }

    #[test]
    fn test_delete_for_outsider_or_missing() {
        let (_store, mut repo) = setup();
        let id = send(&mut repo, "alice", "bob", 0);

        assert!(matches!(
            repo.stage_delete_for(id, "carol"),
            Err(MessagingError::NotParticipant { .. })
        ));
        assert_eq!(
            repo.stage_delete_for(MessageId::new(999), "alice").unwrap(),
            DeleteOutcome::NotFound
        );
        assert!(!repo.has_changes());
    }

    #[test]
    fn test_stage_delete_removes_on_commit() {
        let (_store, mut repo) = setup();
        let id = send(&mut repo, "alice", "bob", 0);
        let message = repo.get_message(id).unwrap().unwrap();

        repo.stage_delete(&message);
        assert!(repo.get_message(id).unwrap().is_some());
        assert!(repo.commit().unwrap());
        assert!(repo.get_message(id).unwrap().is_none());
    }

    #[test]
    fn test_commit_of_vanished_row_reports_no_change() {
        let (_store, mut repo) = setup();
        let id = send(&mut repo, "alice", "bob", 0);
        let message = repo.get_message(id).unwrap().unwrap();

        repo.stage_delete(&message);
        assert!(repo.commit().unwrap());
        repo.stage_delete(&message);
        assert!(!repo.commit().unwrap());
    }
}
