//! Messaging crate - direct messages between members
//!
//! This crate provides the message data-access layer:
//! - Domain models (Message, Member, Container)
//! - Storage trait with SQLite and in-memory backends
//! - Paged mailbox listing (Inbox / Outbox / Unread)
//! - Thread retrieval that records read receipts
//! - A per-request repository that stages adds and deletes until commit
//!
//! The authenticated username is always passed in by the caller; this crate
//! never authenticates.

pub mod config;
pub mod error;
pub mod models;
pub mod pagination;
pub mod query;
pub mod repository;
pub mod storage;

pub use config::MessagingConfig;
pub use error::MessagingError;
pub use models::{Container, Member, MemberId, Message, MessageId, NewMember, NewMessage, Party};
pub use pagination::{PageRequest, PagedList, PaginationHeader};
pub use query::{MailboxParams, MessageView};
pub use repository::{DeleteOutcome, MessageRepository};
pub use storage::{
    AppliedChanges, InMemoryMessageStore, MailboxSlice, MessageRow, MessageStore,
    SqliteMessageStore, StagedChange,
};
