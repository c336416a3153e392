//! Storage traits and implementations
//!
//! This module defines the storage abstraction layer for messages and the
//! members they reference. The trait-based design allows swapping between
//! in-memory and SQLite storage.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryMessageStore;
pub use sqlite::SqliteMessageStore;
pub use traits::{AppliedChanges, MailboxSlice, MessageRow, MessageStore, StagedChange};
