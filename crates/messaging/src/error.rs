//! Error type returned by the message repository

/// Errors surfaced to callers of the messaging layer
///
/// Missing rows are not errors: single lookups return `Option` and an empty
/// commit returns `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("Invalid page number {0}: must be 1 or greater")]
    InvalidPageNumber(i64),

    #[error("Invalid page size {0}: must be 1 or greater")]
    InvalidPageSize(i64),

    #[error("You cannot send messages to yourself")]
    CannotMessageSelf,

    #[error("Member not found: {username}")]
    MemberNotFound { username: String },

    #[error("{username} is not a participant of message {message_id}")]
    NotParticipant { username: String, message_id: i64 },

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl MessagingError {
    /// True for errors caused by caller input rather than the store
    pub fn is_validation(&self) -> bool {
        !matches!(self, MessagingError::Storage(_))
    }
}

pub type Result<T, E = MessagingError> = std::result::Result<T, E>;
