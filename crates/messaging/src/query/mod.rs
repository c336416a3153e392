//! Query API for callers
//!
//! Views and parameters shaped for the messaging API rather than storage.

mod views;

pub use views::{MailboxParams, MessageView};
