//! Domain models for messaging entities

mod container;
mod member;
mod message;

pub use container::Container;
pub use member::{Member, MemberId, NewMember};
pub use message::{Message, MessageId, NewMessage, Party};
