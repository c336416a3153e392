//! Mailbox container selector

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which slice of a member's mail to list
///
/// Anything other than `Inbox` or `Outbox` selects the unread inbox, so an
/// empty or unknown selector is always safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Container {
    /// Messages received by the member
    Inbox,
    /// Messages sent by the member
    Outbox,
    /// Received messages the member has not read yet
    #[default]
    Unread,
}

impl Container {
    pub fn parse(s: &str) -> Self {
        match s {
            "Inbox" => Container::Inbox,
            "Outbox" => Container::Outbox,
            _ => Container::Unread,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Container::Inbox => "Inbox",
            Container::Outbox => "Outbox",
            Container::Unread => "Unread",
        }
    }
}

impl FromStr for Container {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
