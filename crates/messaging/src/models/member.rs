//! Member model: the minimum of a user profile that messaging needs

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a member, assigned by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(pub i64);

impl MemberId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    /// Unique login name
    pub username: String,
    /// Display name shown on the profile
    pub known_as: Option<String>,
    /// URL of the main profile photo, hosted by the media service
    pub photo_url: Option<String>,
}

/// A member to insert or update, keyed by username
#[derive(Debug, Clone, PartialEq)]
pub struct NewMember {
    pub username: String,
    pub known_as: Option<String>,
    pub photo_url: Option<String>,
}

impl NewMember {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            known_as: None,
            photo_url: None,
        }
    }

    pub fn known_as(mut self, known_as: impl Into<String>) -> Self {
        self.known_as = Some(known_as.into());
        self
    }

    pub fn photo_url(mut self, photo_url: impl Into<String>) -> Self {
        self.photo_url = Some(photo_url.into());
        self
    }

    pub fn into_member(self, id: MemberId) -> Member {
        Member {
            id,
            username: self.username,
            known_as: self.known_as,
            photo_url: self.photo_url,
        }
    }
}
