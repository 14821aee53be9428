//! User record model.

use rosterbot_protocol::RosterUser;
use serde::{Deserialize, Serialize};

/// One stored chat-service identity, keyed by `jid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub jid: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub alias_jid: Option<String>,
    pub profile_pic_url: Option<String>,
}

impl UserRecord {
    /// Create a record with only the jid set.
    pub fn new(jid: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            username: None,
            display_name: None,
            alias_jid: None,
            profile_pic_url: None,
        }
    }

    /// Set the username.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the display name.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

impl From<&RosterUser> for UserRecord {
    fn from(entry: &RosterUser) -> Self {
        Self {
            jid: entry.jid.clone(),
            username: entry.username.clone(),
            display_name: entry.display_name.clone(),
            alias_jid: entry.alias_jid.clone(),
            profile_pic_url: entry.pic_url.clone(),
        }
    }
}
