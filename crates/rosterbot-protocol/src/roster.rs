//! Roster and group payloads.

use serde::{Deserialize, Deserializer, Serialize};

/// Payload of a group status notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStatus {
    pub group: GroupInfo,
}

/// A group and its current members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub jid: String,
    /// Member jids, in the order the service reported them.
    #[serde(default)]
    pub users: Vec<String>,
}

/// Reference to the group a roster entry was fetched through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    pub jid: String,
}

/// Ordered roster entries answering an info request.
///
/// Entries are decoded one by one. An entry that does not decode becomes
/// [`RosterEntry::Invalid`] instead of failing the whole response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterResponse {
    #[serde(default, deserialize_with = "decode_entries")]
    pub entries: Vec<RosterEntry>,
}

/// One entry of a roster response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RosterEntry {
    /// A resolvable user profile.
    Roster(RosterUser),

    /// An entry that could not be decoded. Never produced by serde's
    /// tag dispatch, only by [`RosterResponse`] decoding.
    #[serde(skip)]
    Invalid { error: String },

    /// Entry kinds rosterbot does not process.
    #[serde(other)]
    Other,
}

impl RosterEntry {
    /// Decode one raw entry, keeping the decode error on failure.
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_else(|e| Self::Invalid {
            error: e.to_string(),
        })
    }
}

fn decode_entries<'de, D>(deserializer: D) -> Result<Vec<RosterEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(RosterEntry::from_value).collect())
}

/// Profile data for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterUser {
    pub jid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias_jid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pic_url: Option<String>,
    /// Group the entry was fetched through, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupRef>,
}

impl RosterUser {
    /// Create an entry with only a jid set.
    pub fn new(jid: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            username: None,
            display_name: None,
            alias_jid: None,
            pic_url: None,
            group: None,
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

    /// Set the originating group.
    pub fn with_group(mut self, group_jid: impl Into<String>) -> Self {
        self.group = Some(GroupRef {
            jid: group_jid.into(),
        });
        self
    }

    /// Jid of the originating group, ignoring empty references.
    pub fn group_jid(&self) -> Option<&str> {
        self.group
            .as_ref()
            .map(|group| group.jid.as_str())
            .filter(|jid| !jid.is_empty())
    }
}
