//! Client and server frames.

use serde::{Deserialize, Serialize};

use crate::roster::{GroupStatus, RosterResponse};

// ============================================================================
// Client frames (rosterbot -> bridge)
// ============================================================================

/// Frames sent from rosterbot to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Log in to the chat service.
    Authenticate {
        username: String,
        password: String,
        /// Stable device identifier, if the account is bound to one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
    },

    /// Ask the service for roster info of the given users.
    ///
    /// The answer arrives later as a [`ServerFrame::Roster`].
    RequestInfo { jids: Vec<String> },

    /// Leave a group chat.
    LeaveGroup { group_jid: String },
}

// ============================================================================
// Server frames (bridge -> rosterbot)
// ============================================================================

/// Frames sent from the bridge to rosterbot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Login succeeded.
    Authenticated,

    /// Login was rejected.
    LoginFailed {
        #[serde(default)]
        reason: String,
    },

    /// The service wants a CAPTCHA solved before login can continue.
    CaptchaChallenge { url: String },

    /// Membership or state of a group changed.
    GroupStatus(GroupStatus),

    /// Response to a [`ClientFrame::RequestInfo`].
    Roster(RosterResponse),

    /// Bridge-level error not tied to a specific request.
    Error { message: String },

    /// Any frame type this version does not know about.
    #[serde(other)]
    Unknown,
}
