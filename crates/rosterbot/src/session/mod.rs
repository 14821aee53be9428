//! Chat session glue.
//!
//! The session owns the connection to the chat bridge. It exposes outbound
//! actions through [`SessionActions`] and delivers inbound events to a
//! [`SessionEventHandler`].

mod client;
mod controller;
mod error;

use async_trait::async_trait;
use rosterbot_protocol::{GroupStatus, RosterResponse, ServerFrame};

pub use client::{ChatClient, SessionHandle};
pub use controller::SessionController;
pub use error::{SessionError, SessionResult};

/// Outbound actions available to event handlers.
///
/// Both calls only enqueue a frame; answers arrive later as events.
pub trait SessionActions: Send + Sync {
    /// Ask the service for roster info of the given users.
    fn request_info(&self, jids: &[String]) -> SessionResult<()>;

    /// Leave a group chat.
    fn leave_group(&self, group_jid: &str) -> SessionResult<()>;
}

/// Receiver of inbound session events.
#[async_trait]
pub trait SessionEventHandler: Send + Sync {
    async fn on_authenticated(&self) {}

    async fn on_group_status_received(&self, status: &GroupStatus);

    async fn on_roster_received(&self, response: &RosterResponse);
}

/// Events surfaced by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Authenticated,
    LoginFailed { reason: String },
    CaptchaChallenge { url: String },
    GroupStatus(GroupStatus),
    Roster(RosterResponse),
    BridgeError { message: String },
    Disconnected { reason: String },
}

impl SessionEvent {
    /// Map a decoded frame to an event. Unknown frames yield `None`.
    pub fn from_frame(frame: ServerFrame) -> Option<Self> {
        let event = match frame {
            ServerFrame::Authenticated => Self::Authenticated,
            ServerFrame::LoginFailed { reason } => Self::LoginFailed { reason },
            ServerFrame::CaptchaChallenge { url } => Self::CaptchaChallenge { url },
            ServerFrame::GroupStatus(status) => Self::GroupStatus(status),
            ServerFrame::Roster(response) => Self::Roster(response),
            ServerFrame::Error { message } => Self::BridgeError { message },
            ServerFrame::Unknown => return None,
        };
        Some(event)
    }
}
