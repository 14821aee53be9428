//! Wire types for communication between rosterbot and a chat bridge.
//!
//! The bridge fronts the chat service and owns the protocol details
//! (connection lifecycle, framing, login handshake). Rosterbot talks to it
//! over a WebSocket, one JSON object per text frame:
//!
//! - **Client frames** (rosterbot -> bridge): authentication and outbound
//!   actions such as requesting member info or leaving a group
//! - **Server frames** (bridge -> rosterbot): lifecycle notifications,
//!   group status changes and roster responses
//!
//! Both directions are tagged by a `type` field in snake_case. Frames with
//! an unrecognised `type` decode to [`ServerFrame::Unknown`] so newer
//! bridges stay compatible.
//!
//! # Example
//!
//! ```
//! use rosterbot_protocol::{ClientFrame, ServerFrame};
//!
//! let frame = ClientFrame::LeaveGroup {
//!     group_jid: "g1@groups.example".to_string(),
//! };
//! let json = serde_json::to_string(&frame).unwrap();
//! assert_eq!(json, r#"{"type":"leave_group","group_jid":"g1@groups.example"}"#);
//!
//! let event: ServerFrame = serde_json::from_str(r#"{"type":"authenticated"}"#).unwrap();
//! assert!(matches!(event, ServerFrame::Authenticated));
//! ```

mod frames;
mod roster;

pub use frames::{ClientFrame, ServerFrame};
pub use roster::{GroupInfo, GroupRef, GroupStatus, RosterEntry, RosterResponse, RosterUser};
