//! Roster collection workflow.
//!
//! A group status event triggers an info request for every member. The
//! roster response that follows is written to the user store as one batch,
//! after which the bot leaves the group the roster was fetched through.

mod collector;
mod leave;

pub use collector::{EntryFailure, RosterCollector, RosterOutcome};
