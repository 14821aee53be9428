//! Rosterbot library.
//!
//! Listens for group status notifications from a chat bridge, fetches the
//! roster of every member, stores it in Postgres and leaves the group once
//! the roster has been processed.

pub mod config;
pub mod db;
pub mod roster;
pub mod session;
pub mod user;
