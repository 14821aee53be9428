//! User records collected from rosters.
//!
//! Provides the record model, the repository that persists it and the
//! store traits the roster collector is written against.

mod models;
mod repository;
mod store;

pub use models::UserRecord;
pub use repository::{UserRepository, UserTransaction};
pub use store::{UserBatch, UserStore};
