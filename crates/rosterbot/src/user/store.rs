//! Persistence traits consumed by the roster collector.

use anyhow::Result;
use async_trait::async_trait;

use super::models::UserRecord;

/// Durable store of user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a record or overwrite every mutable field of an existing one.
    async fn upsert_user(&self, record: &UserRecord) -> Result<()>;

    /// Open a batch whose writes become durable together on commit.
    async fn begin_batch(&self) -> Result<Box<dyn UserBatch>>;
}

/// A set of upserts committed atomically.
///
/// A failed upsert only discards its own write; the rest of the batch
/// stays pending. Dropping the batch without committing discards
/// everything.
#[async_trait]
pub trait UserBatch: Send {
    async fn upsert_user(&mut self, record: &UserRecord) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
