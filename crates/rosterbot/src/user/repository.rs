//! User repository for database operations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Any, AnyPool, Connection, Transaction};
use tracing::{debug, instrument};

use super::models::UserRecord;
use super::store::{UserBatch, UserStore};

const UPSERT_USER: &str = r#"
    INSERT INTO users (jid, username, display_name, alias_jid, profile_pic_url)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (jid) DO UPDATE
    SET username = EXCLUDED.username,
        display_name = EXCLUDED.display_name,
        alias_jid = EXCLUDED.alias_jid,
        profile_pic_url = EXCLUDED.profile_pic_url
"#;

/// Repository for user database operations.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: AnyPool,
}

impl UserRepository {
    /// Create a new user repository.
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Start a transaction for a batch of upserts.
    pub async fn begin_transaction(&self) -> Result<UserTransaction> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin user transaction")?;
        Ok(UserTransaction { tx, pending: 0 })
    }

    /// Get a user by jid.
    #[instrument(skip(self))]
    pub async fn get(&self, jid: &str) -> Result<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT jid, username, display_name, alias_jid, profile_pic_url
            FROM users
            WHERE jid = $1
            "#,
        )
        .bind(jid)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user")?;

        Ok(user)
    }

    /// List users ordered by jid.
    #[instrument(skip(self))]
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<UserRecord>> {
        let users = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT jid, username, display_name, alias_jid, profile_pic_url
            FROM users
            ORDER BY jid
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list users")?;

        Ok(users)
    }

    /// Count stored users.
    #[instrument(skip(self))]
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count users")?;

        Ok(count)
    }
}

#[async_trait]
impl UserStore for UserRepository {
    #[instrument(skip(self, record), fields(jid = %record.jid))]
    async fn upsert_user(&self, record: &UserRecord) -> Result<()> {
        debug!("Upserting user");
        upsert_query(record)
            .execute(&self.pool)
            .await
            .context("Failed to upsert user")?;
        Ok(())
    }

    async fn begin_batch(&self) -> Result<Box<dyn UserBatch>> {
        Ok(Box::new(self.begin_transaction().await?))
    }
}

/// An open transaction holding pending upserts.
///
/// Each upsert runs inside its own savepoint so that a rejected row does
/// not poison the enclosing transaction.
pub struct UserTransaction {
    tx: Transaction<'static, Any>,
    pending: usize,
}

impl UserTransaction {
    /// Number of upserts waiting for commit.
    pub fn pending(&self) -> usize {
        self.pending
    }
}

#[async_trait]
impl UserBatch for UserTransaction {
    #[instrument(skip(self, record), fields(jid = %record.jid))]
    async fn upsert_user(&mut self, record: &UserRecord) -> Result<()> {
        let mut savepoint = self.tx.begin().await.context("Failed to open savepoint")?;

        match upsert_query(record).execute(&mut *savepoint).await {
            Ok(_) => {
                savepoint
                    .commit()
                    .await
                    .context("Failed to release savepoint")?;
                self.pending += 1;
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = savepoint.rollback().await {
                    debug!("Failed to roll back savepoint: {}", rollback_err);
                }
                Err(anyhow::Error::new(err).context("Failed to upsert user"))
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        debug!("Committing {} user upserts", self.pending);
        self.tx
            .commit()
            .await
            .context("Failed to commit user batch")
    }
}

fn upsert_query(record: &UserRecord) -> sqlx::query::Query<'_, Any, sqlx::any::AnyArguments<'_>> {
    sqlx::query(UPSERT_USER)
        .bind(record.jid.as_str())
        .bind(record.username.as_deref())
        .bind(record.display_name.as_deref())
        .bind(record.alias_jid.as_deref())
        .bind(record.profile_pic_url.as_deref())
}
