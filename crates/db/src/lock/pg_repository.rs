use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::lock::repositories::{LockGuard, LockRepository};
use fieldsync_common::error::{SyncerError, SyncerResult};

#[derive(Clone)]
pub struct PgLockRepository {
    pool: PgPool,
}

impl PgLockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockRepository for PgLockRepository {
    async fn obtain(&self, key: &str, ttl: Duration) -> SyncerResult<Option<LockGuard>> {
        let holder = Uuid::new_v4();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| SyncerError::Internal(format!("lock ttl out of range: {e}")))?;
        let now = Utc::now();

        // Atomic take-or-steal: the upsert only wins when the row is absent
        // or its TTL has lapsed.
        let row = sqlx::query(
            "insert into syncer_locks (key, holder, locked_until)
             values ($1, $2, $3)
             on conflict (key) do update
               set holder = excluded.holder, locked_until = excluded.locked_until
               where syncer_locks.locked_until < $4
             returning key",
        )
        .bind(key)
        .bind(holder)
        .bind(now + ttl)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncerError::Internal(e.to_string()))?;

        Ok(row.map(|_| LockGuard {
            key: key.to_owned(),
            holder,
        }))
    }

    async fn release(&self, guard: LockGuard) -> SyncerResult<()> {
        sqlx::query("delete from syncer_locks where key = $1 and holder = $2")
            .bind(&guard.key)
            .bind(guard.holder)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncerError::Internal(e.to_string()))?;
        Ok(())
    }
}
