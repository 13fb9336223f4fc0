use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::logs::models::SyncerLog;
use crate::logs::repositories::SyncerLogRepository;
use fieldsync_common::error::{SyncerError, SyncerResult};

#[derive(Clone)]
pub struct PgSyncerLogRepository {
    pool: PgPool,
}

impl PgSyncerLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> SyncerLog {
        SyncerLog {
            id: row.get("id"),
            org_id: row.get("org_id"),
            conf_id: row.get("conf_id"),
            details: row.get("details"),
            log_type: row.get("log_type"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl SyncerLogRepository for PgSyncerLogRepository {
    async fn create(&self, log: SyncerLog) -> SyncerResult<()> {
        sqlx::query(
            "insert into syncer_logs (id, org_id, conf_id, details, log_type, created_at, updated_at)
             values ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(log.id)
        .bind(log.org_id)
        .bind(&log.conf_id)
        .bind(&log.details)
        .bind(&log.log_type)
        .bind(log.created_at)
        .bind(log.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncerError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> SyncerResult<Option<SyncerLog>> {
        let row = sqlx::query(
            "select id, org_id, conf_id, details, log_type, created_at, updated_at
             from syncer_logs where id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncerError::Internal(e.to_string()))?;

        Ok(row.map(Self::map_row))
    }

    async fn update(&self, id: Uuid, log: SyncerLog) -> SyncerResult<()> {
        let result = sqlx::query(
            "update syncer_logs
             set details = $1, log_type = $2, updated_at = $3
             where id = $4",
        )
        .bind(&log.details)
        .bind(&log.log_type)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncerError::Internal(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncerError::NotFound(format!("syncer log not found: {id}")));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> SyncerResult<()> {
        let result = sqlx::query("delete from syncer_logs where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncerError::Internal(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncerError::NotFound(format!("syncer log not found: {id}")));
        }
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> SyncerResult<u64> {
        let result = sqlx::query("delete from syncer_logs where created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncerError::Internal(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
