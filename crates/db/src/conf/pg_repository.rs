use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::conf::models::SyncerConf;
use crate::conf::repositories::SyncerConfRepository;
use fieldsync_common::error::{SyncerError, SyncerResult};

/// Conf store: the full conf lives as a JSONB document, with org_id and
/// is_active denormalized for filtering.
#[derive(Clone)]
pub struct PgSyncerConfRepository {
    pool: PgPool,
}

impl PgSyncerConfRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode_row(row: sqlx::postgres::PgRow) -> SyncerResult<SyncerConf> {
        let document: serde_json::Value = row.get("document");
        serde_json::from_value(document)
            .map_err(|e| SyncerError::Internal(format!("stored conf is not decodable: {e}")))
    }
}

#[async_trait]
impl SyncerConfRepository for PgSyncerConfRepository {
    async fn create(&self, mut conf: SyncerConf) -> SyncerResult<SyncerConf> {
        if conf.id.is_empty() {
            conf.id = Uuid::new_v4().to_string();
        }
        let document = serde_json::to_value(&conf)
            .map_err(|e| SyncerError::Internal(format!("conf is not serializable: {e}")))?;

        sqlx::query(
            "insert into syncer_confs (id, org_id, is_active, document, created_at, updated_at)
             values ($1, $2, $3, $4, $5, $5)",
        )
        .bind(&conf.id)
        .bind(conf.sync_rules.org_id)
        .bind(conf.is_active)
        .bind(document)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncerError::Internal(e.to_string()))?;

        Ok(conf)
    }

    async fn get_by_id(&self, id: &str) -> SyncerResult<Option<SyncerConf>> {
        let row = sqlx::query("select document from syncer_confs where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SyncerError::Internal(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::decode_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_by_org_id(&self, org_id: i64) -> SyncerResult<Vec<SyncerConf>> {
        let rows =
            sqlx::query("select document from syncer_confs where org_id = $1 order by created_at")
                .bind(org_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| SyncerError::Internal(e.to_string()))?;

        rows.into_iter().map(Self::decode_row).collect()
    }

    async fn get_all(&self) -> SyncerResult<Vec<SyncerConf>> {
        let rows = sqlx::query("select document from syncer_confs order by created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncerError::Internal(e.to_string()))?;

        rows.into_iter().map(Self::decode_row).collect()
    }

    async fn update(&self, id: &str, mut conf: SyncerConf) -> SyncerResult<()> {
        conf.id = id.to_owned();
        let document = serde_json::to_value(&conf)
            .map_err(|e| SyncerError::Internal(format!("conf is not serializable: {e}")))?;

        let result = sqlx::query(
            "update syncer_confs
             set org_id = $1, is_active = $2, document = $3, updated_at = $4
             where id = $5",
        )
        .bind(conf.sync_rules.org_id)
        .bind(conf.is_active)
        .bind(document)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncerError::Internal(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncerError::NotFound(format!("syncer conf not found: {id}")));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> SyncerResult<()> {
        let result = sqlx::query("delete from syncer_confs where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncerError::Internal(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncerError::NotFound(format!("syncer conf not found: {id}")));
        }
        Ok(())
    }
}
