use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Row};
use uuid::Uuid;

use crate::adapter::{build_select, SourceAdapter, SourceRow};
use fieldsync_common::error::{SyncerError, SyncerResult};
use fieldsync_db::conf::models::SyncerConf;

/// Source adapter for relational databases reachable over a Postgres DSN
/// (`access.dsn`). The pool connects lazily on first query.
#[derive(Debug)]
pub struct SqlAdapter {
    conf: SyncerConf,
    pool: PgPool,
}

impl SqlAdapter {
    pub fn new(conf: SyncerConf) -> SyncerResult<Self> {
        let dsn = conf.service.access_str("dsn")?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&dsn)
            .map_err(|e| SyncerError::Config(format!("invalid source dsn: {e}")))?;
        Ok(Self { conf, pool })
    }
}

#[async_trait]
impl SourceAdapter for SqlAdapter {
    async fn total_rows(&self) -> SyncerResult<i64> {
        sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM {}",
            self.conf.table.name
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SyncerError::Source(format!("failed to count source rows: {e}")))
    }

    fn generate_query(&self, offset: i64, limit: i64, in_list: &[String]) -> SyncerResult<String> {
        Ok(build_select(&self.conf, offset, limit, in_list))
    }

    async fn execute(&self, query: &str) -> SyncerResult<Vec<SourceRow>> {
        tracing::info!(
            conf_id = %self.conf.id,
            service = %self.conf.service.name,
            %query,
            "syncer making query"
        );

        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SyncerError::Source(format!("source query failed: {e}")))?;

        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn close(&self) -> SyncerResult<()> {
        self.pool.close().await;
        Ok(())
    }

    fn conf(&self) -> &SyncerConf {
        &self.conf
    }
}

fn row_to_map(row: &PgRow) -> SourceRow {
    let mut map = SourceRow::new();
    for column in row.columns() {
        map.insert(column.name().to_owned(), decode_column(row, column.ordinal()));
    }
    map
}

/// Decode a column of unknown type into a JSON value, trying the scalar
/// types the projector understands before falling back to raw JSON.
fn decode_column(row: &PgRow, idx: usize) -> serde_json::Value {
    if let Ok(value) = row.try_get::<Option<i64>, _>(idx) {
        return value.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(idx) {
        return value.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(idx) {
        return value.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(idx) {
        return value.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
        return value
            .map(|t| serde_json::Value::from(t.to_rfc3339()))
            .unwrap_or(serde_json::Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<Uuid>, _>(idx) {
        return value
            .map(|u| serde_json::Value::from(u.to_string()))
            .unwrap_or(serde_json::Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(idx) {
        return value.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<serde_json::Value>, _>(idx) {
        return value.unwrap_or(serde_json::Value::Null);
    }
    serde_json::Value::Null
}
