pub mod conf;
pub mod contacts;
pub mod lock;
pub mod logs;

use std::time::Duration;

use fieldsync_common::error::{SyncerError, SyncerResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> SyncerResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| SyncerError::Destination(e.to_string()))
}

/// Create the syncer-store pool with an explicit connect timeout.
pub async fn create_store_pool(database_url: &str, connect_timeout: Duration) -> SyncerResult<PgPool> {
    tracing::info!("connecting to syncer store");
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(connect_timeout)
        .connect(database_url)
        .await
        .map_err(|e| SyncerError::Internal(e.to_string()))
}

/// Bootstrap the syncer-store tables. Idempotent; fatal to the process on failure.
pub async fn ensure_store_schema(pool: &PgPool) -> SyncerResult<()> {
    let statements = [
        "create table if not exists syncer_confs (
           id text primary key,
           org_id bigint not null,
           is_active boolean not null default true,
           document jsonb not null,
           created_at timestamptz not null default now(),
           updated_at timestamptz not null default now()
         )",
        "create table if not exists syncer_logs (
           id uuid primary key,
           org_id bigint not null,
           conf_id text not null,
           details text not null,
           log_type text not null,
           created_at timestamptz not null default now(),
           updated_at timestamptz not null default now()
         )",
        "create index if not exists syncer_logs_created_at_idx on syncer_logs(created_at)",
        "create table if not exists syncer_locks (
           key text primary key,
           holder uuid not null,
           locked_until timestamptz not null
         )",
    ];

    for stmt in statements {
        sqlx::query(stmt)
            .execute(pool)
            .await
            .map_err(|e| SyncerError::Internal(format!("store schema bootstrap failed: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_pool_fails_with_invalid_url() {
        let result = create_pool("postgres://invalid:5432/nonexistent").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn ensure_store_schema_is_idempotent() {
        let url = match std::env::var("TEST_DATABASE_URL") {
            Ok(u) => u,
            Err(_) => return,
        };
        let pool = create_pool(&url).await.expect("db should connect");
        ensure_store_schema(&pool).await.expect("first bootstrap");
        ensure_store_schema(&pool).await.expect("second bootstrap");
    }
}
