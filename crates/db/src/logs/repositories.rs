use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::logs::models::SyncerLog;
use fieldsync_common::error::SyncerResult;

#[async_trait]
pub trait SyncerLogRepository: Send + Sync {
    async fn create(&self, log: SyncerLog) -> SyncerResult<()>;

    async fn get_by_id(&self, id: Uuid) -> SyncerResult<Option<SyncerLog>>;

    async fn update(&self, id: Uuid, log: SyncerLog) -> SyncerResult<()>;

    async fn delete(&self, id: Uuid) -> SyncerResult<()>;

    /// Delete every log created strictly before the cutoff; returns the count.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> SyncerResult<u64>;
}
