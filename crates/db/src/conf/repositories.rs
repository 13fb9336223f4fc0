use async_trait::async_trait;

use crate::conf::models::SyncerConf;
use fieldsync_common::error::SyncerResult;

#[async_trait]
pub trait SyncerConfRepository: Send + Sync {
    /// Persist a new conf, assigning its id. Returns the stored conf.
    async fn create(&self, conf: SyncerConf) -> SyncerResult<SyncerConf>;

    async fn get_by_id(&self, id: &str) -> SyncerResult<Option<SyncerConf>>;

    async fn get_by_org_id(&self, org_id: i64) -> SyncerResult<Vec<SyncerConf>>;

    async fn get_all(&self) -> SyncerResult<Vec<SyncerConf>>;

    async fn update(&self, id: &str, conf: SyncerConf) -> SyncerResult<()>;

    async fn delete(&self, id: &str) -> SyncerResult<()>;
}
