use async_trait::async_trait;
use uuid::Uuid;

use crate::contacts::models::ContactField;
use fieldsync_common::error::SyncerResult;

/// Destination-database surface the field projector writes through.
#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn get_field_by_key(&self, org_id: i64, key: &str) -> SyncerResult<Option<ContactField>>;

    async fn create_field(&self, field: &ContactField) -> SyncerResult<()>;

    /// Set one field value on the contact identified by its UUID. A handle
    /// that matches no contact is a silent no-op.
    async fn set_field_by_contact_uuid(
        &self,
        contact_uuid: &str,
        field_uuid: Uuid,
        value: &str,
    ) -> SyncerResult<()>;

    /// Same write, but the contact is resolved through a URN path within the org.
    async fn set_field_by_urn_path(
        &self,
        org_id: i64,
        path: &str,
        field_uuid: Uuid,
        value: &str,
    ) -> SyncerResult<()>;

    /// URN paths of active contacts for the given org and scheme.
    async fn active_urn_paths(&self, org_id: i64, scheme: &str) -> SyncerResult<Vec<String>>;
}
