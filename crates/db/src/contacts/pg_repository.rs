use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::contacts::models::ContactField;
use crate::contacts::repositories::ContactStore;
use fieldsync_common::error::{SyncerError, SyncerResult};

const FIELD_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
const FIELD_CREATE_TIMEOUT: Duration = Duration::from_secs(15);
const FIELD_UPDATE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct PgContactStore {
    pool: PgPool,
}

impl PgContactStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_field_row(row: sqlx::postgres::PgRow) -> ContactField {
        ContactField {
            id: row.get("id"),
            is_active: row.get("is_active"),
            created_on: row.get("created_on"),
            modified_on: row.get("modified_on"),
            uuid: row.get("uuid"),
            label: row.get("label"),
            key: row.get("key"),
            field_type: row.get("field_type"),
            value_type: row.get("value_type"),
            show_in_table: row.get("show_in_table"),
            priority: row.get("priority"),
            created_by_id: row.get("created_by_id"),
            modified_by_id: row.get("modified_by_id"),
            org_id: row.get("org_id"),
        }
    }
}

async fn with_deadline<T, F>(what: &str, deadline: Duration, fut: F) -> SyncerResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result.map_err(|e| SyncerError::Destination(format!("{what}: {e}"))),
        Err(_) => Err(SyncerError::Transient(format!("{what} timed out"))),
    }
}

#[async_trait]
impl ContactStore for PgContactStore {
    async fn get_field_by_key(&self, org_id: i64, key: &str) -> SyncerResult<Option<ContactField>> {
        let row = with_deadline(
            "contact field lookup",
            FIELD_LOOKUP_TIMEOUT,
            sqlx::query(
                "select id, is_active, created_on, modified_on, uuid, label, key,
                        field_type, value_type, show_in_table, priority,
                        created_by_id, modified_by_id, org_id
                 from public.contacts_contactfield
                 where org_id = $1 and key = $2",
            )
            .bind(org_id)
            .bind(key)
            .fetch_optional(&self.pool),
        )
        .await?;

        Ok(row.map(Self::map_field_row))
    }

    async fn create_field(&self, field: &ContactField) -> SyncerResult<()> {
        with_deadline(
            "contact field creation",
            FIELD_CREATE_TIMEOUT,
            sqlx::query(
                "insert into public.contacts_contactfield (
                   is_active, created_on, modified_on, uuid, label, key,
                   field_type, value_type, show_in_table, priority,
                   created_by_id, modified_by_id, org_id
                 ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(field.is_active)
            .bind(field.created_on)
            .bind(field.modified_on)
            .bind(field.uuid)
            .bind(&field.label)
            .bind(&field.key)
            .bind(&field.field_type)
            .bind(&field.value_type)
            .bind(field.show_in_table)
            .bind(field.priority)
            .bind(field.created_by_id)
            .bind(field.modified_by_id)
            .bind(field.org_id)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    async fn set_field_by_contact_uuid(
        &self,
        contact_uuid: &str,
        field_uuid: Uuid,
        value: &str,
    ) -> SyncerResult<()> {
        // Path and payload are bound parameters; the value is JSON-encoded
        // by the driver, never interpolated.
        with_deadline(
            "contact field update",
            FIELD_UPDATE_TIMEOUT,
            sqlx::query(
                "update public.contacts_contact
                 set fields = jsonb_set(coalesce(fields, '{}'::jsonb), $1, $2, true)
                 where uuid::text = $3",
            )
            .bind(vec![field_uuid.to_string()])
            .bind(serde_json::json!({ "text": value }))
            .bind(contact_uuid)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    async fn set_field_by_urn_path(
        &self,
        org_id: i64,
        path: &str,
        field_uuid: Uuid,
        value: &str,
    ) -> SyncerResult<()> {
        with_deadline(
            "contact field update by urn",
            FIELD_UPDATE_TIMEOUT,
            sqlx::query(
                "update public.contacts_contact
                 set fields = jsonb_set(coalesce(contacts_contact.fields, '{}'::jsonb), $1, $2, true)
                 from public.contacts_contacturn
                 where contacts_contact.id = contacts_contacturn.contact_id
                   and contacts_contacturn.path = $3
                   and contacts_contacturn.org_id = $4",
            )
            .bind(vec![field_uuid.to_string()])
            .bind(serde_json::json!({ "text": value }))
            .bind(path)
            .bind(org_id)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    async fn active_urn_paths(&self, org_id: i64, scheme: &str) -> SyncerResult<Vec<String>> {
        let rows = with_deadline(
            "urn path enumeration",
            FIELD_LOOKUP_TIMEOUT,
            sqlx::query(
                "select ccu.path
                 from public.contacts_contacturn as ccu
                 join public.contacts_contact as cc on ccu.contact_id = cc.id
                 where cc.org_id = $1
                   and cc.is_active = true
                   and ccu.scheme = $2",
            )
            .bind(org_id)
            .bind(scheme)
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows.into_iter().map(|r| r.get("path")).collect())
    }
}
