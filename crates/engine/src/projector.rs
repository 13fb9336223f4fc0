use std::collections::HashMap;

use crate::adapter::SourceRow;
use fieldsync_common::error::{SyncerError, SyncerResult};
use fieldsync_db::conf::models::{NestedType, RelationType, SyncerColumn, SyncerConf};
use fieldsync_db::contacts::models::{infer_value_type, ContactField};
use fieldsync_db::contacts::repositories::ContactStore;

/// Projects source rows onto destination custom fields: resolves the contact
/// from the relation column, creates missing field definitions on first use,
/// and writes each configured column (or nested attribute) into the
/// contact's fields map.
pub struct Projector<S> {
    store: S,
}

impl<S: ContactStore> Projector<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply a batch. Returns the number of rows fully applied and, when a
    /// destination write fails, the error that aborted the batch; rows
    /// applied before the failure stay counted and stay written.
    pub async fn apply(
        &self,
        conf: &SyncerConf,
        rows: &[SourceRow],
    ) -> (usize, Option<SyncerError>) {
        let mut applied = 0;
        for row in rows {
            match self.apply_row(conf, row).await {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(err) => return (applied, Some(err)),
            }
        }
        (applied, None)
    }

    async fn apply_row(&self, conf: &SyncerConf, row: &SourceRow) -> SyncerResult<bool> {
        let handle = match row.get(&conf.table.relation_column) {
            Some(value) => value_to_string(value),
            None => {
                tracing::warn!(
                    conf_id = %conf.id,
                    relation_column = %conf.table.relation_column,
                    "row is missing the configured relation column, skipping"
                );
                return Ok(false);
            }
        };

        for column in &conf.table.columns {
            if column.nested_fields.is_empty() {
                let value = row.get(&column.name).cloned().unwrap_or(serde_json::Value::Null);
                self.project_field(conf, &handle, &column.field_map_name, &value)
                    .await?;
            } else {
                self.project_nested(conf, &handle, column, row).await?;
            }
        }

        Ok(true)
    }

    async fn project_nested(
        &self,
        conf: &SyncerConf,
        handle: &str,
        column: &SyncerColumn,
        row: &SourceRow,
    ) -> SyncerResult<()> {
        let raw = row
            .get(&column.name)
            .map(value_to_string)
            .unwrap_or_default();
        let parsed = match column.nested_type {
            NestedType::Json => parse_json_map(&raw),
            NestedType::Struct => parse_struct_map(&raw),
            NestedType::None => HashMap::new(),
        };

        for nested in &column.nested_fields {
            let value = parsed.get(&nested.attribute).cloned().unwrap_or_default();
            self.project_field(
                conf,
                handle,
                &nested.field_map_name,
                &serde_json::Value::String(value),
            )
            .await?;
        }
        Ok(())
    }

    async fn project_field(
        &self,
        conf: &SyncerConf,
        handle: &str,
        field_key: &str,
        value: &serde_json::Value,
    ) -> SyncerResult<()> {
        let org_id = conf.sync_rules.org_id;
        let admin_id = conf.sync_rules.admin_id;

        let field = match self.store.get_field_by_key(org_id, field_key).await? {
            Some(field) => field,
            None => {
                let field = ContactField::new(
                    field_key,
                    field_key,
                    infer_value_type(value),
                    org_id,
                    admin_id,
                    admin_id,
                );
                self.store.create_field(&field).await?;
                field
            }
        };

        let text = value_to_string(value);
        match conf.table.relation_type {
            RelationType::Contact => {
                self.store
                    .set_field_by_contact_uuid(handle, field.uuid, &text)
                    .await
            }
            RelationType::Urn => {
                self.store
                    .set_field_by_urn_path(org_id, handle, field.uuid, &text)
                    .await
            }
        }
    }
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `{"k": "v"}` payloads stored as text in a single source column.
fn parse_json_map(raw: &str) -> HashMap<String, String> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(object)) => object
            .into_iter()
            .map(|(k, v)| (k, value_to_string(&v)))
            .collect(),
        _ => {
            tracing::warn!("nested json column is not a JSON object, treating as empty");
            HashMap::new()
        }
    }
}

/// `{k1=v1, k2=v2}` struct renderings: braces stripped, entries split on
/// `", "`, each entry split once on `=`.
fn parse_struct_map(raw: &str) -> HashMap<String, String> {
    let inner = raw
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}');

    inner
        .split(", ")
        .filter_map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
        })
        .collect()
}
