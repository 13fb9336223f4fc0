//! In-memory doubles shared by the engine test modules.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::adapter::{SourceAdapter, SourceRow};
use fieldsync_common::error::{SyncerError, SyncerResult};
use fieldsync_db::conf::models::*;
use fieldsync_db::contacts::models::ContactField;
use fieldsync_db::contacts::repositories::ContactStore;

pub fn sample_conf(service_type: ServiceType) -> SyncerConf {
    let access = match service_type {
        ServiceType::Sql => HashMap::from([(
            "dsn".to_owned(),
            serde_json::json!("postgres://localhost/crm"),
        )]),
        ServiceType::Warehouse => HashMap::from([
            ("endpoint".to_owned(), serde_json::json!("http://localhost")),
            ("api_token".to_owned(), serde_json::json!("token")),
        ]),
        ServiceType::QueryService => HashMap::from([
            ("endpoint".to_owned(), serde_json::json!("http://localhost")),
            ("api_token".to_owned(), serde_json::json!("token")),
            ("database".to_owned(), serde_json::json!("analytics")),
            (
                "output_location".to_owned(),
                serde_json::json!("s3://results"),
            ),
            ("workgroup".to_owned(), serde_json::json!("primary")),
        ]),
    };

    SyncerConf {
        id: "conf-test".to_owned(),
        is_active: true,
        service: SyncerService {
            name: "crm".to_owned(),
            service_type,
            access,
        },
        sync_rules: SyncRules {
            schedule_times: vec!["04:00".to_owned()],
            org_id: 1,
            admin_id: 7,
            strategy: Strategy::Pull,
            schema: None,
            interval: None,
        },
        table: SyncerTable {
            name: "customers".to_owned(),
            relation_type: RelationType::Contact,
            relation_column: "uuid".to_owned(),
            columns: vec![
                SyncerColumn {
                    name: "region".to_owned(),
                    field_map_name: "region".to_owned(),
                    nested_type: NestedType::None,
                    nested_fields: vec![],
                },
                SyncerColumn {
                    name: "score".to_owned(),
                    field_map_name: "score".to_owned(),
                    nested_type: NestedType::None,
                    nested_fields: vec![],
                },
            ],
        },
    }
}

/// In-memory stand-in for the destination contact store.
#[derive(Clone, Default)]
pub struct MemoryContactStore {
    pub state: Arc<Mutex<MemoryContactState>>,
}

#[derive(Default)]
pub struct MemoryContactState {
    pub fields: Vec<ContactField>,
    /// contact uuid -> field uuid -> {"text": value}
    pub contact_fields: HashMap<String, HashMap<String, serde_json::Value>>,
    /// (org_id, path) -> contact uuid
    pub urns: HashMap<(i64, String), String>,
    pub active_paths: Vec<String>,
    pub fail_field_creation: bool,
    pub fail_field_update: bool,
}

impl MemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contact(self, uuid: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .contact_fields
            .insert(uuid.to_owned(), HashMap::new());
        self
    }

    pub fn with_urn(self, org_id: i64, path: &str, contact_uuid: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state
                .urns
                .insert((org_id, path.to_owned()), contact_uuid.to_owned());
            state
                .contact_fields
                .entry(contact_uuid.to_owned())
                .or_default();
            state.active_paths.push(path.to_owned());
        }
        self
    }

    pub fn field_by_key(&self, org_id: i64, key: &str) -> Option<ContactField> {
        self.state
            .lock()
            .unwrap()
            .fields
            .iter()
            .find(|f| f.org_id == org_id && f.key == key)
            .cloned()
    }

    pub fn contact_field_value(&self, contact_uuid: &str, field_uuid: Uuid) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .contact_fields
            .get(contact_uuid)?
            .get(&field_uuid.to_string())?
            .get("text")?
            .as_str()
            .map(|s| s.to_owned())
    }

    pub fn snapshot(&self) -> HashMap<String, HashMap<String, serde_json::Value>> {
        self.state.lock().unwrap().contact_fields.clone()
    }
}

#[async_trait]
impl ContactStore for MemoryContactStore {
    async fn get_field_by_key(&self, org_id: i64, key: &str) -> SyncerResult<Option<ContactField>> {
        Ok(self.field_by_key(org_id, key))
    }

    async fn create_field(&self, field: &ContactField) -> SyncerResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_field_creation {
            return Err(SyncerError::Destination("field creation refused".to_owned()));
        }
        state.fields.push(field.clone());
        Ok(())
    }

    async fn set_field_by_contact_uuid(
        &self,
        contact_uuid: &str,
        field_uuid: Uuid,
        value: &str,
    ) -> SyncerResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_field_update {
            return Err(SyncerError::Destination("field update refused".to_owned()));
        }
        // Unknown contacts are a silent no-op, as in the real store.
        if let Some(fields) = state.contact_fields.get_mut(contact_uuid) {
            fields.insert(
                field_uuid.to_string(),
                serde_json::json!({ "text": value }),
            );
        }
        Ok(())
    }

    async fn set_field_by_urn_path(
        &self,
        org_id: i64,
        path: &str,
        field_uuid: Uuid,
        value: &str,
    ) -> SyncerResult<()> {
        let contact_uuid = {
            let state = self.state.lock().unwrap();
            state.urns.get(&(org_id, path.to_owned())).cloned()
        };
        match contact_uuid {
            Some(uuid) => {
                self.set_field_by_contact_uuid(&uuid, field_uuid, value)
                    .await
            }
            None => Ok(()),
        }
    }

    async fn active_urn_paths(&self, _org_id: i64, _scheme: &str) -> SyncerResult<Vec<String>> {
        Ok(self.state.lock().unwrap().active_paths.clone())
    }
}

/// Adapter double backed by a fixed row set; queries are encoded as
/// `offset:limit:in_list` so execute can window the rows deterministically.
#[derive(Debug)]
pub struct MockAdapter {
    conf: SyncerConf,
    rows: Vec<SourceRow>,
    pub queries: Mutex<Vec<String>>,
    pub in_flight: Arc<Mutex<(usize, usize)>>,
    pub fail_execute_for_offset: Option<i64>,
    pub execute_delay: Option<std::time::Duration>,
    pub fail_total: bool,
}

impl MockAdapter {
    pub fn new(conf: SyncerConf, rows: Vec<SourceRow>) -> Self {
        Self {
            conf,
            rows,
            queries: Mutex::new(Vec::new()),
            in_flight: Arc::new(Mutex::new((0, 0))),
            fail_execute_for_offset: None,
            execute_delay: None,
            fail_total: false,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().1
    }

    pub fn recorded_queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    async fn total_rows(&self) -> SyncerResult<i64> {
        if self.fail_total {
            return Err(SyncerError::Source("mock count failure".to_owned()));
        }
        Ok(self.rows.len() as i64)
    }

    fn generate_query(&self, offset: i64, limit: i64, in_list: &[String]) -> SyncerResult<String> {
        Ok(format!("{offset}:{limit}:{}", in_list.join(",")))
    }

    async fn execute(&self, query: &str) -> SyncerResult<Vec<SourceRow>> {
        self.queries.lock().unwrap().push(query.to_owned());

        {
            let mut counts = self.in_flight.lock().unwrap();
            counts.0 += 1;
            counts.1 = counts.1.max(counts.0);
        }
        if let Some(delay) = self.execute_delay {
            tokio::time::sleep(delay).await;
        }

        let result = self.window(query);

        self.in_flight.lock().unwrap().0 -= 1;
        result
    }

    async fn close(&self) -> SyncerResult<()> {
        Ok(())
    }

    fn conf(&self) -> &SyncerConf {
        &self.conf
    }
}

impl MockAdapter {
    fn window(&self, query: &str) -> SyncerResult<Vec<SourceRow>> {
        let mut parts = query.splitn(3, ':');
        let offset: i64 = parts.next().unwrap_or("0").parse().unwrap_or(0);
        let limit: i64 = parts.next().unwrap_or("0").parse().unwrap_or(0);
        let in_list = parts.next().unwrap_or("");

        if self.fail_execute_for_offset == Some(offset) && in_list.is_empty() {
            return Err(SyncerError::Source("mock execute failure".to_owned()));
        }

        if !in_list.is_empty() {
            let wanted: Vec<&str> = in_list.split(',').collect();
            let relation = &self.conf.table.relation_column;
            return Ok(self
                .rows
                .iter()
                .filter(|r| {
                    r.get(relation)
                        .and_then(|v| v.as_str())
                        .map(|v| wanted.contains(&v))
                        .unwrap_or(false)
                })
                .cloned()
                .collect());
        }

        let start = (offset as usize).min(self.rows.len());
        let end = if limit > 0 {
            (start + limit as usize).min(self.rows.len())
        } else {
            self.rows.len()
        };
        Ok(self.rows[start..end].to_vec())
    }
}

pub fn row(pairs: &[(&str, serde_json::Value)]) -> SourceRow {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}
