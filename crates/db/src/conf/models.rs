use std::collections::HashMap;

use chrono::NaiveTime;
use fieldsync_common::error::{SyncerError, SyncerResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Sql,
    Warehouse,
    QueryService,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Sql => "sql",
            ServiceType::Warehouse => "warehouse",
            ServiceType::QueryService => "queryservice",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Pull,
    ContactUrn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Contact,
    Urn,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NestedType {
    #[default]
    None,
    Json,
    Struct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncerService {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    /// Credentials, DSN, endpoints. Required keys depend on the service type.
    #[serde(default)]
    pub access: HashMap<String, serde_json::Value>,
}

impl SyncerService {
    /// Fetch a required string-valued access key.
    pub fn access_str(&self, key: &str) -> SyncerResult<String> {
        self.access
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_owned())
            .ok_or_else(|| {
                SyncerError::Config(format!("service access key {key:?} is required but missing"))
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRules {
    #[serde(default)]
    pub schedule_times: Vec<String>,
    pub org_id: i64,
    pub admin_id: i64,
    #[serde(default)]
    pub strategy: Strategy,
    /// URN scheme, required when strategy is contact_urn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedField {
    pub attribute: String,
    pub field_map_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncerColumn {
    pub name: String,
    pub field_map_name: String,
    #[serde(default)]
    pub nested_type: NestedType,
    #[serde(default)]
    pub nested_fields: Vec<NestedField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncerTable {
    pub name: String,
    pub relation_type: RelationType,
    pub relation_column: String,
    pub columns: Vec<SyncerColumn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncerConf {
    /// Assigned by the store on create.
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub service: SyncerService,
    pub sync_rules: SyncRules,
    pub table: SyncerTable,
}

fn default_true() -> bool {
    true
}

impl SyncerConf {
    pub fn validate(&self) -> SyncerResult<()> {
        for (i, st) in self.sync_rules.schedule_times.iter().enumerate() {
            if NaiveTime::parse_from_str(st, "%H:%M").is_err() {
                return Err(SyncerError::Validation(format!(
                    "schedule time is invalid for element {i}: {st}"
                )));
            }
        }

        if self.sync_rules.strategy == Strategy::ContactUrn
            && self
                .sync_rules
                .schema
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .is_empty()
        {
            return Err(SyncerError::Validation(
                "schema is required for the contact_urn strategy".to_owned(),
            ));
        }

        if self.table.name.trim().is_empty() {
            return Err(SyncerError::Validation("table name must not be empty".to_owned()));
        }
        if self.table.relation_column.trim().is_empty() {
            return Err(SyncerError::Validation(
                "relation_column must not be empty".to_owned(),
            ));
        }
        if self.table.columns.is_empty() {
            return Err(SyncerError::Validation(
                "table must configure at least one column".to_owned(),
            ));
        }

        for column in &self.table.columns {
            if !column.nested_fields.is_empty() && column.nested_type == NestedType::None {
                return Err(SyncerError::Validation(format!(
                    "column {} has nested_fields but no nested_type",
                    column.name
                )));
            }
        }

        Ok(())
    }
}
