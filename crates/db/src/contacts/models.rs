use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const VALUE_TYPE_TEXT: &str = "T";
pub const VALUE_TYPE_NUMBER: &str = "N";
pub const VALUE_TYPE_DATETIME: &str = "D";
pub const VALUE_TYPE_STATE: &str = "S";
pub const VALUE_TYPE_DISTRICT: &str = "I";
pub const VALUE_TYPE_WARD: &str = "W";

/// A custom-field definition row in the destination database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactField {
    pub id: i64,
    pub is_active: bool,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    pub uuid: Uuid,
    pub label: String,
    pub key: String,
    pub field_type: String,
    pub value_type: String,
    pub show_in_table: bool,
    pub priority: i32,
    pub created_by_id: i64,
    pub modified_by_id: i64,
    pub org_id: i64,
}

impl ContactField {
    pub fn new(
        label: &str,
        key: &str,
        value_type: &str,
        org_id: i64,
        created_by_id: i64,
        modified_by_id: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            is_active: true,
            created_on: now,
            modified_on: now,
            uuid: Uuid::new_v4(),
            label: label.to_owned(),
            key: key.to_owned(),
            field_type: "U".to_owned(),
            value_type: value_type.to_owned(),
            show_in_table: false,
            priority: 0,
            created_by_id,
            modified_by_id,
            org_id,
        }
    }
}

/// Infer the destination value type for a source value: numbers map to N,
/// timestamp-shaped strings to D, everything else to T. The state, district
/// and ward codes are never inferred.
pub fn infer_value_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Number(_) => VALUE_TYPE_NUMBER,
        serde_json::Value::String(s) if is_timestamp(s) => VALUE_TYPE_DATETIME,
        _ => VALUE_TYPE_TEXT,
    }
}

fn is_timestamp(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
}
