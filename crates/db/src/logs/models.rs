use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const LOG_TYPE_INFO: &str = "info";
pub const LOG_TYPE_ERROR: &str = "error";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncerLog {
    pub id: Uuid,
    pub org_id: i64,
    pub conf_id: String,
    pub details: String,
    pub log_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncerLog {
    pub fn info(org_id: i64, conf_id: &str, details: impl Into<String>) -> Self {
        Self::new(org_id, conf_id, details.into(), LOG_TYPE_INFO)
    }

    pub fn error(org_id: i64, conf_id: &str, details: impl Into<String>) -> Self {
        Self::new(org_id, conf_id, details.into(), LOG_TYPE_ERROR)
    }

    fn new(org_id: i64, conf_id: &str, details: String, log_type: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            org_id,
            conf_id: conf_id.to_owned(),
            details,
            log_type: log_type.to_owned(),
            created_at: now,
            updated_at: now,
        }
    }
}
