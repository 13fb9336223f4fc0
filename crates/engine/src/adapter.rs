use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::queryservice::QueryServiceAdapter;
use crate::sql::SqlAdapter;
use crate::warehouse::WarehouseAdapter;
use fieldsync_common::error::SyncerResult;
use fieldsync_db::conf::models::{ServiceType, SyncerConf};

/// One source row, column name to value.
pub type SourceRow = HashMap<String, serde_json::Value>;

/// A connected external tabular source. Variants are chosen at construction
/// from the conf's service type; callers only see this surface.
#[async_trait]
pub trait SourceAdapter: Send + Sync + std::fmt::Debug {
    /// `SELECT COUNT(*)` over the configured table.
    async fn total_rows(&self) -> SyncerResult<i64>;

    /// Build the batch SELECT. A non-empty `in_list` renders a
    /// `WHERE <relation_column> IN (…)` query and ignores the offset;
    /// otherwise the query pages with OFFSET and, when `limit > 0`, LIMIT.
    fn generate_query(&self, offset: i64, limit: i64, in_list: &[String]) -> SyncerResult<String>;

    async fn execute(&self, query: &str) -> SyncerResult<Vec<SourceRow>>;

    async fn close(&self) -> SyncerResult<()>;

    fn conf(&self) -> &SyncerConf;
}

/// Construct the adapter variant for the conf's service type.
pub async fn new_adapter(conf: SyncerConf) -> SyncerResult<Arc<dyn SourceAdapter>> {
    conf.validate()?;
    match conf.service.service_type {
        ServiceType::Sql => Ok(Arc::new(SqlAdapter::new(conf)?)),
        ServiceType::Warehouse => Ok(Arc::new(WarehouseAdapter::new(conf)?)),
        ServiceType::QueryService => Ok(Arc::new(QueryServiceAdapter::new(conf)?)),
    }
}

/// Shared SELECT builder: the relation column always leads the column list.
pub(crate) fn build_select(conf: &SyncerConf, offset: i64, limit: i64, in_list: &[String]) -> String {
    let table = &conf.table;
    let mut columns = Vec::with_capacity(table.columns.len() + 1);
    columns.push(table.relation_column.as_str());
    columns.extend(table.columns.iter().map(|c| c.name.as_str()));
    let column_list = columns.join(", ");

    if !in_list.is_empty() {
        let quoted: Vec<String> = in_list
            .iter()
            .map(|v| format!("'{}'", v.replace('\'', "''")))
            .collect();
        return format!(
            "SELECT {column_list} FROM {} WHERE {} IN ({})",
            table.name,
            table.relation_column,
            quoted.join(", ")
        );
    }

    let mut query = format!("SELECT {column_list} FROM {} OFFSET {offset}", table.name);
    if limit > 0 {
        query = format!("{query} LIMIT {limit}");
    }
    query
}
