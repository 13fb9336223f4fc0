use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::adapter::{build_select, SourceAdapter, SourceRow};
use fieldsync_common::error::{SyncerError, SyncerResult};
use fieldsync_db::conf::models::SyncerConf;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Source adapter for cloud warehouses that expose a paginated REST query
/// endpoint (`access.endpoint` + `access.api_token`).
#[derive(Debug)]
pub struct WarehouseAdapter {
    conf: SyncerConf,
    client: Client,
    endpoint: String,
    api_token: String,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryPage {
    #[serde(default)]
    rows: Vec<SourceRow>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl WarehouseAdapter {
    pub fn new(conf: SyncerConf) -> SyncerResult<Self> {
        let endpoint = conf.service.access_str("endpoint")?;
        let api_token = conf.service.access_str("api_token")?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncerError::Config(format!("failed to build warehouse client: {e}")))?;

        Ok(Self {
            conf,
            client,
            endpoint,
            api_token,
        })
    }

    async fn fetch_page(&self, query: &str, page_token: Option<&str>) -> SyncerResult<QueryPage> {
        let response = self
            .client
            .post(format!("{}/queries", self.endpoint))
            .bearer_auth(&self.api_token)
            .json(&QueryRequest { query, page_token })
            .send()
            .await
            .map_err(|e| SyncerError::Source(format!("warehouse request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncerError::Source(format!(
                "warehouse returned {status}: {body}"
            )));
        }

        response
            .json::<QueryPage>()
            .await
            .map_err(|e| SyncerError::Source(format!("warehouse response not decodable: {e}")))
    }
}

#[async_trait]
impl SourceAdapter for WarehouseAdapter {
    async fn total_rows(&self) -> SyncerResult<i64> {
        let query = format!("SELECT COUNT(*) FROM {}", self.conf.table.name);
        let rows = self.execute(&query).await?;

        rows.first()
            .and_then(|row| row.values().next())
            .and_then(value_as_i64)
            .ok_or_else(|| SyncerError::Source("warehouse count query returned no value".to_owned()))
    }

    fn generate_query(&self, offset: i64, limit: i64, in_list: &[String]) -> SyncerResult<String> {
        Ok(build_select(&self.conf, offset, limit, in_list))
    }

    async fn execute(&self, query: &str) -> SyncerResult<Vec<SourceRow>> {
        tracing::info!(
            conf_id = %self.conf.id,
            service = %self.conf.service.name,
            %query,
            "syncer making query"
        );

        let mut rows = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.fetch_page(query, page_token.as_deref()).await?;
            rows.extend(page.rows);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(rows)
    }

    async fn close(&self) -> SyncerResult<()> {
        Ok(())
    }

    fn conf(&self) -> &SyncerConf {
        &self.conf
    }
}

fn value_as_i64(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
