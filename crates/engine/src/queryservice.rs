use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::adapter::{build_select, SourceAdapter, SourceRow};
use fieldsync_common::error::{SyncerError, SyncerResult};
use fieldsync_db::conf::models::SyncerConf;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Source adapter for asynchronous query services: a query is submitted as
/// an execution, polled to completion, and its result pages are then read
/// back. The first row of the first page is the column header and is
/// dropped.
#[derive(Debug)]
pub struct QueryServiceAdapter {
    conf: SyncerConf,
    client: Client,
    endpoint: String,
    api_token: String,
    database: String,
    output_location: String,
    workgroup: String,
}

#[derive(Debug, Serialize)]
struct StartExecutionRequest<'a> {
    query: &'a str,
    database: &'a str,
    output_location: &'a str,
    workgroup: &'a str,
}

#[derive(Debug, Deserialize)]
struct StartExecutionResponse {
    query_execution_id: String,
}

#[derive(Debug, Deserialize)]
struct ExecutionStatus {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultPage {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Option<String>>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl QueryServiceAdapter {
    pub fn new(conf: SyncerConf) -> SyncerResult<Self> {
        let endpoint = conf.service.access_str("endpoint")?;
        let api_token = conf.service.access_str("api_token")?;
        let database = conf.service.access_str("database")?;
        let output_location = conf.service.access_str("output_location")?;
        let workgroup = conf.service.access_str("workgroup")?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncerError::Config(format!("failed to build query service client: {e}")))?;

        Ok(Self {
            conf,
            client,
            endpoint,
            api_token,
            database,
            output_location,
            workgroup,
        })
    }

    async fn start_execution(&self, query: &str) -> SyncerResult<String> {
        let response = self
            .client
            .post(format!("{}/query-executions", self.endpoint))
            .bearer_auth(&self.api_token)
            .json(&StartExecutionRequest {
                query,
                database: &self.database,
                output_location: &self.output_location,
                workgroup: &self.workgroup,
            })
            .send()
            .await
            .map_err(|e| SyncerError::Source(format!("error starting query execution: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncerError::Source(format!(
                "query service returned {status}: {body}"
            )));
        }

        Ok(response
            .json::<StartExecutionResponse>()
            .await
            .map_err(|e| SyncerError::Source(format!("execution response not decodable: {e}")))?
            .query_execution_id)
    }

    /// Poll until the execution leaves the QUEUED/RUNNING states.
    async fn wait_for_execution(&self, execution_id: &str) -> SyncerResult<()> {
        loop {
            let status = self
                .client
                .get(format!("{}/query-executions/{execution_id}", self.endpoint))
                .bearer_auth(&self.api_token)
                .send()
                .await
                .map_err(|e| SyncerError::Source(format!("error getting query execution: {e}")))?
                .json::<ExecutionStatus>()
                .await
                .map_err(|e| SyncerError::Source(format!("status response not decodable: {e}")))?;

            match status.status.as_str() {
                "SUCCEEDED" => return Ok(()),
                "FAILED" => {
                    return Err(SyncerError::Source(format!(
                        "query execution failed: {}",
                        status.error_message.unwrap_or_else(|| "unknown".to_owned())
                    )))
                }
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }

    async fn fetch_results_page(
        &self,
        execution_id: &str,
        page_token: Option<&str>,
    ) -> SyncerResult<ResultPage> {
        let mut request = self
            .client
            .get(format!(
                "{}/query-executions/{execution_id}/results",
                self.endpoint
            ))
            .bearer_auth(&self.api_token);
        if let Some(token) = page_token {
            request = request.query(&[("page_token", token)]);
        }

        request
            .send()
            .await
            .map_err(|e| SyncerError::Source(format!("failed to get query results: {e}")))?
            .json::<ResultPage>()
            .await
            .map_err(|e| SyncerError::Source(format!("results response not decodable: {e}")))
    }

    async fn collect_rows(&self, execution_id: &str) -> SyncerResult<Vec<SourceRow>> {
        let mut rows = Vec::new();
        let mut page_token: Option<String> = None;
        let mut first_page = true;

        loop {
            let page = self
                .fetch_results_page(execution_id, page_token.as_deref())
                .await?;

            let mut page_rows = page.rows.into_iter();
            if first_page {
                // The provider echoes the column names as the first row.
                page_rows.next();
                first_page = false;
            }

            for values in page_rows {
                let mut row = SourceRow::new();
                for (column, value) in page.columns.iter().zip(values) {
                    if let Some(value) = value {
                        row.insert(column.clone(), serde_json::Value::String(value));
                    }
                }
                rows.push(row);
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(rows)
    }
}

#[async_trait]
impl SourceAdapter for QueryServiceAdapter {
    async fn total_rows(&self) -> SyncerResult<i64> {
        let query = format!("SELECT COUNT(*) FROM {}", self.conf.table.name);
        let rows = self.execute(&query).await?;

        rows.first()
            .and_then(|row| row.values().next())
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                SyncerError::Source("query service count query returned no value".to_owned())
            })
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

        let execution_id = self.start_execution(query).await?;
        self.wait_for_execution(&execution_id).await?;
        self.collect_rows(&execution_id).await
    }

    async fn close(&self) -> SyncerResult<()> {
        Ok(())
    }

    fn conf(&self) -> &SyncerConf {
        &self.conf
    }
}
