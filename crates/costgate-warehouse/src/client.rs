//! BigQuery REST client implementing the warehouse traits.
//!
//! # Calls
//!
//! - Dry run: `POST /projects/{project}/queries` with `dryRun=true` and the
//!   service-side query cache disabled; the answer carries
//!   `totalBytesProcessed`.
//! - Execution: the same call with `dryRun=false`, then
//!   `GET /projects/{project}/queries/{jobId}` until the job is complete and
//!   every page has been fetched.
//!
//! HTTP 400 maps to [`WarehouseError::BadRequest`], the only retryable class.

use crate::api::{ErrorEnvelope, JobReference, QueryRequest, QueryResponse, TableRow, TableSchema};
use crate::auth::{token_provider, TokenProvider};
use crate::rows::rows_to_batch;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use costgate_core::{
    CoreError, CoreResult, CostgateConfig, WarehouseError, WarehouseEstimator, WarehouseRunner,
};
use reqwest::{RequestBuilder, StatusCode};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Public REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Authenticated client bound to one billing project.
pub struct BigQueryClient {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    base_url: String,
    project_id: String,
    location: Option<String>,
    poll_timeout_ms: u64,
}

impl BigQueryClient {
    pub fn new(project_id: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens,
            base_url: DEFAULT_BASE_URL.to_string(),
            project_id: project_id.into(),
            location: None,
            poll_timeout_ms: 10_000,
        }
    }

    /// Build a client from configuration.
    ///
    /// The billing project comes from configuration, then from the
    /// credentials, then from `GOOGLE_CLOUD_PROJECT` / `GCLOUD_PROJECT`.
    pub fn from_config(config: &CostgateConfig) -> CoreResult<Self> {
        let tokens = token_provider(&config.auth)?;
        let project_id = config
            .warehouse
            .project_id
            .clone()
            .or_else(|| tokens.project_id())
            .or_else(|| std::env::var("GOOGLE_CLOUD_PROJECT").ok())
            .or_else(|| std::env::var("GCLOUD_PROJECT").ok())
            .ok_or_else(|| {
                CoreError::validation(
                    "no billing project: set warehouse.project_id or GOOGLE_CLOUD_PROJECT",
                )
            })?;

        info!(project = %project_id, "BigQuery client configured");

        let mut client = Self::new(project_id, tokens).with_poll_timeout_ms(config.warehouse.poll_timeout_ms);
        client.location = config.warehouse.location.clone();
        Ok(client)
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn with_poll_timeout_ms(mut self, poll_timeout_ms: u64) -> Self {
        self.poll_timeout_ms = poll_timeout_ms;
        self
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn post_query(&self, request: &QueryRequest<'_>) -> Result<QueryResponse, WarehouseError> {
        let url = format!("{}/projects/{}/queries", self.base_url, self.project_id);
        self.send(self.http.post(url).json(request)).await
    }

    async fn get_query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, WarehouseError> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.base_url, job.project_id, job.job_id
        );

        let mut params = vec![("timeoutMs", self.poll_timeout_ms.to_string())];
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            params.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        self.send(self.http.get(url).query(&params)).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<QueryResponse, WarehouseError> {
        let token = self.tokens.access_token().await?;
        let resp = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| WarehouseError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<QueryResponse>()
                .await
                .map_err(|e| WarehouseError::Decode(format!("invalid query response: {e}")));
        }

        let body = resp.text().await.unwrap_or_default();
        Err(error_from_status(status, &body))
    }
}

/// Map a non-2xx answer to the warehouse error taxonomy.
pub(crate) fn error_from_status(status: StatusCode, body: &str) -> WarehouseError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error.message)
        .unwrap_or_else(|| format!("{status}: {body}"));

    match status {
        StatusCode::BAD_REQUEST => WarehouseError::BadRequest(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => WarehouseError::Unauthorized(message),
        s if s.is_server_error() => WarehouseError::Transport(message),
        _ => WarehouseError::Job(message),
    }
}

#[async_trait]
impl WarehouseEstimator for BigQueryClient {
    async fn dry_run(&self, sql: &str) -> Result<u64, WarehouseError> {
        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            dry_run: true,
            use_query_cache: false,
            location: self.location.as_deref(),
            timeout_ms: None,
        };

        let response = self.post_query(&request).await?;
        let bytes = response
            .total_bytes_processed
            .as_deref()
            .ok_or_else(|| WarehouseError::Decode("dry run returned no byte estimate".into()))?
            .parse::<u64>()
            .map_err(|e| WarehouseError::Decode(format!("invalid byte estimate: {e}")))?;

        debug!(bytes, "dry run complete");
        Ok(bytes)
    }
}

#[async_trait]
impl WarehouseRunner for BigQueryClient {
    async fn execute(&self, sql: &str) -> Result<RecordBatch, WarehouseError> {
        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            dry_run: false,
            use_query_cache: true,
            location: self.location.as_deref(),
            timeout_ms: Some(self.poll_timeout_ms),
        };

        let mut response = self.post_query(&request).await?;
        let mut job = response.job_reference.take();
        let mut schema: Option<TableSchema> = None;
        let mut rows: Vec<TableRow> = Vec::new();
        let mut pages = 0usize;

        loop {
            if let Some(reference) = response.job_reference.take() {
                job = Some(reference);
            }

            if response.job_complete == Some(false) {
                let running = job
                    .as_ref()
                    .ok_or_else(|| WarehouseError::Decode("running job has no reference".into()))?;
                debug!(job_id = %running.job_id, "job still running");
                response = self.get_query_results(running, None).await?;
                continue;
            }

            for error in &response.errors {
                warn!(
                    reason = error.reason.as_deref().unwrap_or("unknown"),
                    message = error.message.as_deref().unwrap_or(""),
                    "warehouse reported a job message"
                );
            }

            if schema.is_none() {
                schema = response.schema.take();
            }
            rows.append(&mut response.rows);
            pages += 1;

            match response.page_token.take() {
                Some(token) => {
                    let complete = job
                        .as_ref()
                        .ok_or_else(|| WarehouseError::Decode("paged result has no job reference".into()))?;
                    response = self.get_query_results(complete, Some(&token)).await?;
                }
                None => break,
            }
        }

        info!(rows = rows.len(), pages, "query results fetched");
        rows_to_batch(schema.as_ref(), &rows)
    }
}

/// A [`BigQueryClient`] built from configuration on first use.
///
/// Credentials and the billing project are only resolved when a dry run or
/// execution is actually needed, so cache hits work without either.
pub struct LazyBigQueryClient {
    config: CostgateConfig,
    client: OnceCell<BigQueryClient>,
}

impl LazyBigQueryClient {
    #[must_use]
    pub fn new(config: CostgateConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    /// Whether the underlying client has been built yet.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.client.initialized()
    }

    async fn client(&self) -> Result<&BigQueryClient, WarehouseError> {
        self.client
            .get_or_try_init(|| async {
                BigQueryClient::from_config(&self.config)
                    .map_err(|e| WarehouseError::Unauthorized(e.to_string()))
            })
            .await
    }
}

#[async_trait]
impl WarehouseEstimator for LazyBigQueryClient {
    async fn dry_run(&self, sql: &str) -> Result<u64, WarehouseError> {
        self.client().await?.dry_run(sql).await
    }
}

#[async_trait]
impl WarehouseRunner for LazyBigQueryClient {
    async fn execute(&self, sql: &str) -> Result<RecordBatch, WarehouseError> {
        self.client().await?.execute(sql).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_uses_remote_message() {
        let body = r#"{"error": {"code": 400, "message": "Syntax error: Unexpected end of script at [1:7]"}}"#;
        let err = error_from_status(StatusCode::BAD_REQUEST, body);
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "bad request: Syntax error: Unexpected end of script at [1:7]"
        );
    }

    #[tokio::test]
    async fn test_lazy_client_defers_credential_errors() {
        let config = CostgateConfig {
            auth: costgate_core::AuthMode::ServiceAccount {
                path: "/nonexistent/costgate-key.json".into(),
            },
            ..CostgateConfig::default()
        };

        let lazy = LazyBigQueryClient::new(config);
        assert!(!lazy.is_resolved());

        let err = lazy.dry_run("SELECT 1").await.unwrap_err();
        assert!(matches!(err, WarehouseError::Unauthorized(_)));
        assert!(err.to_string().contains("cannot read credentials file"));
        assert!(!lazy.is_resolved());
    }

    #[test]
    fn test_status_classes() {
        assert!(matches!(
            error_from_status(StatusCode::FORBIDDEN, "{}"),
            WarehouseError::Unauthorized(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::SERVICE_UNAVAILABLE, "busy"),
            WarehouseError::Transport(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::NOT_FOUND, "gone"),
            WarehouseError::Job(_)
        ));
    }
}
