//! Remote collaborators: the examples service, the code execution service
//! and the tools catalog.
//!
//! Each collaborator is a trait so the editing session can be driven by a
//! scripted implementation in tests. [`HttpBackend`] implements all three
//! against one REST base URL:
//! - `GET    /examples`: list examples
//! - `GET    /examples/{id}`: fetch one example
//! - `POST   /examples`: create an example
//! - `PATCH  /examples/{id}`: partial update
//! - `POST   /examples/import-markdown`: parse a markdown file into an example
//! - `POST   /execute`: run one code chunk
//! - `POST   /execute/batch`: run several code chunks
//! - `GET    /tools`: list available tools
//! - `GET    /tools/{name}/schema`: parameter schema for one tool

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::BackendConfig;
use crate::models::ExecutionFailure;
use crate::schema::{ExampleUpdate, PersistedExample};

// ============================================================================
// Collaborator traits
// ============================================================================

/// Remote code execution.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, code: &str) -> Result<ExecutionOutput, BackendError>;

    /// Run several chunks in one request. Results come back in the order of
    /// `chunks`.
    async fn execute_batch(&self, chunks: &[CodeChunk]) -> Result<Vec<ChunkExecution>, BackendError>;
}

/// Remote storage of persisted examples.
#[async_trait]
pub trait ExamplesApi: Send + Sync {
    async fn list_examples(&self) -> Result<Vec<PersistedExample>, BackendError>;
    async fn get_example(&self, id: &str) -> Result<PersistedExample, BackendError>;
    async fn create_example(&self, example: &PersistedExample) -> Result<PersistedExample, BackendError>;
    async fn update_example(&self, id: &str, update: &ExampleUpdate) -> Result<PersistedExample, BackendError>;
    async fn import_markdown(&self, path: &str) -> Result<PersistedExample, BackendError>;
}

/// Read-only catalog of tools available to tool_call chunks.
#[async_trait]
pub trait ToolsCatalog: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>, BackendError>;
    async fn tool_schema(&self, name: &str) -> Result<serde_json::Value, BackendError>;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("{resource} '{id}' not found")]
    NotFound { resource: &'static str, id: String },

    #[error("batch response is missing a result for chunk {chunk_id}")]
    MissingBatchResult { chunk_id: String },

    #[error("All {attempts} retry attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl BackendError {
    /// Whether offering the user a retry makes sense.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Http(e) => !e.is_decode() && !e.is_builder(),
            BackendError::Timeout { .. } | BackendError::RetryExhausted { .. } => true,
            BackendError::Api { code, .. } => *code == 429 || *code >= 500,
            BackendError::NotFound { .. } | BackendError::MissingBatchResult { .. } => false,
        }
    }

    /// Convert into the failure annotation attached to a tool_call chunk.
    pub fn to_failure(&self) -> ExecutionFailure {
        ExecutionFailure {
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub status: String,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result text for a successful execution that produced nothing.
pub const NO_OUTPUT: &str = "(no output)";

impl ExecutionOutput {
    /// Result text for the tool_result chunk, or the failure the service
    /// reported. Structured results are pretty-printed; an empty result
    /// becomes [`NO_OUTPUT`] so the paired tool_result is never blank.
    pub fn into_result_text(self) -> Result<String, ExecutionFailure> {
        if let Some(message) = self.error.filter(|m| !m.trim().is_empty()) {
            return Err(ExecutionFailure {
                message,
                retryable: true,
            });
        }
        if !matches!(self.status.as_str(), "success" | "ok") {
            return Err(ExecutionFailure {
                message: format!("execution finished with status '{}'", self.status),
                retryable: true,
            });
        }
        let text = match self.result {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
        };
        if text.trim().is_empty() {
            Ok(NO_OUTPUT.to_string())
        } else {
            Ok(text)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub chunk_id: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkExecution {
    pub chunk_id: String,
    #[serde(flatten)]
    pub output: ExecutionOutput,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Serialize)]
struct BatchExecuteRequest<'a> {
    code_chunks: &'a [CodeChunk],
}

#[derive(Debug, Deserialize)]
struct BatchExecuteResponse {
    results: Vec<ChunkExecution>,
}

#[derive(Debug, Serialize)]
struct ImportMarkdownRequest<'a> {
    path: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub functions: Vec<ToolFunction>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(alias = "detail", alias = "message")]
    error: Option<String>,
}

// ============================================================================
// HttpBackend
// ============================================================================

/// REST client for every remote collaborator.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    config: BackendConfig,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Self::with_base_url(config, base_url)
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: BackendConfig, base_url: String) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        not_found: Option<(&'static str, &str)>,
    ) -> Result<T, BackendError> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            if let Some((resource, id)) = not_found {
                return Err(BackendError::NotFound {
                    resource,
                    id: id.to_string(),
                });
            }
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .unwrap_or(body);

            tracing::warn!(code = status.as_u16(), message = %message, "Backend API error");

            return Err(BackendError::Api {
                code: status.as_u16(),
                message,
            });
        }

        response.json::<T>().await.map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout {
                seconds: self.config.timeout_seconds,
            }
        } else {
            BackendError::Http(e)
        }
    }

    /// Idempotent GET with exponential backoff on retryable failures.
    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        path: &str,
        not_found: Option<(&'static str, &str)>,
    ) -> Result<T, BackendError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let url = self.url(path);
        let result = RetryIf::spawn(
            retry_strategy,
            || self.send::<T>(self.client.get(&url), not_found),
            |e: &BackendError| e.is_retryable(),
        )
        .await;

        match result {
            Err(e) if e.is_retryable() => {
                tracing::error!(
                    attempts = self.config.max_retries + 1,
                    error = %e,
                    url = %url,
                    "All backend retry attempts failed"
                );
                Err(BackendError::RetryExhausted {
                    attempts: self.config.max_retries + 1,
                    last: e.to_string(),
                })
            }
            other => other,
        }
    }
}

#[async_trait]
impl Executor for HttpBackend {
    async fn execute(&self, code: &str) -> Result<ExecutionOutput, BackendError> {
        let request = self
            .client
            .post(self.url("/execute"))
            .json(&ExecuteRequest { code });
        self.send(request, None).await
    }

    async fn execute_batch(&self, chunks: &[CodeChunk]) -> Result<Vec<ChunkExecution>, BackendError> {
        let request = self
            .client
            .post(self.url("/execute/batch"))
            .json(&BatchExecuteRequest {
                code_chunks: chunks,
            });
        let response: BatchExecuteResponse = self.send(request, None).await?;

        let mut results = response.results;
        chunks
            .iter()
            .map(|chunk| -> Result<ChunkExecution, BackendError> {
                let position = results
                    .iter()
                    .position(|r| r.chunk_id == chunk.chunk_id)
                    .ok_or_else(|| BackendError::MissingBatchResult {
                        chunk_id: chunk.chunk_id.clone(),
                    })?;
                Ok(results.swap_remove(position))
            })
            .collect()
    }
}

#[async_trait]
impl ExamplesApi for HttpBackend {
    async fn list_examples(&self) -> Result<Vec<PersistedExample>, BackendError> {
        self.get_with_retry("/examples", None).await
    }

    async fn get_example(&self, id: &str) -> Result<PersistedExample, BackendError> {
        self.get_with_retry(&format!("/examples/{}", id), Some(("example", id)))
            .await
    }

    async fn create_example(&self, example: &PersistedExample) -> Result<PersistedExample, BackendError> {
        let request = self.client.post(self.url("/examples")).json(example);
        let created: PersistedExample = self.send(request, None).await?;
        tracing::info!(id = %created.id, name = %created.name, "Example created");
        Ok(created)
    }

    async fn update_example(&self, id: &str, update: &ExampleUpdate) -> Result<PersistedExample, BackendError> {
        let request = self
            .client
            .patch(self.url(&format!("/examples/{}", id)))
            .json(update);
        let updated: PersistedExample = self.send(request, Some(("example", id))).await?;
        tracing::info!(id = %updated.id, "Example updated");
        Ok(updated)
    }

    async fn import_markdown(&self, path: &str) -> Result<PersistedExample, BackendError> {
        let request = self
            .client
            .post(self.url("/examples/import-markdown"))
            .json(&ImportMarkdownRequest { path });
        self.send(request, None).await
    }
}

#[async_trait]
impl ToolsCatalog for HttpBackend {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>, BackendError> {
        self.get_with_retry("/tools", None).await
    }

    async fn tool_schema(&self, name: &str) -> Result<serde_json::Value, BackendError> {
        self.get_with_retry(&format!("/tools/{}/schema", name), Some(("tool", name)))
            .await
    }
}

// ============================================================================
// TESTS
// ============================================================================
