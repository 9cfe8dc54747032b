//! HTTP client for the dashboard backend.
//!
//! Stateless request/response wrappers around the REST surface: test-case
//! CRUD and execution, test-result queries, and scheduled-task management.
//! Read requests retry on transient failures; mutating requests are sent
//! exactly once (re-running a test on a timed-out POST is not safe).

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::retry::{retry_async, RetryPolicy};

const ERROR_BODY_SNIPPET_LEN: usize = 200;
/// Default backend address for local development.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000";

/// Default timeouts and retry settings for the REST client.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DashboardApiDefaults;

impl DashboardApiDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Tunables for [`DashboardApiClient`].
#[derive(Clone, Debug)]
pub struct DashboardApiOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for DashboardApiOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DashboardApiDefaults::CONNECT_TIMEOUT,
            request_timeout: DashboardApiDefaults::REQUEST_TIMEOUT,
            retry_policy: RetryPolicy::dashboard_reads(),
        }
    }
}

/// Client for the dashboard REST API.
#[derive(Clone)]
pub struct DashboardApiClient {
    http: Client,
    base_url: String,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl DashboardApiClient {
    /// Creates a client against [`DEFAULT_API_BASE_URL`].
    pub fn new() -> Result<Self, DashboardApiError> {
        Self::with_options(DashboardApiOptions::default())
    }

    /// Creates a client with explicit timeouts and retry settings.
    pub fn with_options(options: DashboardApiOptions) -> Result<Self, DashboardApiError> {
        let http = Client::builder()
            .no_proxy()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(DashboardApiError::Transport)?;

        Ok(Self {
            http,
            base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: options.request_timeout,
            retry_policy: options.retry_policy,
        })
    }

    /// Sets an explicit backend base URL, overriding the default.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = base_url.trim().trim_end_matches('/').to_string();
        self
    }

    /// Lists all test cases.
    pub async fn list_test_cases(&self) -> Result<Vec<TestCase>, DashboardApiError> {
        self.get_json("/test-cases", &[]).await
    }

    /// Creates a test case and returns the stored record.
    pub async fn create_test_case(
        &self,
        request: &NewTestCase,
    ) -> Result<TestCase, DashboardApiError> {
        let endpoint = self.endpoint("/test-cases");
        self.request_attempt(self.http.post(&endpoint).json(request))
            .await
    }

    /// Updates a test case; unset fields keep their current values.
    pub async fn update_test_case(
        &self,
        id: i64,
        request: &UpdateTestCase,
    ) -> Result<TestCase, DashboardApiError> {
        let endpoint = self.endpoint(&format!("/test-cases/{id}"));
        self.request_attempt(self.http.put(&endpoint).json(request))
            .await
    }

    /// Deletes a test case along with its results and scheduled tasks.
    pub async fn delete_test_case(&self, id: i64) -> Result<(), DashboardApiError> {
        let endpoint = self.endpoint(&format!("/test-cases/{id}"));
        let _: Value = self.request_attempt(self.http.delete(&endpoint)).await?;
        Ok(())
    }

    /// Runs a test case synchronously and returns the outcome.
    pub async fn run_test_case(
        &self,
        id: i64,
        parameters: Value,
    ) -> Result<TestRun, DashboardApiError> {
        let endpoint = self.endpoint(&format!("/test-cases/{id}/run"));
        let body = RunTestCaseRequest { parameters };
        self.request_attempt(self.http.post(&endpoint).json(&body))
            .await
    }

    /// Lists test results, optionally filtered by test case.
    pub async fn list_test_results(
        &self,
        test_case_id: Option<i64>,
    ) -> Result<Vec<TestResult>, DashboardApiError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(id) = test_case_id {
            query.push(("test_case_id", id.to_string()));
        }
        self.get_json("/test-results", &query).await
    }

    /// Fetches a single test result.
    pub async fn get_test_result(&self, id: i64) -> Result<TestResult, DashboardApiError> {
        self.get_json(&format!("/test-results/{id}"), &[]).await
    }

    /// Lists all scheduled tasks.
    pub async fn list_scheduled_tasks(&self) -> Result<Vec<ScheduledTask>, DashboardApiError> {
        self.get_json("/scheduled-tasks", &[]).await
    }

    /// Registers a scheduled task and returns its id.
    pub async fn create_scheduled_task(
        &self,
        request: &NewScheduledTask,
    ) -> Result<CreatedScheduledTask, DashboardApiError> {
        let endpoint = self.endpoint("/scheduled-tasks");
        self.request_attempt(self.http.post(&endpoint).json(request))
            .await
    }

    /// Updates a scheduled task and returns the stored record.
    pub async fn update_scheduled_task(
        &self,
        id: i64,
        request: &UpdateScheduledTask,
    ) -> Result<ScheduledTask, DashboardApiError> {
        let endpoint = self.endpoint(&format!("/scheduled-tasks/{id}"));
        self.request_attempt(self.http.put(&endpoint).json(request))
            .await
    }

    /// Removes a scheduled task.
    pub async fn delete_scheduled_task(&self, id: i64) -> Result<(), DashboardApiError> {
        let endpoint = self.endpoint(&format!("/scheduled-tasks/{id}"));
        let _: Value = self.request_attempt(self.http.delete(&endpoint)).await?;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, DashboardApiError>
    where
        T: DeserializeOwned,
    {
        let endpoint = self.endpoint(path);
        let policy = self.retry_policy.clone();

        retry_async(
            &policy,
            |_| {
                let endpoint = endpoint.clone();
                async move {
                    self.request_attempt(self.http.get(&endpoint).query(query))
                        .await
                }
            },
            DashboardApiError::is_retryable,
        )
        .await
    }

    async fn request_attempt<T>(&self, builder: RequestBuilder) -> Result<T, DashboardApiError>
    where
        T: DeserializeOwned,
    {
        let response = builder
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(DashboardApiError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(DashboardApiError::Transport)?;

        if !status.is_success() {
            return Err(DashboardApiError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        serde_json::from_str(&body).map_err(|err| DashboardApiError::Parse(err.to_string()))
    }
}

/// Stored test case.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub command: String,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Payload for creating a test case.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NewTestCase {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Partial update for a test case; `None` fields are left unchanged.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct UpdateTestCase {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Clone, Debug, Serialize)]
struct RunTestCaseRequest {
    parameters: Value,
}

/// Execution status of a test run.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Any status value this SDK version does not know about.
    #[serde(other)]
    Unknown,
}

/// Outcome of a synchronous test-case run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TestRun {
    pub status: RunStatus,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub perf_data: Option<Value>,
    #[serde(default)]
    pub benchmark_data: Option<Value>,
    #[serde(default)]
    pub flamegraph_path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Stored test result.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
    pub id: i64,
    pub test_case_id: i64,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub perf_data: Option<Value>,
    #[serde(default)]
    pub benchmark_data: Option<Value>,
    #[serde(default)]
    pub flamegraph_path: Option<String>,
    #[serde(default)]
    pub result_dir: Option<String>,
}

/// Stored scheduled task.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScheduledTask {
    pub id: i64,
    pub test_case_id: i64,
    pub schedule_type: String,
    pub cron_expression: String,
    pub is_active: bool,
}

/// Payload for registering a scheduled task.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NewScheduledTask {
    pub test_case_id: i64,
    pub schedule_type: String,
    pub cron_expression: String,
}

/// Creation acknowledgement; the backend returns only the new id.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct CreatedScheduledTask {
    pub id: i64,
}

/// Partial update for a scheduled task; `None` fields are left unchanged.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct UpdateScheduledTask {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// Errors produced by the REST client.
#[derive(Debug, Error)]
pub enum DashboardApiError {
    /// Request never produced an HTTP response.
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    /// Backend answered with a non-success status.
    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    /// Response body did not match the expected shape.
    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl DashboardApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Parse(_) => false,
        }
    }
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error.or(parsed.message) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
