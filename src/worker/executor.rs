use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backoff::{backoff_delay, sleep_or_cancel};
use crate::config::ExecutorConfig;
use crate::error::{FleetError, Result};
use crate::protocol::{DispatchCommand, ExecutionOutcome};

const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Raw result of one successful round trip.
#[derive(Debug)]
struct HttpResponse {
    status: StatusCode,
    body: String,
}

#[derive(Debug)]
enum AttemptError {
    Timeout(Duration),
    Transport(reqwest::Error),
    Cancelled,
}

impl AttemptError {
    /// Timeouts and connection-level failures are worth another try; a
    /// request that cannot even be built is not.
    fn is_transient(&self) -> bool {
        match self {
            AttemptError::Timeout(_) => true,
            AttemptError::Transport(e) => !e.is_builder() && !e.is_redirect(),
            AttemptError::Cancelled => false,
        }
    }

    fn describe(&self) -> String {
        match self {
            AttemptError::Timeout(t) => format!("Request timed out after {} seconds", t.as_secs()),
            AttemptError::Transport(e) => format!("HTTP request failed: {}", e),
            AttemptError::Cancelled => "Job execution was cancelled".to_string(),
        }
    }
}

/// Performs the outbound HTTP call for a command.
///
/// Shared by the coordinator (local mode) and the worker execution pool.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    config: ExecutorConfig,
}

impl HttpExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        let client = Client::builder().build().map_err(FleetError::Http)?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: ExecutorConfig) -> Self {
        Self { client, config }
    }

    /// Run `command` with per-attempt timeout and exponential-backoff retries
    /// on transient failures.
    ///
    /// Returns `None` if `cancel` fires before an outcome exists.
    pub async fn execute(
        &self,
        command: &DispatchCommand,
        cancel: &CancellationToken,
    ) -> Option<ExecutionOutcome> {
        let started = Instant::now();
        let timeout = command.timeout().unwrap_or(self.config.default_timeout);

        tracing::info!(
            job_id = command.job_id,
            job_name = %command.job_name,
            method = %command.method,
            url = %command.url,
            "Executing job"
        );

        let method = match Method::from_bytes(command.method.trim().to_ascii_uppercase().as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                tracing::error!(job_id = command.job_id, method = %command.method, "Invalid HTTP method");
                return Some(self.outcome_from_error(
                    command,
                    started,
                    format!("Invalid HTTP method: {}", command.method),
                ));
            }
        };

        let mut attempt: u32 = 0;
        let result = loop {
            match self.attempt(&method, command, timeout, cancel).await {
                Ok(response) => break Ok(response),
                Err(AttemptError::Cancelled) => {
                    tracing::warn!(job_id = command.job_id, "Job execution was cancelled");
                    return None;
                }
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(self.config.retry_delay, attempt);
                    tracing::warn!(
                        job_id = command.job_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err.describe(),
                        "HTTP attempt failed, retrying"
                    );
                    if !sleep_or_cancel(delay, cancel).await {
                        return None;
                    }
                    attempt += 1;
                }
                Err(err) => break Err(err),
            }
        };

        let outcome = match result {
            Ok(response) => self.outcome_from_response(command, started, response),
            Err(err) => {
                tracing::error!(
                    job_id = command.job_id,
                    attempts = attempt + 1,
                    error = %err.describe(),
                    "Job execution failed"
                );
                self.outcome_from_error(command, started, err.describe())
            }
        };

        tracing::info!(
            job_id = command.job_id,
            success = outcome.success,
            status_code = ?outcome.status_code,
            duration_ms = outcome.duration_ms,
            "Job executed"
        );
        Some(outcome)
    }

    async fn attempt(
        &self,
        method: &Method,
        command: &DispatchCommand,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> std::result::Result<HttpResponse, AttemptError> {
        let request = self.build_request(method.clone(), command);
        let call = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>(HttpResponse { status, body })
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(AttemptError::Cancelled),
            result = tokio::time::timeout(timeout, call) => match result {
                Err(_) => Err(AttemptError::Timeout(timeout)),
                Ok(Err(e)) => Err(AttemptError::Transport(e)),
                Ok(Ok(response)) => Ok(response),
            },
        }
    }

    fn build_request(&self, method: Method, command: &DispatchCommand) -> RequestBuilder {
        let carries_body = method_carries_body(&method);
        let mut builder = self.client.request(method, &command.url);
        let mut content_type: Option<HeaderValue> = None;

        for (name, value) in &command.headers {
            let header_name = match HeaderName::from_bytes(name.trim().as_bytes()) {
                Ok(name) => name,
                Err(e) => {
                    tracing::warn!(job_id = command.job_id, header = %name, error = %e, "Skipping invalid header name");
                    continue;
                }
            };
            let header_value = match HeaderValue::from_str(value) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(job_id = command.job_id, header = %name, error = %e, "Skipping invalid header value");
                    continue;
                }
            };

            if header_name == CONTENT_TYPE {
                content_type = Some(header_value);
            } else if header_name == reqwest::header::CONTENT_LENGTH {
                // Computed from the body.
            } else {
                builder = builder.header(header_name, header_value);
            }
        }

        if carries_body && !command.body.is_empty() {
            let content_type =
                content_type.unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
            builder = builder
                .header(CONTENT_TYPE, content_type)
                .body(command.body.clone());
        }

        builder
    }

    fn outcome_from_response(
        &self,
        command: &DispatchCommand,
        started: Instant,
        response: HttpResponse,
    ) -> ExecutionOutcome {
        let success = response.status.is_success();
        ExecutionOutcome {
            job_id: command.job_id,
            worker_id: None,
            success,
            status_code: Some(response.status.as_u16()),
            response: response.body,
            error: (!success).then(|| format!("HTTP {}", response.status)),
            duration_ms: started.elapsed().as_millis() as u64,
            fired_at: command.scheduled_at,
            completed_at: Utc::now(),
        }
        .bounded()
    }

    fn outcome_from_error(
        &self,
        command: &DispatchCommand,
        started: Instant,
        error: String,
    ) -> ExecutionOutcome {
        ExecutionOutcome {
            job_id: command.job_id,
            worker_id: None,
            success: false,
            status_code: None,
            response: String::new(),
            error: Some(error),
            duration_ms: started.elapsed().as_millis() as u64,
            fired_at: command.scheduled_at,
            completed_at: Utc::now(),
        }
        .bounded()
    }
}

/// POST, PUT and PATCH carry a body; every other method is sent without one.
pub fn method_carries_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}
