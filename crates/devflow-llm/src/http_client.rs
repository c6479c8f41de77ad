//! Shared HTTP plumbing for HTTP completion backends.
//!
//! A request is sent once. Retries are owned by the phase executor so that
//! every attempt is visible in the task's execution log.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

use devflow_utils::error::LlmError;

/// Upper bound applied to caller-supplied timeouts.
const DEFAULT_MAX_HTTP_TIMEOUT: Duration = Duration::from_secs(600);

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub(crate) struct HttpClient {
    client: Client,
    max_timeout: Duration,
}

impl HttpClient {
    pub fn new() -> Result<Self, LlmError> {
        Self::with_max_timeout(DEFAULT_MAX_HTTP_TIMEOUT)
    }

    pub fn with_max_timeout(max_timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| LlmError::Misconfiguration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_timeout,
        })
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }

    #[cfg(test)]
    pub fn max_timeout(&self) -> Duration {
        self.max_timeout
    }

    /// Send one request, mapping transport failures and error statuses to [`LlmError`].
    pub async fn execute(
        &self,
        request: RequestBuilder,
        request_timeout: Duration,
        provider_name: &str,
    ) -> Result<Response, LlmError> {
        let effective_timeout = request_timeout.min(self.max_timeout);

        debug!(
            provider = provider_name,
            timeout_secs = effective_timeout.as_secs(),
            "Executing HTTP request"
        );

        let response = request.timeout(effective_timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    duration: effective_timeout,
                }
            } else {
                LlmError::Transport(format!(
                    "{provider_name} request failed: {}",
                    redact_error_message(&e.to_string())
                ))
            }
        })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(map_client_error(status, provider_name));
        }
        if status.is_server_error() {
            return Err(LlmError::ProviderOutage(format!(
                "{provider_name} returned server error: {status}"
            )));
        }

        Ok(response)
    }
}

fn map_client_error(status: StatusCode, provider_name: &str) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LlmError::ProviderAuth(format!("{provider_name} authentication failed: {status}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            LlmError::ProviderQuota(format!("{provider_name} rate limit exceeded: {status}"))
        }
        StatusCode::REQUEST_TIMEOUT => LlmError::Transport(format!(
            "{provider_name} timed out server-side: {status}"
        )),
        _ => LlmError::Misconfiguration(format!(
            "{provider_name} rejected the request: {status}"
        )),
    }
}

/// URLs with embedded credentials
static URL_WITH_CREDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(https?://)[^:@\s]+:[^@\s]+@").expect("static regex"));

/// Long alphanumeric runs that may be API keys
static POTENTIAL_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:sk-)?[A-Za-z0-9_-]{32,}\b").expect("static regex"));

/// Strip credentials from error text before it is logged or recorded.
pub(crate) fn redact_error_message(message: &str) -> String {
    let redacted = URL_WITH_CREDS.replace_all(message, "$1[REDACTED]@");
    POTENTIAL_KEY
        .replace_all(&redacted, "[REDACTED_KEY]")
        .to_string()
}
