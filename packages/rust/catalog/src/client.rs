//! HTTP client shared by the catalog walker and the document fetcher.
//!
//! Every request carries the configured timeout. Transient failures (timeouts,
//! connection errors, 5xx, 408, 429) are retried with the configured backoff;
//! anything else is returned to the caller after a single attempt.

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use hearings_shared::{HarvestConfig, HarvestError, Result, RetryPolicy};

/// A completed HTTP exchange that is not a retryable failure.
#[derive(Debug)]
pub struct Reply {
    /// Final status (success or 404).
    pub status: StatusCode,
    /// Response body; empty for 404.
    pub body: String,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// A request that failed for good.
#[derive(Debug)]
pub struct RequestFailure {
    /// [`HarvestError::TransientFetch`] once retries are exhausted,
    /// [`HarvestError::PermanentFetch`] otherwise.
    pub error: HarvestError,
    /// Attempts used.
    pub attempts: u32,
}

/// Committees API client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ApiClient {
    /// Build a client from the runtime harvest configuration.
    pub fn new(config: &HarvestConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.timeout)
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: config.retry,
        })
    }

    /// Absolute URL for an API path such as `/OralEvidence`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// GET `url` with `query`, retrying transient failures.
    ///
    /// A 404 is returned as a [`Reply`] so callers can decide whether absence
    /// is an error.
    pub async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<Reply, RequestFailure> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            let attempts = attempt + 1;

            match self.attempt(url, query).await {
                Attempt::Done(status, body) => {
                    debug!(url, %status, attempts, body_len = body.len(), "request complete");
                    return Ok(Reply {
                        status,
                        body,
                        attempts,
                    });
                }
                Attempt::Permanent(reason) => {
                    warn!(url, attempts, %reason, "request failed permanently");
                    return Err(RequestFailure {
                        error: HarvestError::PermanentFetch(format!("{url}: {reason}")),
                        attempts,
                    });
                }
                Attempt::Transient(reason) => {
                    if attempts < max_attempts {
                        let delay = self.retry.delay_for(attempt);
                        warn!(
                            url,
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            %reason,
                            "transient failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = reason;
                }
            }
        }

        warn!(url, attempts = max_attempts, error = %last_error, "retries exhausted");
        Err(RequestFailure {
            error: HarvestError::TransientFetch(format!(
                "{url}: {last_error} (after {max_attempts} attempts)"
            )),
            attempts: max_attempts,
        })
    }

    /// One request, classified.
    async fn attempt(&self, url: &str, query: &[(&str, String)]) -> Attempt {
        let response = match self.client.get(url).query(query).send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() || e.is_redirect() => return Attempt::Permanent(e.to_string()),
            Err(e) => return Attempt::Transient(describe(&e)),
        };

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Attempt::Done(status, String::new());
        }

        if is_transient_status(status) {
            return Attempt::Transient(format!("HTTP {status}"));
        }

        if !status.is_success() {
            return Attempt::Permanent(format!("HTTP {status}"));
        }

        match response.text().await {
            Ok(body) => Attempt::Done(status, body),
            Err(e) => Attempt::Transient(format!("body read failed: {}", describe(&e))),
        }
    }
}

/// Outcome of a single request attempt.
enum Attempt {
    Done(StatusCode, String),
    Transient(String),
    Permanent(String),
}

/// Statuses worth repeating the request for.
fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Short description of a reqwest error, naming timeouts explicitly.
fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timed out: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}
