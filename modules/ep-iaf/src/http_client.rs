use std::time::Duration;

use ep_common::backoff::BackoffPolicy;
use ep_common::CoreError;
use reqwest::{Method, StatusCode};

/// Status-code classification used to decide whether the shared HTTP
/// client retries a call (§4.2 "HTTP client").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Client,
    RateLimit,
    Server,
    Network,
}

pub fn classify_status(status: StatusCode) -> StatusClass {
    match status.as_u16() {
        408 | 429 => StatusClass::RateLimit,
        400..=499 => StatusClass::Client,
        500..=599 => StatusClass::Server,
        _ => StatusClass::Server,
    }
}

/// Thin wrapper over `reqwest::Client` carrying the retry/backoff,
/// `Idempotency-Key` injection, and `Retry-After` honoring described in
/// §4.2, shared by every adapter's outbound calls.
pub struct RetryingHttpClient {
    client: reqwest::Client,
    backoff: BackoffPolicy,
    max_retries: u32,
    timeout: Duration,
}

impl RetryingHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build reqwest client"),
            backoff: BackoffPolicy::default(),
            max_retries,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Issue a request, retrying `server` and `network` failures up to
    /// `max_retries`, honoring `Retry-After` on 429/503 over the computed
    /// backoff delay (§4.2, §4.4). `idempotency_key` is injected as the
    /// `Idempotency-Key` header on POST, the way every outbound action
    /// call must carry one (§6 "Outbound HTTP").
    pub async fn send_with_retry(
        &self,
        method: Method,
        url: &str,
        idempotency_key: Option<&str>,
        body: Option<serde_json::Value>,
        headers: &[(&str, String)],
    ) -> Result<reqwest::Response, CoreError> {
        let mut rng = rand::thread_rng();
        let mut attempt = 0u32;

        loop {
            let mut req = self.client.request(method.clone(), url);
            if let Some(key) = idempotency_key {
                if method == Method::POST {
                    req = req.header("Idempotency-Key", key);
                }
            }
            for (name, value) in headers {
                req = req.header(*name, value);
            }
            if let Some(ref b) = body {
                req = req.json(b);
            }

            let result = req.send().await;

            let (class, retry_after, err) = match &result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(result.unwrap());
                    }
                    let retry_after = resp
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .map(Duration::from_secs);
                    let class = classify_status(status);
                    let err = match class {
                        StatusClass::Client => CoreError::Validation(format!("client error {status}")),
                        StatusClass::RateLimit => CoreError::RateLimit {
                            retry_after_secs: retry_after.map(|d| d.as_secs()),
                        },
                        StatusClass::Server => CoreError::UpstreamError(format!("server error {status}")),
                        StatusClass::Network => CoreError::UpstreamError("network error".to_string()),
                    };
                    (class, retry_after, err)
                }
                Err(e) => (
                    StatusClass::Network,
                    None,
                    CoreError::UpstreamError(format!("network error: {e}")),
                ),
            };

            let retryable = matches!(class, StatusClass::Server | StatusClass::Network | StatusClass::RateLimit);
            if !retryable || attempt >= self.max_retries {
                return Err(err);
            }

            let delay = self.backoff.delay_with_retry_after(attempt, retry_after, &mut rng);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
