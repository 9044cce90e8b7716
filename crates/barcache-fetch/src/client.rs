//! HTTP client shared by the vendor clients.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{RateLimiter, VendorError};

/// Configuration for the vendor HTTP client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum retry attempts for transport failures and 5xx responses.
    pub max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub base_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds).
    pub max_delay_ms: u64,
    /// User agent string.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            user_agent: format!("barcache/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP client with connection pooling and retry logic.
///
/// Rate-limit (429) and auth (401) responses are handed back to the caller
/// untouched; each vendor has its own policy for those.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: HttpConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()?;
        Ok(Self { client, config })
    }

    /// Creates a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_defaults() -> Result<Self, reqwest::Error> {
        Self::new(HttpConfig::default())
    }

    /// Returns the client configuration.
    #[must_use]
    pub const fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Sends a request, retrying transport failures and 5xx responses.
    ///
    /// `build` is called once per attempt because a sent request cannot be
    /// reused.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after all retries.
    pub async fn send<F>(&self, build: F) -> Result<Response, VendorError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempts = 0;

        loop {
            match build(&self.client).send().await {
                Ok(response) if response.status().is_server_error() => {
                    if attempts < self.config.max_retries {
                        attempts += 1;
                        let delay = self.calculate_backoff_delay(attempts);
                        debug!(
                            status = response.status().as_u16(),
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            "server error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(status_error(response).await);
                }
                Ok(response) => return Ok(response),
                Err(e) if is_retryable_error(&e) && attempts < self.config.max_retries => {
                    attempts += 1;
                    let delay = self.calculate_backoff_delay(attempts);
                    debug!(error = %e, attempt = attempts, "transport error, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Sends a request through a rate limiter.
    ///
    /// On a 429 the limiter is penalized for `cooldown` (which also clears its
    /// window) and the call is re-issued exactly once. A second 429 becomes
    /// [`VendorError::RateLimited`].
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or stays rate limited.
    pub async fn send_throttled<F>(
        &self,
        vendor: &str,
        limiter: &RateLimiter,
        cooldown: Duration,
        build: F,
    ) -> Result<Response, VendorError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        limiter.acquire().await;
        let response = self.send(&build).await?;
        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }

        warn!(
            vendor,
            cooldown_secs = cooldown.as_secs(),
            "rate limited by vendor, cooling down before one retry"
        );
        limiter.penalize(cooldown).await;
        limiter.acquire().await;

        let response = self.send(&build).await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            warn!(vendor, "still rate limited after cooldown");
            return Err(VendorError::RateLimited);
        }
        Ok(response)
    }

    /// Calculates the backoff delay with exponential backoff and jitter.
    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let exp_delay = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(10));
        let capped_delay = exp_delay.min(self.config.max_delay_ms);

        // Deterministic jitter (±25%) keyed on the attempt number
        let jitter_range = capped_delay / 4;
        let jitter = if jitter_range > 0 {
            let jitter_offset = (u64::from(attempt) * 17) % (jitter_range * 2);
            jitter_offset as i64 - jitter_range as i64
        } else {
            0
        };

        let final_delay = (capped_delay as i64 + jitter).max(100) as u64;
        Duration::from_millis(final_delay)
    }
}

/// Determines if a transport error is retryable.
fn is_retryable_error(error: &reqwest::Error) -> bool {
    if error.is_builder() {
        return false;
    }
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Converts a non-success response into a [`VendorError`].
pub(crate) async fn status_error(response: Response) -> VendorError {
    let status = response.status();
    let message = response
        .text()
        .await
        .ok()
        .filter(|body| !body.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => VendorError::Unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS => VendorError::RateLimited,
        _ => VendorError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

/// Returns the response if successful, otherwise the matching [`VendorError`].
pub(crate) async fn ensure_success(response: Response) -> Result<Response, VendorError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(status_error(response).await)
    }
}

/// Decodes a JSON body, mapping failures to [`VendorError::Decode`].
pub(crate) async fn decode_json<T: serde::de::DeserializeOwned>(
    response: Response,
) -> Result<T, VendorError> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| VendorError::Decode(e.to_string()))
}
