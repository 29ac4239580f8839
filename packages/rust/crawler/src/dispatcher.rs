//! Rate-limited request dispatcher.
//!
//! Every request to the remote API goes through [`Dispatcher::submit`], which
//! acquires a token from the run's shared [`RateBudget`] before each attempt
//! and retries throttled or transient failures with exponential backoff.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::Rng;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use reviewcrawl_shared::{CrawlConfig, Result, ReviewCrawlError};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("reviewcrawl/", env!("CARGO_PKG_VERSION"));

/// Longest response snippet kept in a permanent-failure message.
const ERROR_BODY_LIMIT: usize = 200;

// ---------------------------------------------------------------------------
// RateBudget
// ---------------------------------------------------------------------------

/// Token bucket shared by every request of a run.
///
/// Cloning is cheap; all clones draw from the same bucket.
#[derive(Clone)]
pub struct RateBudget {
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl RateBudget {
    /// Bucket refilling at `requests_per_second` (fractional rates allowed)
    /// and holding up to `burst` tokens.
    pub fn new(requests_per_second: f64, burst: u32) -> Result<Self> {
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            return Err(ReviewCrawlError::config(format!(
                "requests_per_second must be positive, got {requests_per_second}"
            )));
        }

        let period = Duration::try_from_secs_f64(1.0 / requests_per_second).map_err(|_| {
            ReviewCrawlError::config(format!(
                "requests_per_second is too small, got {requests_per_second}"
            ))
        })?;
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(period)
            .ok_or_else(|| ReviewCrawlError::config("request rate is too high"))?
            .allow_burst(burst);

        Ok(Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Wait until a token is available and consume it.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}

impl std::fmt::Debug for RateBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateBudget").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounds for retrying transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub base_delay: Duration,
    /// Cap for the exponential component.
    pub max_delay: Duration,
}

impl From<&CrawlConfig> for RetryPolicy {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Delay before retry number `retry` (1-based).
///
/// `base * 2^(retry-1)` capped at `max_delay`, plus uniform jitter of up to
/// half the capped value. A server-provided `retry_after` raises the result
/// but is itself capped at `max_delay`.
pub fn backoff_delay<R: Rng>(
    policy: &RetryPolicy,
    retry: u32,
    retry_after: Option<Duration>,
    rng: &mut R,
) -> Duration {
    let factor = 1u32
        .checked_shl(retry.saturating_sub(1))
        .unwrap_or(u32::MAX);
    let capped = policy.base_delay.saturating_mul(factor).min(policy.max_delay);

    let jitter_ceiling = (capped.as_millis() / 2) as u64;
    let jitter = if jitter_ceiling == 0 {
        0
    } else {
        rng.gen_range(0..=jitter_ceiling)
    };
    let delay = capped + Duration::from_millis(jitter);

    match retry_after {
        Some(hint) => delay.max(hint.min(policy.max_delay)),
        None => delay,
    }
}

/// Whether an HTTP status is worth retrying.
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// One logical API call. Reused verbatim for every retry.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            query: Vec::new(),
            body: None,
            bearer: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn bearer(mut self, token: Option<&str>) -> Self {
        self.bearer = token.map(str::to_string);
        self
    }
}

/// Successful response body plus how many retries it took.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub retries: u32,
}

impl ApiResponse {
    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ReviewCrawlError::parse(format!("invalid JSON response: {e}")))
    }
}

/// Outcome of a single attempt.
enum Attempt {
    Done { status: u16, body: Vec<u8> },
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },
    Permanent {
        status: Option<u16>,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Sends API requests under a shared rate budget with retry and backoff.
pub struct Dispatcher {
    client: Client,
    budget: RateBudget,
    policy: RetryPolicy,
    retries: AtomicU64,
}

impl Dispatcher {
    pub fn new(client: Client, budget: RateBudget, policy: RetryPolicy) -> Self {
        Self {
            client,
            budget,
            policy,
            retries: AtomicU64::new(0),
        }
    }

    /// Dispatcher built from the runtime crawl config.
    pub fn from_config(config: &CrawlConfig) -> Result<Self> {
        let client = build_client(config.timeout_secs)?;
        let budget = RateBudget::new(config.requests_per_second, config.burst)?;
        Ok(Self::new(client, budget, RetryPolicy::from(config)))
    }

    /// Retries performed across all requests so far.
    pub fn total_retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Send `request`, retrying transient failures.
    ///
    /// Every attempt (including retries) consumes one token from the budget.
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    pub async fn submit(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut retries: u32 = 0;

        loop {
            self.budget.acquire().await;

            let (message, retry_after) = match self.attempt(request).await {
                Attempt::Done { status, body } => {
                    debug!(status, retries, bytes = body.len(), "request succeeded");
                    return Ok(ApiResponse {
                        status,
                        body,
                        retries,
                    });
                }
                Attempt::Permanent { status, message } => {
                    warn!(?status, %message, "permanent failure");
                    return Err(ReviewCrawlError::PermanentFetchFailure {
                        url: request.url.clone(),
                        status,
                        message,
                    });
                }
                Attempt::Transient {
                    message,
                    retry_after,
                } => (message, retry_after),
            };

            if retries >= self.policy.max_retries {
                warn!(attempts = retries + 1, %message, "retries exhausted");
                return Err(ReviewCrawlError::TransientFetchFailure {
                    url: request.url.clone(),
                    attempts: retries + 1,
                    message,
                });
            }

            retries += 1;
            self.retries.fetch_add(1, Ordering::Relaxed);
            let delay = backoff_delay(&self.policy, retries, retry_after, &mut rand::thread_rng());
            warn!(
                attempt = retries,
                delay_ms = delay.as_millis() as u64,
                %message,
                "transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, request: &ApiRequest) -> Attempt {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .query(&request.query);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Attempt::Permanent {
                    status: None,
                    message: e.to_string(),
                };
            }
            Err(e) => {
                return Attempt::Transient {
                    message: e.to_string(),
                    retry_after: None,
                };
            }
        };

        let status = response.status();
        if status.is_success() {
            return match response.bytes().await {
                Ok(body) => Attempt::Done {
                    status: status.as_u16(),
                    body: body.to_vec(),
                },
                Err(e) => Attempt::Transient {
                    message: format!("failed to read body: {e}"),
                    retry_after: None,
                },
            };
        }

        if is_transient_status(status) {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Attempt::Transient {
                message: format!("HTTP {status}"),
                retry_after,
            };
        }

        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        Attempt::Permanent {
            status: Some(status.as_u16()),
            message: format!("HTTP {status}: {snippet}"),
        }
    }
}

/// HTTP client with the crawler's user agent and timeout.
pub fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ReviewCrawlError::Network(format!("failed to build HTTP client: {e}")))
}
