//! HTTP implementation of the paginated fetch engine.
//!
//! One GET per page with exponential backoff on rate-limit and transient
//! failures. All outbound requests, across every concurrent source
//! worker, pass through one shared token-bucket limiter so aggregate
//! request volume never exceeds the remote API's budget.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};

use crate::error::{AppError, Result};
use crate::models::{ApiConfig, HarvestConfig, SourceConfig};
use crate::services::api::{ApiResponse, RawPage, WorkApi};

/// Global request budget shared by all source workers.
pub type SharedLimiter = Arc<governor::DefaultDirectRateLimiter>;

/// Build the shared token-bucket limiter for a run.
pub fn shared_limiter(requests_per_second: u32) -> SharedLimiter {
    let per_second = NonZeroU32::new(requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_second(per_second)))
}

/// Exponential backoff policy for one page fetch.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries allowed per page before the source is abandoned
    pub max_retries: u32,
    /// First delay; doubles per retry
    pub initial_backoff_ms: u64,
    /// Delay ceiling
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(harvest: &HarvestConfig) -> Self {
        Self {
            max_retries: harvest.max_retries,
            initial_backoff_ms: harvest.initial_backoff_ms,
            max_backoff_ms: harvest.max_backoff_ms,
        }
    }

    /// Delay before retry number `attempt` (0-based): initial * 2^attempt,
    /// capped at the ceiling.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Paginated works-API client over HTTP.
pub struct HttpWorkApi {
    client: reqwest::Client,
    api: ApiConfig,
    retry: RetryPolicy,
    limiter: SharedLimiter,
}

impl HttpWorkApi {
    /// Create a configured client.
    pub fn new(api: ApiConfig, harvest: &HarvestConfig, limiter: SharedLimiter) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&api.user_agent)
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api,
            retry: RetryPolicy::from_config(harvest),
            limiter,
        })
    }

    /// Query parameters for one page request.
    fn page_params(&self, source: &SourceConfig, cursor: Option<&str>) -> Vec<(String, String)> {
        vec![
            ("filter".to_string(), source.filter.clone()),
            ("per-page".to_string(), self.api.page_size.to_string()),
            ("select".to_string(), self.api.select_fields.join(",")),
            ("mailto".to_string(), self.api.mailto.clone()),
            ("cursor".to_string(), cursor.unwrap_or("*").to_string()),
        ]
    }

    async fn backoff(&self, source: &str, stage: &str, attempt: u32) {
        let delay = self.retry.delay(attempt);
        log::warn!(
            "[{source}] {stage}: retry {attempt} in {}ms",
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl WorkApi for HttpWorkApi {
    async fn fetch_page(&self, source: &SourceConfig, cursor: Option<&str>) -> Result<RawPage> {
        let params = self.page_params(source, cursor);
        let mut attempt: u32 = 0;

        loop {
            self.limiter.until_ready().await;

            let response = self
                .client
                .get(&self.api.endpoint)
                .query(&params)
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    // Timeouts and connection failures are transient;
                    // the caller folds an exhausted source into the run
                    // manifest without touching its committed state.
                    let transient = AppError::transient(&source.code, &e);
                    if attempt >= self.retry.max_retries {
                        return Err(transient);
                    }
                    log::debug!("{transient}");
                    self.backoff(&source.code, "network", attempt).await;
                    attempt += 1;
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 {
                if attempt >= self.retry.max_retries {
                    return Err(AppError::RateLimited {
                        source_name: source.code.clone(),
                        attempts: attempt + 1,
                    });
                }
                self.backoff(&source.code, "rate-limit", attempt).await;
                attempt += 1;
                continue;
            }

            if status.is_server_error() {
                if attempt >= self.retry.max_retries {
                    return Err(AppError::unavailable(
                        &source.code,
                        format!("retries exhausted: HTTP {status}"),
                    ));
                }
                self.backoff(&source.code, "server-error", attempt).await;
                attempt += 1;
                continue;
            }

            if !status.is_success() {
                // Non-retryable client error (e.g. malformed query).
                return Err(AppError::unavailable(&source.code, format!("HTTP {status}")));
            }

            let body: ApiResponse = response.json().await.map_err(|e| {
                AppError::unavailable(&source.code, format!("undecodable page: {e}"))
            })?;

            log::debug!(
                "[{}] fetched page: {} records, next_cursor={:?}",
                source.code,
                body.results.len(),
                body.meta.next_cursor
            );

            return Ok(RawPage {
                records: body.results,
                next_cursor: body.meta.next_cursor,
            });
        }
    }
}
