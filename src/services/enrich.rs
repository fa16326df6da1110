//! Secondary-source lookups for enrichment passes.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{ApiConfig, ArticleRecord, EnrichmentConfig, HarvestConfig};
use crate::pipeline::EnrichmentPayload;
use crate::services::api::{ApiResponse, RawWork};
use crate::services::fetch::{RetryPolicy, SharedLimiter};

/// Lookup seam for enrichment payloads, mockable in tests.
#[async_trait]
pub trait EnrichmentApi: Send + Sync {
    /// Look an article up on the secondary source. `Ok(None)` means the
    /// source has nothing for this article.
    async fn lookup(&self, article: &ArticleRecord) -> Result<Option<EnrichmentPayload>>;
}

/// HTTP client for one configured enrichment endpoint.
///
/// Shares the harvest run's global rate-limit budget: enrichment
/// lookups and page fetches draw from the same token bucket.
pub struct HttpEnrichmentApi {
    client: reqwest::Client,
    endpoint: EnrichmentConfig,
    mailto: String,
    retry: RetryPolicy,
    limiter: SharedLimiter,
}

impl HttpEnrichmentApi {
    pub fn new(
        endpoint: EnrichmentConfig,
        api: &ApiConfig,
        harvest: &HarvestConfig,
        limiter: SharedLimiter,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&api.user_agent)
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            mailto: api.mailto.clone(),
            retry: RetryPolicy::from_config(harvest),
            limiter,
        })
    }
}

#[async_trait]
impl EnrichmentApi for HttpEnrichmentApi {
    async fn lookup(&self, article: &ArticleRecord) -> Result<Option<EnrichmentPayload>> {
        // Only DOI lookups are reliable across sources; articles on the
        // title+year fallback key are left for the next harvest to fill.
        let Some(doi) = article.doi.as_deref() else {
            return Ok(None);
        };

        let params = [
            ("filter".to_string(), format!("doi:{doi}")),
            ("per-page".to_string(), "1".to_string()),
            ("mailto".to_string(), self.mailto.clone()),
        ];

        let name = &self.endpoint.name;
        let mut attempt: u32 = 0;

        loop {
            self.limiter.until_ready().await;

            let response = match self
                .client
                .get(&self.endpoint.endpoint)
                .query(&params)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    if attempt >= self.retry.max_retries {
                        return Err(AppError::unavailable(name, format!("retries exhausted: {e}")));
                    }
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                if attempt >= self.retry.max_retries {
                    if status.as_u16() == 429 {
                        return Err(AppError::RateLimited {
                            source_name: name.clone(),
                            attempts: attempt + 1,
                        });
                    }
                    return Err(AppError::unavailable(
                        name,
                        format!("retries exhausted: HTTP {status}"),
                    ));
                }
                log::warn!("[{name}] lookup: HTTP {status}, retry {attempt}");
                tokio::time::sleep(self.retry.delay(attempt)).await;
                attempt += 1;
                continue;
            }

            if status.as_u16() == 404 {
                return Ok(None);
            }

            if !status.is_success() {
                return Err(AppError::unavailable(name, format!("HTTP {status}")));
            }

            let body: ApiResponse = response
                .json()
                .await
                .map_err(|e| AppError::unavailable(name, format!("undecodable response: {e}")))?;

            return Ok(body.results.first().map(payload_from_raw));
        }
    }
}

/// Build an enrichment payload from a raw work, leaving absent fields
/// out rather than supplying empty values.
pub fn payload_from_raw(raw: &RawWork) -> EnrichmentPayload {
    let abstract_text = raw
        .abstract_text
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string);

    let subjects: BTreeSet<String> = raw
        .concepts
        .iter()
        .map(|c| c.display_name.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let authors: Vec<String> = raw
        .authorships
        .iter()
        .map(|a| a.author.display_name.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();

    EnrichmentPayload {
        abstract_text,
        subjects: (!subjects.is_empty()).then_some(subjects),
        referenced_works: (!raw.referenced_works.is_empty())
            .then(|| raw.referenced_works.clone()),
        cited_by_count: raw.cited_by_count,
        authors: (!authors.is_empty()).then_some(authors),
    }
}
