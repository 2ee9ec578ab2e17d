use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::fetch_request::FetchRequest;
use crate::domain::page::{Page, PageOutcome, PageToken, RateLimit, Record};
use crate::services::clock::Clock;
use crate::services::fetch_cache::{CacheEntry, FetchCache};
use crate::services::page_client::{PageClient, PageError, Pagination};

/// Wait applied when a rate-limited response carries no usable reset time.
const FALLBACK_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("{endpoint}: giving up after {attempts} attempts: {message}")]
    Transient {
        endpoint: String,
        attempts: u32,
        message: String,
    },
    #[error("{endpoint}: {message}")]
    Fatal { endpoint: String, message: String },
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub page_size: u32,
    /// Total attempts per page, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to each backoff delay.
    pub max_jitter: Duration,
    /// Parallel page requests for offset-paginated APIs.
    pub concurrency: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
            concurrency: 1,
        }
    }
}

/// Retrieves complete result sets through a [`PageClient`], serving repeated
/// requests from a [`FetchCache`].
pub struct Fetcher<C, K> {
    client: C,
    cache: FetchCache,
    clock: K,
    options: FetchOptions,
}

impl<C: PageClient, K: Clock> Fetcher<C, K> {
    pub fn new(client: C, cache: FetchCache, clock: K, options: FetchOptions) -> Self {
        Self {
            client,
            cache,
            clock,
            options,
        }
    }

    pub fn cache(&self) -> &FetchCache {
        &self.cache
    }

    /// Returns every record matching `request`, in the order the API produced
    /// them. Either the full set is returned (and cached) or an error is.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        if let Some(records) = self.cached(request).await {
            return Ok(records);
        }
        let records = self.fetch_uncached(request).await?;
        info!(endpoint = request.endpoint(), records = records.len(), "fetched");
        Ok(self.remember(request, records).await)
    }

    /// Records cached under `request`, if a fresh entry exists.
    pub async fn cached(&self, request: &FetchRequest) -> Option<Vec<Record>> {
        let entry = self.cache.lookup(request, self.clock.now()).await?;
        debug!(
            endpoint = request.endpoint(),
            records = entry.records.len(),
            fetched_at = %entry.fetched_at,
            "serving from cache"
        );
        Some(entry.records)
    }

    /// Pages through `request` without reading or writing the cache.
    pub async fn fetch_uncached(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        self.fetch_all_pages(request).await
    }

    /// Caches `records` under `request` and hands them back. A failed write
    /// is logged; the records are still returned.
    pub async fn remember(&self, request: &FetchRequest, records: Vec<Record>) -> Vec<Record> {
        let entry = CacheEntry {
            records,
            fetched_at: self.clock.now(),
        };
        if let Err(err) = self.cache.store(request, &entry).await {
            warn!(endpoint = request.endpoint(), error = %err, "failed to cache fetched records");
        }
        entry.records
    }

    /// Requested page size, clamped to what the API serves.
    fn page_size(&self) -> u32 {
        let requested = self.options.page_size.max(1);
        match self.client.max_page_size() {
            Some(max) => requested.min(max.max(1)),
            None => requested,
        }
    }

    async fn fetch_all_pages(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        let first = self.fetch_page_with_retry(request, None).await?;
        let mut records = first.records;
        let mut next = first.next;
        let mut rate_limit = first.rate_limit;

        if let (Pagination::Offset, Some(total), Some(PageToken::Offset(offset))) =
            (self.client.pagination(), first.total, &next)
        {
            if self.options.concurrency > 1 {
                let offsets = remaining_offsets(*offset, total, self.page_size());
                if rate_limit.is_exhausted() {
                    self.wait_for_reset(request, &rate_limit).await;
                }
                records.extend(self.fetch_offsets_concurrently(request, offsets).await?);
                return Ok(records);
            }
        }

        while let Some(token) = next {
            if rate_limit.is_exhausted() {
                self.wait_for_reset(request, &rate_limit).await;
            }
            let page = self.fetch_page_with_retry(request, Some(&token)).await?;
            records.extend(page.records);
            rate_limit = page.rate_limit;
            next = match page.next {
                Some(candidate) if candidate == token => {
                    debug!(endpoint = request.endpoint(), "page token repeated, stopping");
                    None
                }
                other => other,
            };
        }
        Ok(records)
    }

    async fn fetch_offsets_concurrently(
        &self,
        request: &FetchRequest,
        offsets: Vec<u64>,
    ) -> Result<Vec<Record>, FetchError> {
        let pages: Vec<Page> = stream::iter(offsets)
            .map(|offset| async move {
                let token = PageToken::Offset(offset);
                self.fetch_page_with_retry(request, Some(&token)).await
            })
            .buffered(self.options.concurrency)
            .try_collect()
            .await?;
        Ok(pages.into_iter().flat_map(|page| page.records).collect())
    }

    /// Requests one page until it succeeds, fails fatally, or runs out of
    /// attempts. Rate-limit waits do not count as attempts.
    async fn fetch_page_with_retry(
        &self,
        request: &FetchRequest,
        token: Option<&PageToken>,
    ) -> Result<Page, FetchError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = self
                .client
                .fetch_page(request, self.page_size(), token)
                .await;
            match outcome {
                Ok(PageOutcome::Page(page)) => return Ok(page),
                Ok(PageOutcome::RateLimited(rate_limit)) => {
                    attempts -= 1;
                    self.wait_for_reset(request, &rate_limit).await;
                }
                Err(PageError::Fatal(message)) => {
                    return Err(FetchError::Fatal {
                        endpoint: request.endpoint().to_string(),
                        message,
                    });
                }
                Err(PageError::Transient(message)) => {
                    if attempts >= self.options.max_attempts {
                        return Err(FetchError::Transient {
                            endpoint: request.endpoint().to_string(),
                            attempts,
                            message,
                        });
                    }
                    let delay = self.backoff_delay(attempts);
                    warn!(
                        endpoint = request.endpoint(),
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "page request failed, retrying"
                    );
                    self.clock.sleep(delay).await;
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .options
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let max_jitter_ms = self.options.max_jitter.as_millis() as u64;
        let jitter = if max_jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
        };
        exponential + jitter
    }

    async fn wait_for_reset(&self, request: &FetchRequest, rate_limit: &RateLimit) {
        let now = self.clock.now();
        let wait = rate_limit
            .reset_at
            .filter(|reset_at| *reset_at > now)
            .and_then(|reset_at| (reset_at - now).to_std().ok())
            .unwrap_or(FALLBACK_RATE_LIMIT_WAIT);
        warn!(
            endpoint = request.endpoint(),
            wait_secs = wait.as_secs_f64(),
            "rate limit exhausted, waiting for reset"
        );
        self.clock.sleep(wait).await;
    }
}

fn remaining_offsets(first_offset: u64, total: u64, page_size: u32) -> Vec<u64> {
    let step = u64::from(page_size.max(1));
    (first_offset..total).step_by(step as usize).collect()
}
