//! Response handling shared by the HTTP page clients.

use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde_json::Value;

use crate::domain::page::{PageOutcome, RateLimit};
use crate::services::page_client::PageError;

const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

pub(crate) fn transport_error(err: reqwest::Error) -> PageError {
    PageError::Transient(format!("request failed: {err}"))
}

/// Reads quota state from `x-ratelimit-*` headers (reset as epoch seconds)
/// or, failing that, from a `Retry-After` delay in seconds.
pub(crate) fn rate_limit_from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> RateLimit {
    let remaining = header_u64(headers, RATE_LIMIT_REMAINING);
    let reset_at = header_u64(headers, RATE_LIMIT_RESET)
        .and_then(|epoch| i64::try_from(epoch).ok())
        .and_then(|epoch| DateTime::<Utc>::from_timestamp(epoch, 0))
        .or_else(|| {
            header_u64(headers, RETRY_AFTER.as_str())
                .and_then(|seconds| i64::try_from(seconds).ok())
                .map(|seconds| now + Duration::seconds(seconds))
        });
    RateLimit {
        remaining,
        reset_at,
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// A 429, or a 403 sent while the quota is exhausted, means "come back later"
/// rather than failure.
pub(crate) fn rate_limited(status: StatusCode, rate_limit: RateLimit) -> Option<PageOutcome> {
    let refused = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && rate_limit.is_exhausted());
    refused.then(|| PageOutcome::RateLimited(RateLimit::exhausted(rate_limit.reset_at)))
}

pub(crate) fn status_error(status: StatusCode, body: &str) -> PageError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        PageError::Transient(message)
    } else {
        PageError::Fatal(message)
    }
}

pub(crate) async fn ensure_success(response: Response) -> Result<Response, PageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, body.trim()))
}

pub(crate) async fn read_json(response: Response) -> Result<Value, PageError> {
    let body = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&body)
        .map_err(|err| PageError::Fatal(format!("invalid response payload: {err}")))
}

/// Moves the array stored under `key` out of `payload`.
pub(crate) fn take_array(payload: &mut Value, key: &str) -> Result<Vec<Value>, PageError> {
    match payload.get_mut(key).map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(PageError::Fatal(format!("response has no `{key}` array"))),
    }
}
