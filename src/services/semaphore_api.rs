use std::env;

use chrono::Utc;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, LINK};
use serde::Deserialize;
use serde_json::Value;

use crate::domain::date_range::DateRange;
use crate::domain::fetch_request::FetchRequest;
use crate::domain::page::{Page, PageOutcome, PageToken};
use crate::services::http_page::{
    ensure_success, rate_limit_from_headers, rate_limited, read_json, transport_error,
};
use crate::services::metrics_config::ConfigError;
use crate::services::page_client::{PageClient, PageError, Pagination};

pub const PIPELINES_ENDPOINT: &str = "semaphore/pipelines";
pub const PIPELINE_ENDPOINT: &str = "semaphore/pipeline";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SemaphoreSettings {
    /// e.g. `https://<org>.semaphoreci.com/api/v1alpha`
    pub base_url: String,
    pub project_id: String,
    /// Restricts pipelines to one branch when set.
    pub branch: String,
}

impl SemaphoreSettings {
    /// Pipelines of the project created within `range`.
    pub fn fetch_request(&self, range: DateRange) -> FetchRequest {
        FetchRequest::new(PIPELINES_ENDPOINT, range)
            .with_filter("project_id", self.project_id.as_str())
            .with_filter("branch", self.branch.as_str())
    }
}

/// Detailed view (blocks and jobs) of one pipeline.
pub fn pipeline_request(range: DateRange, ppl_id: &str) -> FetchRequest {
    FetchRequest::new(PIPELINE_ENDPOINT, range).with_filter("ppl_id", ppl_id)
}

#[derive(Debug, Clone)]
pub struct SemaphoreAuth {
    pub api_token: String,
}

impl SemaphoreAuth {
    pub fn from_env() -> Result<Self, ConfigError> {
        env::var("SEMAPHORECI_API_TOKEN")
            .ok()
            .filter(|token| !token.is_empty())
            .map(|api_token| Self { api_token })
            .ok_or(ConfigError::MissingCredentials("SEMAPHORECI_API_TOKEN"))
    }
}

/// Pipeline listing and detail client; the next page URL comes from the
/// `Link` header.
pub struct SemaphoreApiClient {
    base_url: String,
    auth: SemaphoreAuth,
    client: Client,
}

impl SemaphoreApiClient {
    pub fn new(settings: &SemaphoreSettings, auth: SemaphoreAuth) -> Result<Self, ConfigError> {
        if settings.base_url.is_empty() {
            return Err(ConfigError::MissingSetting("semaphore.base_url"));
        }
        if settings.project_id.is_empty() {
            return Err(ConfigError::MissingSetting("semaphore.project_id"));
        }
        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            auth,
            client: Client::builder().build()?,
        })
    }

    fn first_page(&self, request: &FetchRequest) -> Result<reqwest::RequestBuilder, PageError> {
        if request.endpoint() == PIPELINE_ENDPOINT {
            let ppl_id = request.filter("ppl_id").ok_or_else(|| {
                PageError::Fatal("pipeline request needs a `ppl_id` filter".to_string())
            })?;
            return Ok(self
                .client
                .get(format!("{}/pipelines/{ppl_id}", self.base_url))
                .query(&[("detailed", "true")]));
        }
        let range = request.range();
        let mut params = vec![
            ("project_id", request.filter("project_id").unwrap_or_default().to_string()),
            ("created_after", range.start_timestamp().to_string()),
            ("created_before", range.end_timestamp().to_string()),
        ];
        if let Some(branch) = request.filter("branch") {
            params.push(("branch", branch.to_string()));
        }
        Ok(self
            .client
            .get(format!("{}/pipelines", self.base_url))
            .query(&params))
    }
}

impl PageClient for SemaphoreApiClient {
    fn pagination(&self) -> Pagination {
        Pagination::Cursor
    }

    async fn fetch_page(
        &self,
        request: &FetchRequest,
        _page_size: u32,
        token: Option<&PageToken>,
    ) -> Result<PageOutcome, PageError> {
        let builder = match token {
            None => self.first_page(request)?,
            Some(PageToken::Cursor(next_url)) => self.client.get(next_url),
            Some(PageToken::Offset(offset)) => {
                return Err(PageError::Fatal(format!(
                    "pipeline listing does not take offsets: {offset}"
                )));
            }
        };

        let response = builder
            .header(AUTHORIZATION, format!("Token {}", self.auth.api_token))
            .send()
            .await
            .map_err(transport_error)?;

        let rate_limit = rate_limit_from_headers(response.headers(), Utc::now());
        if let Some(outcome) = rate_limited(response.status(), rate_limit) {
            return Ok(outcome);
        }
        let next = next_link(response.headers()).map(PageToken::Cursor);
        let payload = read_json(ensure_success(response).await?).await?;
        let records = match payload {
            Value::Array(pipelines) => pipelines,
            detail @ Value::Object(_) if request.endpoint() == PIPELINE_ENDPOINT => vec![detail],
            _ => {
                return Err(PageError::Fatal(
                    "pipeline listing is not a JSON array".to_string(),
                ));
            }
        };

        Ok(PageOutcome::Page(Page {
            records,
            next,
            total: None,
            rate_limit,
        }))
    }
}

/// Extracts the `rel="next"` target of an RFC 8288 `Link` header.
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|param| param.trim().replace(' ', "") == "rel=\"next\"");
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        is_next.then(|| target.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn link_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LINK, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn next_link_is_found_among_relations() {
        let headers = link_headers(
            "<https://acme.semaphoreci.com/api/v1alpha/pipelines?page=1>; rel=\"first\", \
             <https://acme.semaphoreci.com/api/v1alpha/pipelines?page=3>; rel=\"next\"",
        );
        assert_eq!(
            next_link(&headers).as_deref(),
            Some("https://acme.semaphoreci.com/api/v1alpha/pipelines?page=3")
        );
    }

    #[test]
    fn no_next_relation_ends_pagination() {
        let headers = link_headers("<https://acme.semaphoreci.com/p?page=1>; rel=\"first\"");
        assert_eq!(next_link(&headers), None);
        assert_eq!(next_link(&HeaderMap::new()), None);
    }

    #[test]
    fn pipeline_requests_are_keyed_by_id() {
        let range = DateRange::for_month("2023-06").unwrap();
        let request = pipeline_request(range, "ppl-1");
        assert_eq!(request.endpoint(), PIPELINE_ENDPOINT);
        assert_eq!(request.filter("ppl_id"), Some("ppl-1"));
        assert_ne!(request.cache_key(), pipeline_request(range, "ppl-2").cache_key());
    }

    #[test]
    fn branch_filter_is_optional() {
        let range = DateRange::for_month("2023-06").unwrap();
        let all = SemaphoreSettings {
            project_id: "abc".to_string(),
            ..SemaphoreSettings::default()
        }
        .fetch_request(range);
        let main = SemaphoreSettings {
            project_id: "abc".to_string(),
            branch: "main".to_string(),
            ..SemaphoreSettings::default()
        }
        .fetch_request(range);

        assert_eq!(all.filter("branch"), None);
        assert_eq!(main.filter("branch"), Some("main"));
        assert_ne!(all.cache_key(), main.cache_key());
    }
}
