use std::collections::BTreeMap;
use std::env;

use chrono::Utc;
use reqwest::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::domain::date_range::DateRange;
use crate::domain::fetch_request::FetchRequest;
use crate::domain::page::{Page, PageOutcome, PageToken, RateLimit};
use crate::services::http_page::{
    ensure_success, rate_limit_from_headers, rate_limited, read_json, take_array, transport_error,
};
use crate::services::metrics_config::ConfigError;
use crate::services::page_client::{PageClient, PageError, Pagination};

pub const SEARCH_ENDPOINT: &str = "github/search/issues";
pub const PULL_ENDPOINT: &str = "github/pulls";
pub const REVIEWS_ENDPOINT: &str = "github/pulls/reviews";
pub const REVIEW_COMMENTS_ENDPOINT: &str = "github/pulls/comments";
pub const ISSUE_COMMENTS_ENDPOINT: &str = "github/issues/comments";

/// GitHub never serves more than this many items per page.
pub const MAX_PER_PAGE: u32 = 100;
/// Issue search stops serving results past this many matches.
pub const SEARCH_RESULT_LIMIT: u64 = 1000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubSettings {
    pub base_url: String,
    pub org: String,
    /// Extra search qualifiers appended to the merged-PR query.
    pub query: String,
    /// Login to display name. When set, only these people are counted.
    pub users: BTreeMap<String, String>,
    /// Fetch reviews, comments and line counts of every pull request.
    /// Without them only merges are counted.
    pub pull_details: bool,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            org: String::new(),
            query: "review:approved".to_string(),
            users: BTreeMap::new(),
            pull_details: true,
        }
    }
}

impl GitHubSettings {
    /// Pull requests of the organisation merged within `range`.
    pub fn fetch_request(&self, range: DateRange) -> FetchRequest {
        FetchRequest::new(SEARCH_ENDPOINT, range)
            .with_filter("org", self.org.as_str())
            .with_filter("query", self.query.as_str())
    }
}

/// Request for one of the per-pull endpoints.
pub fn pull_request_for(endpoint: &str, range: DateRange, repo: &str, number: u64) -> FetchRequest {
    FetchRequest::new(endpoint, range)
        .with_filter("repo", repo)
        .with_filter("number", number.to_string())
}

#[derive(Debug, Clone)]
pub struct GitHubAuth {
    pub token: String,
}

impl GitHubAuth {
    pub fn from_env() -> Result<Self, ConfigError> {
        env::var("GITHUB_TOKEN")
            .ok()
            .filter(|token| !token.is_empty())
            .map(|token| Self { token })
            .ok_or(ConfigError::MissingCredentials("GITHUB_TOKEN"))
    }
}

enum Reply {
    Json { payload: Value, rate_limit: RateLimit },
    Refused(PageOutcome),
}

/// Issue search and pull request client; pages are addressed by offset.
pub struct GitHubApiClient {
    base_url: String,
    auth: GitHubAuth,
    client: Client,
}

impl GitHubApiClient {
    pub fn new(settings: &GitHubSettings, auth: GitHubAuth) -> Result<Self, ConfigError> {
        if settings.base_url.is_empty() {
            return Err(ConfigError::MissingSetting("github.base_url"));
        }
        if settings.org.is_empty() {
            return Err(ConfigError::MissingSetting("github.org"));
        }
        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            auth,
            client: Client::builder().build()?,
        })
    }

    async fn get(&self, url: String, params: &[(&str, String)]) -> Result<Reply, PageError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .bearer_auth(&self.auth.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "eng-metrics")
            .send()
            .await
            .map_err(transport_error)?;

        let rate_limit = rate_limit_from_headers(response.headers(), Utc::now());
        if let Some(outcome) = rate_limited(response.status(), rate_limit) {
            return Ok(Reply::Refused(outcome));
        }
        let payload = read_json(ensure_success(response).await?).await?;
        Ok(Reply::Json {
            payload,
            rate_limit,
        })
    }

    async fn search_page(
        &self,
        request: &FetchRequest,
        offset: u64,
        per_page: u32,
    ) -> Result<PageOutcome, PageError> {
        let params = [
            ("q", search_query(request)),
            ("per_page", per_page.to_string()),
            ("page", page_number(offset, per_page).to_string()),
        ];
        let (mut payload, rate_limit) =
            match self.get(format!("{}/search/issues", self.base_url), &params).await? {
                Reply::Json {
                    payload,
                    rate_limit,
                } => (payload, rate_limit),
                Reply::Refused(outcome) => return Ok(outcome),
            };

        let matched = payload.get("total_count").and_then(Value::as_u64);
        if offset == 0 {
            if let Some(matched) = matched.filter(|matched| *matched > SEARCH_RESULT_LIMIT) {
                warn!(
                    matched,
                    served = SEARCH_RESULT_LIMIT,
                    "search matched more pull requests than GitHub serves, result is truncated"
                );
            }
        }
        let total = matched.map(|matched| matched.min(SEARCH_RESULT_LIMIT));
        let mut items = take_array(&mut payload, "items")?;
        items.truncate(SEARCH_RESULT_LIMIT.saturating_sub(offset) as usize);
        let next = next_offset(offset, items.len(), per_page, total)
            .filter(|next| *next < SEARCH_RESULT_LIMIT)
            .map(PageToken::Offset);

        Ok(PageOutcome::Page(Page {
            records: items,
            next,
            total,
            rate_limit,
        }))
    }

    async fn pull_page(
        &self,
        request: &FetchRequest,
        offset: u64,
        per_page: u32,
    ) -> Result<PageOutcome, PageError> {
        let (repo, number) = match (request.filter("repo"), request.filter("number")) {
            (Some(repo), Some(number)) => (repo, number),
            _ => {
                return Err(PageError::Fatal(format!(
                    "{} needs `repo` and `number` filters",
                    request.endpoint()
                )));
            }
        };
        let path = match request.endpoint() {
            PULL_ENDPOINT => format!("repos/{repo}/pulls/{number}"),
            REVIEWS_ENDPOINT => format!("repos/{repo}/pulls/{number}/reviews"),
            REVIEW_COMMENTS_ENDPOINT => format!("repos/{repo}/pulls/{number}/comments"),
            ISSUE_COMMENTS_ENDPOINT => format!("repos/{repo}/issues/{number}/comments"),
            other => return Err(PageError::Fatal(format!("unsupported endpoint {other}"))),
        };
        let single = request.endpoint() == PULL_ENDPOINT;
        let params = if single {
            Vec::new()
        } else {
            vec![
                ("per_page", per_page.to_string()),
                ("page", page_number(offset, per_page).to_string()),
            ]
        };
        let (payload, rate_limit) =
            match self.get(format!("{}/{path}", self.base_url), &params).await? {
                Reply::Json {
                    payload,
                    rate_limit,
                } => (payload, rate_limit),
                Reply::Refused(outcome) => return Ok(outcome),
            };

        let (records, next) = match payload {
            Value::Array(items) => {
                let next = next_offset(offset, items.len(), per_page, None).map(PageToken::Offset);
                (items, next)
            }
            object @ Value::Object(_) if single => (vec![object], None),
            _ => {
                return Err(PageError::Fatal(format!(
                    "unexpected payload from {path}"
                )));
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

impl PageClient for GitHubApiClient {
    fn pagination(&self) -> Pagination {
        Pagination::Offset
    }

    fn max_page_size(&self) -> Option<u32> {
        Some(MAX_PER_PAGE)
    }

    async fn fetch_page(
        &self,
        request: &FetchRequest,
        page_size: u32,
        token: Option<&PageToken>,
    ) -> Result<PageOutcome, PageError> {
        let offset = match token {
            None => 0,
            Some(PageToken::Offset(offset)) => *offset,
            Some(PageToken::Cursor(cursor)) => {
                return Err(PageError::Fatal(format!(
                    "GitHub pages do not take cursor tokens: {cursor}"
                )));
            }
        };
        let per_page = page_size.clamp(1, MAX_PER_PAGE);
        if offset % u64::from(per_page) != 0 {
            return Err(PageError::Fatal(format!(
                "offset {offset} does not start a page of {per_page}"
            )));
        }

        if request.endpoint() == SEARCH_ENDPOINT {
            self.search_page(request, offset, per_page).await
        } else {
            self.pull_page(request, offset, per_page).await
        }
    }
}

/// `org:<org> is:pr is:merged merged:<start>..<end> <extra qualifiers>`
pub fn search_query(request: &FetchRequest) -> String {
    let range = request.range();
    let mut query = String::new();
    if let Some(org) = request.filter("org") {
        query.push_str(&format!("org:{org} "));
    }
    query.push_str(&format!(
        "is:pr is:merged merged:{}..{}",
        range.start().format("%Y-%m-%d"),
        range.end().format("%Y-%m-%d")
    ));
    if let Some(extra) = request.filter("query") {
        query.push(' ');
        query.push_str(extra);
    }
    query
}

fn page_number(offset: u64, per_page: u32) -> u64 {
    offset / u64::from(per_page) + 1
}

fn next_offset(offset: u64, received: usize, per_page: u32, total: Option<u64>) -> Option<u64> {
    let fetched = offset + received as u64;
    let full_page = received as u64 >= u64::from(per_page);
    match total {
        Some(total) if fetched < total && received > 0 => Some(fetched),
        None if full_page && received > 0 => Some(fetched),
        _ => None,
    }
}
