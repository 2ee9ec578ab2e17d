use std::env;

use chrono::{Days, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::domain::date_range::DateRange;
use crate::domain::fetch_request::FetchRequest;
use crate::domain::page::{Page, PageOutcome, PageToken};
use crate::services::cycle_time::CycleStages;
use crate::services::http_page::{
    ensure_success, rate_limit_from_headers, rate_limited, read_json, take_array, transport_error,
};
use crate::services::metrics_config::ConfigError;
use crate::services::page_client::{PageClient, PageError, Pagination};

pub const SEARCH_ENDPOINT: &str = "jira/search/jql";

const STAGE_ORDER: [&str; 17] = [
    "Design Complete",
    "Backlog",
    "Triage",
    "Waiting for support",
    "Open",
    "Ready for Grooming",
    "Groomed",
    "In Progress",
    "In Review",
    "Review",
    "Merged",
    "Deploy",
    "In Test",
    "Awaiting Approval",
    "Closed",
    "Done",
    "Declined",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JiraSettings {
    pub base_url: String,
    pub project_key: String,
    pub issue_types: Vec<String>,
    pub labels: Vec<String>,
    pub fields: String,
    /// Status changes are only returned with the changelog expanded.
    pub changelog: bool,
    pub start_stage: String,
    pub end_stage: String,
    /// Workflow statuses from first to last.
    pub stage_order: Vec<String>,
}

impl Default for JiraSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            project_key: String::new(),
            issue_types: Vec::new(),
            labels: Vec::new(),
            fields: "key,created,resolutiondate,issuetype,labels,status".to_string(),
            changelog: true,
            start_stage: "In Progress".to_string(),
            end_stage: "Merged".to_string(),
            stage_order: STAGE_ORDER.iter().map(|stage| stage.to_string()).collect(),
        }
    }
}

impl JiraSettings {
    /// Issues of the project resolved within `range`.
    pub fn fetch_request(&self, range: DateRange) -> FetchRequest {
        FetchRequest::new(SEARCH_ENDPOINT, range)
            .with_filter("project", self.project_key.as_str())
            .with_filter("issue_types", self.issue_types.join(","))
            .with_filter("labels", self.labels.join(","))
            .with_filter("fields", self.fields.as_str())
            .with_filter("expand", if self.changelog { "changelog" } else { "" })
    }

    pub fn cycle_stages(&self) -> Result<CycleStages, ConfigError> {
        CycleStages::new(self.stage_order.clone(), &self.start_stage, &self.end_stage)
    }
}

#[derive(Debug, Clone)]
pub struct AuthData {
    pub username: String,
    pub api_token: String,
}

impl AuthData {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_values(env::var("JIRA_USERNAME").ok(), env::var("JIRA_API_TOKEN").ok())
    }

    fn from_values(username: Option<String>, api_token: Option<String>) -> Result<Self, ConfigError> {
        let present = |value: Option<String>| value.filter(|value| !value.is_empty());
        match (present(username), present(api_token)) {
            (Some(username), Some(api_token)) => Ok(Self {
                username,
                api_token,
            }),
            _ => Err(ConfigError::MissingCredentials(
                "JIRA_USERNAME and JIRA_API_TOKEN",
            )),
        }
    }
}

/// JQL search client; pages are chained through `nextPageToken`.
pub struct JiraApiClient {
    base_url: String,
    auth: AuthData,
    client: Client,
}

impl JiraApiClient {
    pub fn new(settings: &JiraSettings, auth: AuthData) -> Result<Self, ConfigError> {
        if settings.base_url.is_empty() {
            return Err(ConfigError::MissingSetting("jira.base_url"));
        }
        if settings.project_key.is_empty() {
            return Err(ConfigError::MissingSetting("jira.project_key"));
        }

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            auth,
            client: Client::builder().build()?,
        })
    }
}

impl PageClient for JiraApiClient {
    fn pagination(&self) -> Pagination {
        Pagination::Cursor
    }

    async fn fetch_page(
        &self,
        request: &FetchRequest,
        page_size: u32,
        token: Option<&PageToken>,
    ) -> Result<PageOutcome, PageError> {
        let mut params = vec![
            ("jql", build_jql(request)),
            ("fields", request.filter("fields").unwrap_or("key").to_string()),
            ("maxResults", page_size.to_string()),
        ];
        if let Some(expand) = request.filter("expand") {
            params.push(("expand", expand.to_string()));
        }
        match token {
            None => {}
            Some(PageToken::Cursor(cursor)) => params.push(("nextPageToken", cursor.clone())),
            Some(PageToken::Offset(offset)) => {
                return Err(PageError::Fatal(format!(
                    "JQL search does not take offsets: {offset}"
                )));
            }
        }

        let response = self
            .client
            .get(format!("{}/search/jql", self.base_url))
            .query(&params)
            .basic_auth(&self.auth.username, Some(&self.auth.api_token))
            .send()
            .await
            .map_err(transport_error)?;

        let rate_limit = rate_limit_from_headers(response.headers(), Utc::now());
        if let Some(outcome) = rate_limited(response.status(), rate_limit) {
            return Ok(outcome);
        }
        let mut payload = read_json(ensure_success(response).await?).await?;
        let issues = take_array(&mut payload, "issues")?;
        let is_last = payload
            .get("isLast")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let next = payload
            .get("nextPageToken")
            .and_then(Value::as_str)
            .filter(|_| !is_last)
            .map(|token| PageToken::Cursor(token.to_string()));

        Ok(PageOutcome::Page(Page {
            records: issues,
            next,
            total: None,
            rate_limit,
        }))
    }
}

/// Issues resolved on any day of the request's range, narrowed by the
/// optional issue type and label filters.
pub fn build_jql(request: &FetchRequest) -> String {
    let range = request.range();
    let mut clauses = Vec::new();
    if let Some(project) = request.filter("project") {
        clauses.push(format!("project = \"{project}\""));
    }
    if let Some(issue_types) = request.filter("issue_types") {
        clauses.push(format!("issuetype in ({})", quoted_list(issue_types)));
    }
    clauses.push(format!(
        "resolutiondate >= \"{}\"",
        range.start().format("%Y-%m-%d")
    ));
    // `<=` on a bare date stops at midnight, so bound by the following day.
    let after_end = range.end().checked_add_days(Days::new(1)).unwrap_or(range.end());
    clauses.push(format!(
        "resolutiondate < \"{}\"",
        after_end.format("%Y-%m-%d")
    ));
    if let Some(labels) = request.filter("labels") {
        clauses.push(format!("labels in ({})", quoted_list(labels)));
    }
    format!("{} ORDER BY resolutiondate ASC", clauses.join(" AND "))
}

fn quoted_list(values: &str) -> String {
    values
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| format!("\"{value}\""))
        .collect::<Vec<_>>()
        .join(", ")
}
