use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::domain::fetch_request::FetchRequest;
use crate::domain::page::Record;
use crate::services::clock::Clock;
use crate::services::fetcher::{FetchError, Fetcher};
use crate::services::github_api::{
    ISSUE_COMMENTS_ENDPOINT, PULL_ENDPOINT, REVIEW_COMMENTS_ENDPOINT, REVIEWS_ENDPOINT,
    pull_request_for,
};
use crate::services::page_client::PageClient;

/// Cached per-month list of pull request details, keyed like the search.
pub const PULL_DETAILS_ENDPOINT: &str = "github/pull-details";

/// What one person did across the merged pull requests of a month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Contribution {
    pub merges: u64,
    /// Reviews and comments left on other people's pull requests.
    pub reviews: u64,
    /// Lines added plus lines deleted in merged pull requests.
    pub changes: u64,
}

#[derive(Debug, Deserialize)]
struct PullDetail {
    author: Option<String>,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
    #[serde(default)]
    reviewers: Vec<String>,
    #[serde(default)]
    commenters: Vec<String>,
}

/// One compact detail record per pull request found by `search`.
///
/// With `with_details` every pull request costs four more requests (the pull
/// itself, its reviews, review comments and issue comments). The collected
/// list is cached as a whole under the search parameters.
pub async fn pull_details<C: PageClient, K: Clock>(
    fetcher: &Fetcher<C, K>,
    search: &FetchRequest,
    pulls: &[Record],
    with_details: bool,
) -> Result<Vec<Record>, FetchError> {
    if !with_details {
        return Ok(pulls.iter().map(|pull| json!({ "author": login(pull) })).collect());
    }
    let request = search.for_endpoint(PULL_DETAILS_ENDPOINT);
    if let Some(details) = fetcher.cached(&request).await {
        return Ok(details);
    }

    let mut details = Vec::with_capacity(pulls.len());
    for pull in pulls {
        let Some((repo, number)) = pull_reference(pull) else {
            warn!("search result without repository or number, skipping its details");
            continue;
        };
        debug!(repo = %repo, number, "fetching pull request details");
        let fetch = |endpoint: &str| {
            let request = pull_request_for(endpoint, *search.range(), &repo, number);
            async move { fetcher.fetch_uncached(&request).await }
        };
        let merged = fetch(PULL_ENDPOINT).await?;
        let reviews = fetch(REVIEWS_ENDPOINT).await?;
        let mut comments = fetch(ISSUE_COMMENTS_ENDPOINT).await?;
        comments.extend(fetch(REVIEW_COMMENTS_ENDPOINT).await?);

        let detail = merged.into_iter().next().unwrap_or(Value::Null);
        details.push(json!({
            "repo": repo,
            "number": number,
            "author": login(&detail).or_else(|| login(pull)),
            "additions": detail.get("additions").and_then(Value::as_u64).unwrap_or(0),
            "deletions": detail.get("deletions").and_then(Value::as_u64).unwrap_or(0),
            "reviewers": reviews.iter().filter_map(login).collect::<Vec<_>>(),
            "commenters": comments.iter().filter_map(login).collect::<Vec<_>>(),
        }));
    }
    Ok(fetcher.remember(&request, details).await)
}

/// Merges, reviews and changed lines per person. Reviews and comments on
/// one's own pull requests do not count. When `users` is non-empty only the
/// logins it lists are counted, under their display names.
pub fn contributions(
    details: &[Record],
    users: &BTreeMap<String, String>,
) -> BTreeMap<String, Contribution> {
    let name_of = |login: &str| -> Option<String> {
        if users.is_empty() {
            Some(login.to_string())
        } else {
            users.get(login).cloned()
        }
    };

    let mut totals: BTreeMap<String, Contribution> = BTreeMap::new();
    for detail in details {
        let Ok(detail) = PullDetail::deserialize(detail) else {
            warn!("unreadable pull request detail, skipping");
            continue;
        };
        let author = detail.author.as_deref();
        if let Some(name) = author.and_then(name_of) {
            let entry = totals.entry(name).or_default();
            entry.merges += 1;
            entry.changes += detail.additions + detail.deletions;
        }
        for login in detail.reviewers.iter().chain(&detail.commenters) {
            if Some(login.as_str()) == author {
                continue;
            }
            if let Some(name) = name_of(login) {
                totals.entry(name).or_default().reviews += 1;
            }
        }
    }
    totals
}

fn login(value: &Value) -> Option<String> {
    value
        .pointer("/user/login")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `owner/name` and number of a search result, from its `repository_url`.
fn pull_reference(pull: &Value) -> Option<(String, u64)> {
    let number = pull.get("number").and_then(Value::as_u64)?;
    let url = pull.get("repository_url").and_then(Value::as_str)?;
    let mut segments = url.trim_end_matches('/').rsplit('/');
    let name = segments.next().filter(|name| !name.is_empty())?;
    let owner = segments.next().filter(|owner| !owner.is_empty())?;
    Some((format!("{owner}/{name}"), number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::date_range::DateRange;
    use crate::domain::page::{Page, PageOutcome, PageToken};
    use crate::services::fetch_cache::FetchCache;
    use crate::services::fetcher::FetchOptions;
    use crate::services::github_api::GitHubSettings;
    use crate::services::page_client::{PageError, Pagination};
    use crate::test_support::{FakeClock, at};
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use std::cell::RefCell;
    use std::time::Duration;

    fn search_result(number: u64, author: &str) -> Value {
        json!({
            "number": number,
            "repository_url": "https://api.github.com/repos/acme/widgets",
            "user": { "login": author }
        })
    }

    fn by(login: &str) -> Value {
        json!({ "user": { "login": login } })
    }

    // Answers every per-pull endpoint from the number filter alone.
    #[derive(Default)]
    struct PullServer {
        requested: RefCell<Vec<String>>,
    }

    impl PageClient for PullServer {
        fn pagination(&self) -> Pagination {
            Pagination::Offset
        }

        async fn fetch_page(
            &self,
            request: &FetchRequest,
            _page_size: u32,
            _token: Option<&PageToken>,
        ) -> Result<PageOutcome, PageError> {
            let number: u64 = request.filter("number").unwrap_or("0").parse().unwrap();
            assert_eq!(request.filter("repo"), Some("acme/widgets"));
            self.requested
                .borrow_mut()
                .push(format!("{} #{number}", request.endpoint()));
            let records = match request.endpoint() {
                PULL_ENDPOINT => vec![json!({
                    "user": { "login": "octocat" },
                    "additions": 10 * number,
                    "deletions": number
                })],
                REVIEWS_ENDPOINT => vec![by("hubot"), by("octocat")],
                REVIEW_COMMENTS_ENDPOINT => vec![by("hubot")],
                ISSUE_COMMENTS_ENDPOINT if number == 2 => vec![by("monalisa")],
                _ => Vec::new(),
            };
            Ok(PageOutcome::Page(Page {
                records,
                ..Page::default()
            }))
        }
    }

    fn fetcher<'a>(
        server: &'a PullServer,
        clock: &'a FakeClock,
        dir: &TempDir,
    ) -> Fetcher<&'a PullServer, &'a FakeClock> {
        let options = FetchOptions {
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
            ..FetchOptions::default()
        };
        Fetcher::new(server, FetchCache::new(dir.child("cache.json").path()), clock, options)
    }

    fn june_search() -> FetchRequest {
        GitHubSettings {
            org: "acme".to_string(),
            ..GitHubSettings::default()
        }
        .fetch_request(DateRange::for_month("2023-06").unwrap())
    }

    #[tokio::test]
    async fn details_are_gathered_once_and_cached_per_month() {
        let dir = TempDir::new().unwrap();
        let clock = FakeClock::new(at(2023, 7, 1, 9));
        let server = PullServer::default();
        let fetcher = fetcher(&server, &clock, &dir);
        let pulls = vec![search_result(1, "octocat"), search_result(2, "octocat")];

        let details = pull_details(&fetcher, &june_search(), &pulls, true).await.unwrap();
        let again = pull_details(&fetcher, &june_search(), &pulls, true).await.unwrap();

        assert_eq!(details, again);
        assert_eq!(server.requested.borrow().len(), 8);
        assert_eq!(details[1]["additions"], 20);
        assert_eq!(details[1]["commenters"], json!(["monalisa", "hubot"]));
    }

    #[tokio::test]
    async fn contributions_count_merges_reviews_and_changes() {
        let dir = TempDir::new().unwrap();
        let clock = FakeClock::new(at(2023, 7, 1, 9));
        let server = PullServer::default();
        let fetcher = fetcher(&server, &clock, &dir);
        let pulls = vec![search_result(1, "octocat"), search_result(2, "octocat")];

        let details = pull_details(&fetcher, &june_search(), &pulls, true).await.unwrap();
        let totals = contributions(&details, &BTreeMap::new());

        assert_eq!(
            totals["octocat"],
            Contribution {
                merges: 2,
                reviews: 0,
                changes: 11 + 22
            }
        );
        assert_eq!(totals["hubot"].reviews, 4);
        assert_eq!(totals["monalisa"].reviews, 1);
    }

    #[tokio::test]
    async fn without_details_only_merges_are_counted() {
        let dir = TempDir::new().unwrap();
        let clock = FakeClock::new(at(2023, 7, 1, 9));
        let server = PullServer::default();
        let fetcher = fetcher(&server, &clock, &dir);
        let pulls = vec![search_result(1, "octocat"), search_result(2, "hubot")];

        let details = pull_details(&fetcher, &june_search(), &pulls, false).await.unwrap();
        let totals = contributions(&details, &BTreeMap::new());

        assert!(server.requested.borrow().is_empty());
        assert_eq!(totals["octocat"].merges, 1);
        assert_eq!(totals["hubot"].merges, 1);
        assert_eq!(totals["hubot"].changes, 0);
    }

    #[test]
    fn user_map_renames_and_filters() {
        let details = vec![
            json!({ "author": "octocat", "additions": 5, "deletions": 1, "reviewers": ["hubot", "stranger"] }),
            json!({ "author": "stranger", "additions": 100, "reviewers": ["octocat"] }),
        ];
        let users = BTreeMap::from([
            ("octocat".to_string(), "Mona Octocat".to_string()),
            ("hubot".to_string(), "Hu Bot".to_string()),
        ]);

        let totals = contributions(&details, &users);

        assert_eq!(totals.len(), 2);
        assert_eq!(
            totals["Mona Octocat"],
            Contribution {
                merges: 1,
                reviews: 1,
                changes: 6
            }
        );
        assert_eq!(totals["Hu Bot"].reviews, 1);
    }

    #[test]
    fn repository_is_taken_from_repository_url() {
        assert_eq!(
            pull_reference(&search_result(42, "octocat")),
            Some(("acme/widgets".to_string(), 42))
        );
        assert_eq!(pull_reference(&json!({ "number": 1 })), None);
        assert_eq!(
            pull_reference(&json!({ "repository_url": "https://api.github.com/repos/acme/widgets" })),
            None
        );
    }
}
