use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Local;
use tracing::warn;

use crate::commands::base_commands::Source;
use crate::domain::date_range::{DateRange, previous_month_token};
use crate::domain::fetch_request::FetchRequest;
use crate::domain::page::Record;
use crate::services::clock::{Clock, SystemClock};
use crate::services::fetcher::Fetcher;
use crate::services::github_api::{GitHubApiClient, GitHubAuth};
use crate::services::jira_api::{AuthData, JiraApiClient};
use crate::services::metrics_config::{ConfigError, MetricsConfig};
use crate::services::month_summary::{MonthSummary, Summarizer};
use crate::services::page_client::PageClient;
use crate::services::pipeline_results::PIPELINE_OUTCOMES_ENDPOINT;
use crate::services::pull_contributions::PULL_DETAILS_ENDPOINT;
use crate::services::records_json::serialize_records_to_json;
use crate::services::semaphore_api::{SemaphoreApiClient, SemaphoreAuth};

pub async fn fetch_command(
    source: Source,
    months: Vec<String>,
    config: Option<String>,
    output: Option<String>,
    refresh: bool,
) -> ExitCode {
    let config = match MetricsConfig::load(config.as_deref().map(Path::new)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    let options = match config.fetcher.fetch_options() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Invalid fetcher settings: {e}");
            return ExitCode::FAILURE;
        }
    };
    let months = if months.is_empty() {
        vec![previous_month_token(Local::now().date_naive())]
    } else {
        months
    };
    let summarizer = match summarizer(source, &config) {
        Ok(summarizer) => summarizer,
        Err(e) => {
            eprintln!("Invalid {} settings: {e}", source.name());
            return ExitCode::FAILURE;
        }
    };
    let cache = config.fetcher.cache();
    let plan = FetchPlan {
        source,
        config: &config,
        summarizer,
        output: output.as_deref().map(Path::new),
        refresh,
    };

    let failures = match source {
        Source::Github => {
            let client = GitHubAuth::from_env()
                .and_then(|auth| GitHubApiClient::new(&config.github, auth));
            match client {
                Ok(client) => {
                    let fetcher = Fetcher::new(client, cache, SystemClock, options);
                    fetch_months(&fetcher, &plan, &months).await
                }
                Err(e) => return client_setup_failed(source, e),
            }
        }
        Source::Jira => {
            let client =
                AuthData::from_env().and_then(|auth| JiraApiClient::new(&config.jira, auth));
            match client {
                Ok(client) => {
                    let fetcher = Fetcher::new(client, cache, SystemClock, options);
                    fetch_months(&fetcher, &plan, &months).await
                }
                Err(e) => return client_setup_failed(source, e),
            }
        }
        Source::Semaphore => {
            let client = SemaphoreAuth::from_env()
                .and_then(|auth| SemaphoreApiClient::new(&config.semaphore, auth));
            match client {
                Ok(client) => {
                    let fetcher = Fetcher::new(client, cache, SystemClock, options);
                    fetch_months(&fetcher, &plan, &months).await
                }
                Err(e) => return client_setup_failed(source, e),
            }
        }
    };

    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        eprintln!("{failures} of {} month(s) failed", months.len());
        ExitCode::FAILURE
    }
}

/// The request a source issues for one month.
pub fn source_request(source: Source, config: &MetricsConfig, range: DateRange) -> FetchRequest {
    match source {
        Source::Github => config.github.fetch_request(range),
        Source::Jira => config.jira.fetch_request(range),
        Source::Semaphore => config.semaphore.fetch_request(range),
    }
}

/// Every cache entry a month of `source` may leave behind: the listing
/// itself and the details gathered for its summary.
pub fn cached_requests(source: Source, config: &MetricsConfig, range: DateRange) -> Vec<FetchRequest> {
    let listing = source_request(source, config, range);
    let derived = match source {
        Source::Github => Some(listing.for_endpoint(PULL_DETAILS_ENDPOINT)),
        Source::Jira => None,
        Source::Semaphore => Some(listing.for_endpoint(PIPELINE_OUTCOMES_ENDPOINT)),
    };
    std::iter::once(listing).chain(derived).collect()
}

pub fn summarizer(source: Source, config: &MetricsConfig) -> Result<Summarizer, ConfigError> {
    Ok(match source {
        Source::Github => Summarizer::Contributions {
            users: config.github.users.clone(),
            pull_details: config.github.pull_details,
        },
        Source::Jira => Summarizer::CycleTime(config.jira.cycle_stages()?),
        Source::Semaphore => Summarizer::PipelineResults,
    })
}

pub(crate) struct FetchPlan<'a> {
    pub source: Source,
    pub config: &'a MetricsConfig,
    pub summarizer: Summarizer,
    pub output: Option<&'a Path>,
    pub refresh: bool,
}

/// Fetches each month in turn; a failed month does not stop the others.
/// Returns the number of failed months.
pub(crate) async fn fetch_months<C: PageClient, K: Clock>(
    fetcher: &Fetcher<C, K>,
    plan: &FetchPlan<'_>,
    months: &[String],
) -> usize {
    let mut failures = 0;
    for month in months {
        let range = match DateRange::for_month(month) {
            Ok(range) => range,
            Err(e) => {
                eprintln!("Skipping {month}: {e}");
                failures += 1;
                continue;
            }
        };
        let request = source_request(plan.source, plan.config, range);
        if plan.refresh {
            for cached in cached_requests(plan.source, plan.config, range) {
                if let Err(e) = fetcher.cache().invalidate(&cached).await {
                    warn!(month = %month, error = %e, "failed to drop cached result");
                }
            }
        }

        let records = match fetcher.fetch(&request).await {
            Ok(records) => records,
            Err(e) => {
                eprintln!("Failed to fetch {} data for {month}: {e}", plan.source.name());
                failures += 1;
                continue;
            }
        };
        let summary = match plan.summarizer.summarize(fetcher, &request, &records).await {
            Ok(summary) => summary,
            Err(e) => {
                eprintln!("Failed to summarize {} data for {month}: {e}", plan.source.name());
                failures += 1;
                continue;
            }
        };
        println!("{month}: {} records", records.len());
        for line in summary.report_lines() {
            println!("  {line}");
        }

        if let Some(dir) = plan.output {
            match write_records(dir, plan.source, &range, &summary, &records).await {
                Ok(path) => println!("Records written to {}", path.display()),
                Err(e) => {
                    eprintln!("Failed to write records for {month}: {e}");
                    failures += 1;
                }
            }
        }
    }
    failures
}

async fn write_records(
    dir: &Path,
    source: Source,
    range: &DateRange,
    summary: &MonthSummary,
    records: &[Record],
) -> std::io::Result<PathBuf> {
    let mut buffer = Vec::new();
    serialize_records_to_json(&mut buffer, source.name(), range, summary, records)?;
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}-{}.json", source.name(), range.month_token()));
    tokio::fs::write(&path, buffer).await?;
    Ok(path)
}

fn client_setup_failed(source: Source, e: ConfigError) -> ExitCode {
    eprintln!("Failed to set up {} client: {e}", source.name());
    ExitCode::FAILURE
}
