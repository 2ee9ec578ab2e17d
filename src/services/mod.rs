pub mod clock;
pub mod cycle_time;
pub mod fetch_cache;
pub mod fetcher;
pub mod github_api;
mod http_page;
pub mod jira_api;
pub mod metrics_config;
pub mod month_summary;
pub mod page_client;
pub mod pipeline_results;
pub mod pull_contributions;
pub mod records_json;
pub mod semaphore_api;
