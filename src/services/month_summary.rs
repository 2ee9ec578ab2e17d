use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::fetch_request::FetchRequest;
use crate::domain::page::Record;
use crate::services::clock::Clock;
use crate::services::cycle_time::{CycleStages, CycleTimeSummary, cycle_time_summary};
use crate::services::fetcher::{FetchError, Fetcher};
use crate::services::page_client::PageClient;
use crate::services::pipeline_results::{PipelineResults, pipeline_outcomes, pipeline_results};
use crate::services::pull_contributions::{Contribution, contributions, pull_details};

/// How the records of one source are condensed into monthly figures.
#[derive(Debug, Clone)]
pub enum Summarizer {
    Contributions {
        users: BTreeMap<String, String>,
        pull_details: bool,
    },
    CycleTime(CycleStages),
    PipelineResults,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MonthSummary {
    Contributions(BTreeMap<String, Contribution>),
    CycleTime(CycleTimeSummary),
    PipelineResults(PipelineResults),
}

impl Summarizer {
    /// Summarizes `records`, fetched for `request`. Contributions and
    /// pipeline results need further requests, issued through `fetcher`.
    pub async fn summarize<C: PageClient, K: Clock>(
        &self,
        fetcher: &Fetcher<C, K>,
        request: &FetchRequest,
        records: &[Record],
    ) -> Result<MonthSummary, FetchError> {
        match self {
            Summarizer::Contributions {
                users,
                pull_details: with_details,
            } => {
                let details = pull_details(fetcher, request, records, *with_details).await?;
                Ok(MonthSummary::Contributions(contributions(&details, users)))
            }
            Summarizer::CycleTime(stages) => {
                Ok(MonthSummary::CycleTime(cycle_time_summary(records, stages)))
            }
            Summarizer::PipelineResults => {
                let outcomes = pipeline_outcomes(fetcher, request, records).await?;
                Ok(MonthSummary::PipelineResults(pipeline_results(&outcomes)))
            }
        }
    }
}

impl MonthSummary {
    /// Human-readable lines for the terminal.
    pub fn report_lines(&self) -> Vec<String> {
        match self {
            MonthSummary::Contributions(people) if people.is_empty() => {
                vec!["no merged pull requests".to_string()]
            }
            MonthSummary::Contributions(people) => people
                .iter()
                .map(|(name, contribution)| {
                    format!(
                        "{name}: {} merges, {} reviews, {} changed lines",
                        contribution.merges, contribution.reviews, contribution.changes
                    )
                })
                .collect(),
            MonthSummary::CycleTime(summary) => vec![format!(
                "average cycle time from {} to {}: {:.2} days over {} of {} issues",
                summary.start_stage,
                summary.end_stage,
                summary.average_days,
                summary.measured,
                summary.issues
            )],
            MonthSummary::PipelineResults(summary) => {
                let counts: Vec<String> = summary
                    .results
                    .iter()
                    .map(|(result, count)| format!("{result}: {count}"))
                    .collect();
                vec![format!(
                    "{} pipelines ({})",
                    summary.pipelines,
                    counts.join(", ")
                )]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::date_range::DateRange;
    use crate::services::fetch_cache::FetchCache;
    use crate::services::fetcher::FetchOptions;
    use crate::test_support::{FakeClock, ScriptedClient, at};
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use serde_json::json;

    async fn summarize_with(summarizer: &Summarizer, records: &[Record]) -> MonthSummary {
        let dir = TempDir::new().unwrap();
        let clock = FakeClock::new(at(2023, 7, 1, 9));
        let client = ScriptedClient::cursor();
        let fetcher = Fetcher::new(
            &client,
            FetchCache::new(dir.child("cache.json").path()),
            &clock,
            FetchOptions::default(),
        );
        let request = FetchRequest::new("records", DateRange::for_month("2023-06").unwrap());
        let summary = summarizer.summarize(&fetcher, &request, records).await;
        assert!(client.calls().is_empty());
        summary.unwrap()
    }

    #[tokio::test]
    async fn merges_only_contributions_need_no_requests() {
        let summarizer = Summarizer::Contributions {
            users: BTreeMap::new(),
            pull_details: false,
        };
        let summary = summarize_with(
            &summarizer,
            &[json!({ "user": { "login": "octocat" } }), json!({ "user": { "login": "octocat" } })],
        )
        .await;

        assert_eq!(
            summary.report_lines(),
            vec!["octocat: 2 merges, 0 reviews, 0 changed lines"]
        );
        let document = serde_json::to_value(&summary).unwrap();
        assert_eq!(document["octocat"]["merges"], 2);
    }

    #[tokio::test]
    async fn cycle_time_is_reported_in_days() {
        let stages = CycleStages::new(
            vec!["In Progress".to_string(), "Merged".to_string()],
            "In Progress",
            "Merged",
        )
        .unwrap();
        let issue = json!({
            "fields": {
                "created": "2023-06-01T09:00:00.000+0000",
                "resolutiondate": "2023-06-02T21:00:00.000+0000"
            }
        });

        let summary = summarize_with(&Summarizer::CycleTime(stages), &[issue]).await;

        assert_eq!(
            summary.report_lines(),
            vec!["average cycle time from In Progress to Merged: 1.50 days over 1 of 1 issues"]
        );
        let document = serde_json::to_value(&summary).unwrap();
        assert_eq!(document["average_days"], 1.5);
    }

    #[test]
    fn pipeline_results_report_every_result() {
        let summary = MonthSummary::PipelineResults(PipelineResults {
            pipelines: 3,
            results: BTreeMap::from([
                ("failed".to_string(), 1),
                ("passed".to_string(), 2),
            ]),
        });
        assert_eq!(summary.report_lines(), vec!["3 pipelines (failed: 1, passed: 2)"]);
    }

    #[test]
    fn empty_contributions_say_so() {
        let summary = MonthSummary::Contributions(BTreeMap::new());
        assert_eq!(summary.report_lines(), vec!["no merged pull requests"]);
    }
}
