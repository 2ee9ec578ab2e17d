use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::domain::fetch_request::FetchRequest;
use crate::domain::page::Record;
use crate::services::clock::Clock;
use crate::services::fetcher::{FetchError, Fetcher};
use crate::services::page_client::PageClient;
use crate::services::semaphore_api::pipeline_request;

/// Cached per-month list of pipeline outcomes, keyed like the listing.
pub const PIPELINE_OUTCOMES_ENDPOINT: &str = "semaphore/pipeline-outcomes";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineResults {
    pub pipelines: usize,
    /// Count per lower-cased result (`passed`, `failed`, `stopped`, ...).
    pub results: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize)]
struct PipelineOutcome {
    #[serde(default)]
    results: Vec<String>,
}

/// Results of every pipeline in `pipelines`, one record per pipeline, read
/// from each pipeline's detailed view. Cached as a whole under the listing
/// parameters.
pub async fn pipeline_outcomes<C: PageClient, K: Clock>(
    fetcher: &Fetcher<C, K>,
    listing: &FetchRequest,
    pipelines: &[Record],
) -> Result<Vec<Record>, FetchError> {
    let request = listing.for_endpoint(PIPELINE_OUTCOMES_ENDPOINT);
    if let Some(outcomes) = fetcher.cached(&request).await {
        return Ok(outcomes);
    }

    let mut outcomes = Vec::with_capacity(pipelines.len());
    for pipeline in pipelines {
        let ppl_id = pipeline.get("ppl_id").and_then(Value::as_str);
        let detail = match ppl_id {
            Some(ppl_id) => {
                debug!(ppl_id, "fetching pipeline details");
                let detail = fetcher
                    .fetch_uncached(&pipeline_request(*listing.range(), ppl_id))
                    .await?;
                detail.into_iter().next()
            }
            None => {
                warn!("pipeline without ppl_id, using its listed result");
                None
            }
        };
        outcomes.push(json!({
            "ppl_id": ppl_id,
            "results": pipeline_result_names(pipeline, detail.as_ref()),
        }));
    }
    Ok(fetcher.remember(&request, outcomes).await)
}

/// Job results of a pipeline with several blocks (a block without jobs
/// counts once with its own result), otherwise the single pipeline result.
pub fn pipeline_result_names(listed: &Value, detail: Option<&Value>) -> Vec<String> {
    let result = |value: &Value| {
        value
            .get("result")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
    };

    let blocks = detail
        .and_then(|detail| detail.get("blocks"))
        .and_then(Value::as_array)
        .filter(|blocks| blocks.len() > 1);
    if let Some(blocks) = blocks {
        return blocks
            .iter()
            .flat_map(|block| {
                match block
                    .get("jobs")
                    .and_then(Value::as_array)
                    .filter(|jobs| !jobs.is_empty())
                {
                    Some(jobs) => jobs.iter().filter_map(result).collect(),
                    None => result(block).into_iter().collect::<Vec<_>>(),
                }
            })
            .collect();
    }
    detail
        .and_then(|detail| detail.get("pipeline"))
        .and_then(result)
        .or_else(|| result(listed))
        .into_iter()
        .collect()
}

/// Totals of all outcomes. `passed` and `failed` are always present.
pub fn pipeline_results(outcomes: &[Record]) -> PipelineResults {
    let mut results = BTreeMap::from([("passed".to_string(), 0), ("failed".to_string(), 0)]);
    for outcome in outcomes {
        let Ok(outcome) = PipelineOutcome::deserialize(outcome) else {
            warn!("unreadable pipeline outcome, skipping");
            continue;
        };
        for name in outcome.results {
            *results.entry(name).or_insert(0) += 1;
        }
    }
    let counted: u64 = results.values().sum();
    if counted < outcomes.len() as u64 {
        warn!(
            counted,
            pipelines = outcomes.len(),
            "fewer results than pipelines"
        );
    }
    PipelineResults {
        pipelines: outcomes.len(),
        results,
    }
}
