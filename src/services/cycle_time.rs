use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde_json::Value;

use crate::domain::page::Record;
use crate::services::metrics_config::ConfigError;

const JIRA_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%S%.f%z";
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Workflow statuses in the order issues move through them, with the two
/// statuses that bound the measured cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleStages {
    order: Vec<String>,
    start: usize,
    end: usize,
}

impl CycleStages {
    pub fn new(order: Vec<String>, start: &str, end: &str) -> Result<Self, ConfigError> {
        let position = |name: &'static str, stage: &str| {
            order
                .iter()
                .position(|known| known == stage)
                .ok_or_else(|| ConfigError::InvalidSetting {
                    name,
                    reason: format!("`{stage}` is not listed in jira.stage_order"),
                })
        };
        let start = position("jira.start_stage", start)?;
        let end = position("jira.end_stage", end)?;
        if start > end {
            return Err(ConfigError::InvalidSetting {
                name: "jira.end_stage",
                reason: "must not come before jira.start_stage".to_string(),
            });
        }
        Ok(Self { order, start, end })
    }

    pub fn start_stage(&self) -> &str {
        &self.order[self.start]
    }

    pub fn end_stage(&self) -> &str {
        &self.order[self.end]
    }

    fn index_of(&self, status: &str) -> Option<usize> {
        self.order.iter().position(|known| known == status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleTimeSummary {
    pub start_stage: String,
    pub end_stage: String,
    pub issues: usize,
    /// Issues with the timestamps needed to measure a cycle.
    pub measured: usize,
    /// Zero when nothing could be measured.
    pub average_days: f64,
}

/// Days an issue spent between the start and end stages.
///
/// The cycle starts at creation, or at the latest move into the start stage
/// or an earlier one. It ends at resolution, or at the earliest move into the
/// end stage or a later one. Statuses missing from the stage order are
/// ignored. `None` when the issue lacks its creation or resolution time.
pub fn issue_cycle_time(issue: &Value, stages: &CycleStages) -> Option<f64> {
    let fields = issue.get("fields")?;
    let mut start = timestamp(fields.get("created")?)?;
    let mut end = timestamp(fields.get("resolutiondate")?)?;

    let histories = issue
        .pointer("/changelog/histories")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for history in histories {
        let Some(changed_at) = history.get("created").and_then(timestamp) else {
            continue;
        };
        let items = history
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for item in items {
            if item.get("field").and_then(Value::as_str) != Some("status") {
                continue;
            }
            let Some(stage) = item
                .get("toString")
                .and_then(Value::as_str)
                .and_then(|status| stages.index_of(status))
            else {
                continue;
            };
            if stage <= stages.start {
                start = start.max(changed_at);
            }
            if stage >= stages.end {
                end = end.min(changed_at);
            }
        }
    }
    Some((end - start).num_seconds() as f64 / SECONDS_PER_DAY)
}

pub fn cycle_time_summary(issues: &[Record], stages: &CycleStages) -> CycleTimeSummary {
    let cycle_times: Vec<f64> = issues
        .iter()
        .filter_map(|issue| issue_cycle_time(issue, stages))
        .collect();
    let average_days = if cycle_times.is_empty() {
        0.0
    } else {
        cycle_times.iter().sum::<f64>() / cycle_times.len() as f64
    };
    CycleTimeSummary {
        start_stage: stages.start_stage().to_string(),
        end_stage: stages.end_stage().to_string(),
        issues: issues.len(),
        measured: cycle_times.len(),
        average_days,
    }
}

fn timestamp(value: &Value) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(value.as_str()?, JIRA_TIMESTAMP).ok()
}
