use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::date_range::DateRange;

/// Immutable description of one paginated retrieval.
///
/// Filters live in a sorted map so that [`FetchRequest::cache_key`] is stable
/// regardless of the order in which they were added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchRequest {
    endpoint: String,
    range: DateRange,
    filters: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn new(endpoint: impl Into<String>, range: DateRange) -> Self {
        Self {
            endpoint: endpoint.into(),
            range,
            filters: BTreeMap::new(),
        }
    }

    /// Adds a filter; empty values are dropped so that an unset option and an
    /// empty one share a cache key.
    pub fn with_filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.filters.insert(name.into(), value);
        }
        self
    }

    /// The same range and filters, addressed to another endpoint.
    pub fn for_endpoint(&self, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..self.clone()
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn range(&self) -> &DateRange {
        &self.range
    }

    pub fn filter(&self, name: &str) -> Option<&str> {
        self.filters.get(name).map(String::as_str)
    }

    /// Deterministic serialization used as the cache key.
    pub fn cache_key(&self) -> String {
        // Only strings, dates and a BTreeMap are serialized, which cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{}|{}|{}|{:?}",
                self.endpoint,
                self.range.start(),
                self.range.end(),
                self.filters
            )
        })
    }
}
