use chrono::{DateTime, Utc};

/// One opaque unit of API data, interpreted only by downstream consumers.
pub type Record = serde_json::Value;

/// Position of a page in the remote result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PageToken {
    /// Index of the first record of the page.
    Offset(u64),
    /// Opaque continuation returned by the previous page.
    Cursor(String),
}

/// Quota state reported alongside a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimit {
    pub fn exhausted(reset_at: Option<DateTime<Utc>>) -> Self {
        Self {
            remaining: Some(0),
            reset_at,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    pub next: Option<PageToken>,
    /// Total number of matching records, when the API reports it.
    pub total: Option<u64>,
    pub rate_limit: RateLimit,
}

/// Result of a single page request that reached the API.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Page(Page),
    /// The API refused the page until the quota resets; the same page must be
    /// requested again afterwards.
    RateLimited(RateLimit),
}
