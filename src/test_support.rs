use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::json;

use crate::domain::fetch_request::FetchRequest;
use crate::domain::page::{Page, PageOutcome, PageToken, Record};
use crate::services::clock::Clock;
use crate::services::page_client::{PageClient, PageError, Pagination};

pub fn on_date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
}

/// `count` distinct records tagged with `prefix`.
pub fn records(prefix: &str, count: usize) -> Vec<Record> {
    (0..count)
        .map(|index| json!({ "id": format!("{prefix}-{index}") }))
        .collect()
}

pub fn page(records: Vec<Record>, next: Option<PageToken>) -> PageOutcome {
    PageOutcome::Page(Page {
        records,
        next,
        ..Page::default()
    })
}

// A clock whose sleeps return immediately but move `now` forward
#[derive(Clone)]
pub struct FakeClock {
    now: Rc<Cell<DateTime<Utc>>>,
    sleeps: Rc<RefCell<Vec<Duration>>>,
}

impl FakeClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Rc::new(Cell::new(now)),
            sleeps: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        let elapsed = chrono::Duration::from_std(duration).unwrap();
        self.now.set(self.now.get() + elapsed);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub endpoint: String,
    pub token: Option<PageToken>,
    pub page_size: u32,
    pub issued_at: DateTime<Utc>,
}

// A page client answering from per-token queues of scripted responses
pub struct ScriptedClient {
    pagination: Pagination,
    responses: RefCell<HashMap<Option<PageToken>, VecDeque<Result<PageOutcome, PageError>>>>,
    calls: RefCell<Vec<RecordedCall>>,
    clock: Option<FakeClock>,
    max_page_size: Option<u32>,
}

impl ScriptedClient {
    pub fn cursor() -> Self {
        Self::with_pagination(Pagination::Cursor)
    }

    pub fn offset() -> Self {
        Self::with_pagination(Pagination::Offset)
    }

    fn with_pagination(pagination: Pagination) -> Self {
        Self {
            pagination,
            responses: RefCell::new(HashMap::new()),
            calls: RefCell::new(Vec::new()),
            clock: None,
            max_page_size: None,
        }
    }

    pub fn with_clock(mut self, clock: &FakeClock) -> Self {
        self.clock = Some(clock.clone());
        self
    }

    pub fn with_max_page_size(mut self, max_page_size: u32) -> Self {
        self.max_page_size = Some(max_page_size);
        self
    }

    /// Queues the response for the next request of `token`.
    pub fn respond(&self, token: Option<PageToken>, response: Result<PageOutcome, PageError>) {
        self.responses
            .borrow_mut()
            .entry(token)
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }
}

impl PageClient for ScriptedClient {
    fn pagination(&self) -> Pagination {
        self.pagination
    }

    fn max_page_size(&self) -> Option<u32> {
        self.max_page_size
    }

    async fn fetch_page(
        &self,
        request: &FetchRequest,
        page_size: u32,
        token: Option<&PageToken>,
    ) -> Result<PageOutcome, PageError> {
        let token = token.cloned();
        let issued_at = self
            .clock
            .as_ref()
            .map(|clock| clock.now())
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        self.calls.borrow_mut().push(RecordedCall {
            endpoint: request.endpoint().to_string(),
            token: token.clone(),
            page_size,
            issued_at,
        });

        self.responses
            .borrow_mut()
            .get_mut(&token)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Err(PageError::Fatal(format!("unexpected request for {token:?}"))))
    }
}
