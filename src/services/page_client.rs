use thiserror::Error;

use crate::domain::fetch_request::FetchRequest;
use crate::domain::page::{PageOutcome, PageToken};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    /// Network failure or server-side error; worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Authentication, authorization or malformed request; retrying cannot help.
    #[error("fatal failure: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// Pages addressed by record offset; independent of each other.
    Offset,
    /// Each page needs the token returned by the previous one.
    Cursor,
}

/// Issues one page request at a time against a remote API.
pub trait PageClient {
    fn pagination(&self) -> Pagination;

    /// Largest page the API serves; bigger requested sizes are clamped to it.
    fn max_page_size(&self) -> Option<u32> {
        None
    }

    /// Requests the page at `token`, or the first page when `token` is `None`.
    async fn fetch_page(
        &self,
        request: &FetchRequest,
        page_size: u32,
        token: Option<&PageToken>,
    ) -> Result<PageOutcome, PageError>;
}

impl<T: PageClient> PageClient for &T {
    fn pagination(&self) -> Pagination {
        (**self).pagination()
    }

    fn max_page_size(&self) -> Option<u32> {
        (**self).max_page_size()
    }

    async fn fetch_page(
        &self,
        request: &FetchRequest,
        page_size: u32,
        token: Option<&PageToken>,
    ) -> Result<PageOutcome, PageError> {
        (**self).fetch_page(request, page_size, token).await
    }
}
