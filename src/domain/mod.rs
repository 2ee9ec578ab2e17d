pub mod date_range;
pub mod fetch_request;
pub mod page;
