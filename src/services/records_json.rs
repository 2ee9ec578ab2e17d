use std::io::{self, Write};

use serde::Serialize;

use crate::domain::date_range::DateRange;
use crate::domain::page::Record;
use crate::services::month_summary::MonthSummary;

#[derive(Serialize)]
struct RecordsDocument<'a> {
    source: &'a str,
    month: String,
    start_date: String,
    end_date: String,
    count: usize,
    summary: &'a MonthSummary,
    records: &'a [Record],
}

pub fn serialize_records_to_json<W: Write>(
    writer: &mut W,
    source: &str,
    range: &DateRange,
    summary: &MonthSummary,
    records: &[Record],
) -> io::Result<()> {
    let document = RecordsDocument {
        source,
        month: range.month_token(),
        start_date: range.start().format("%Y-%m-%d").to_string(),
        end_date: range.end().format("%Y-%m-%d").to_string(),
        count: records.len(),
        summary,
        records,
    };
    serde_json::to_writer_pretty(&mut *writer, &document).map_err(io::Error::other)?;
    writer.write_all(b"\n")
}
