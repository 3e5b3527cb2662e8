//! Tunnel loader-log block parser.
//!
//! The loader controller writes fixed four-line blocks, one per load
//! event: a timestamp line, the invoice line, an unused status line, and
//! the washify record line. Files are re-uploaded as they grow, so a
//! re-run seeks back to the last persisted record's block before walking
//! forward.

use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Lines per block in the loader log
pub const BLOCK_STRIDE: usize = 4;

static LEAD_FIELD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([^,]+)").unwrap());
static INVOICE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Invoice Id (\d+)").unwrap());

/// Errors a single block can fail with; all of them skip the block
/// without aborting the file walk
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("block at line {0} overruns end of file")]
    Truncated(usize),

    #[error("missing timestamp field on line {0}")]
    MissingTimestamp(usize),

    #[error("unparseable log date {0:?}")]
    BadDate(String),

    #[error("unparseable log time {0:?}")]
    BadTime(String),

    #[error("missing invoice id on line {0}")]
    MissingInvoice(usize),
}

/// One parsed load event, keyed by `bill`
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderEntry {
    pub bill: i64,
    pub washify_rec: i64,
    pub log_dt: NaiveDate,
    pub log_time: NaiveTime,
}

/// Resume cursor: the most recently persisted loader record
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderCursor {
    pub bill: i64,
    pub log_dt: NaiveDate,
    pub log_time: NaiveTime,
}

/// Parse the block starting at `start`. Line 0 carries the timestamp,
/// line 1 the invoice id, line 3 the washify record id; line 2 is unused.
pub fn parse_block(lines: &[&str], start: usize) -> Result<LoaderEntry, BlockError> {
    if start + BLOCK_STRIDE > lines.len() {
        return Err(BlockError::Truncated(start));
    }

    let (log_dt, log_time) = parse_timestamp_line(lines[start], start)?;
    let bill = invoice_id(lines[start + 1]).ok_or(BlockError::MissingInvoice(start + 1))?;
    let washify_rec = invoice_id(lines[start + 3]).ok_or(BlockError::MissingInvoice(start + 3))?;

    Ok(LoaderEntry {
        bill,
        washify_rec,
        log_dt,
        log_time,
    })
}

fn parse_timestamp_line(line: &str, index: usize) -> Result<(NaiveDate, NaiveTime), BlockError> {
    let lead = LEAD_FIELD_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .ok_or(BlockError::MissingTimestamp(index))?;

    let (date_part, time_part) = lead
        .split_once(char::is_whitespace)
        .ok_or(BlockError::MissingTimestamp(index))?;

    let log_dt = parse_log_date(date_part)?;
    let log_time = parse_log_time(time_part)?;
    Ok((log_dt, log_time))
}

fn parse_log_date(raw: &str) -> Result<NaiveDate, BlockError> {
    NaiveDate::parse_from_str(raw, "%m/%d/%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|_| BlockError::BadDate(raw.to_string()))
}

/// Normalize the raw time field: AM/PM markers are stripped (not applied)
/// and the hour is zero-padded to two digits.
fn parse_log_time(raw: &str) -> Result<NaiveTime, BlockError> {
    let stripped = raw.replace("AM", "").replace("PM", "");
    let trimmed = stripped.trim();
    let padded = if trimmed.find(':') == Some(1) {
        format!("0{trimmed}")
    } else {
        trimmed.to_string()
    };
    NaiveTime::parse_from_str(&padded, "%H:%M:%S")
        .map_err(|_| BlockError::BadTime(raw.to_string()))
}

/// Find the block-aligned index to resume from: the last line mentioning
/// the cursor's bill, snapped back to its block boundary. None means the
/// bill does not appear and the whole file should be processed.
pub fn resume_start(lines: &[&str], bill: i64) -> Option<usize> {
    lines.iter().enumerate().rev().find_map(|(index, line)| {
        invoice_id(line)
            .filter(|found| *found == bill)
            .map(|_| index - index % BLOCK_STRIDE)
    })
}

fn invoice_id(line: &str) -> Option<i64> {
    INVOICE_ID_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
}
