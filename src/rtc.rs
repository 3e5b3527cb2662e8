//! RTC (Laguna) interface-log event extractor.
//!
//! The controller appends entity-encoded XML exchanges to an HTML shell,
//! with no reliable line structure: headers get concatenated, events
//! share physical lines, and the encoding drifts. After normalization
//! the text is split at every timestamp header and each candidate is run
//! through the event pattern. Production behavior is a single strict
//! pattern; the layered permissive cascade from an earlier firmware
//! generation is kept behind an explicit opt-in.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;

/// Stored payload is truncated to this many characters for audit
pub const RAW_PAYLOAD_LIMIT: usize = 500;

/// Transfer direction of an RTC exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Send => "send",
            Direction::Recv => "recv",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "send" => Some(Direction::Send),
            "recv" => Some(Direction::Recv),
            _ => None,
        }
    }
}

/// One extracted wash-cycle event
#[derive(Debug, Clone, PartialEq)]
pub struct RtcEvent {
    pub wash_id: String,
    pub washpkgnum: Option<i32>,
    pub wash_ts: Option<NaiveDateTime>,
    pub source_ip: String,
    pub direction: Direction,
    /// Truncated raw candidate line, kept for audit
    pub raw_payload: String,
}

const MONTHS: &str = "Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec";

static TS_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?:{MONTHS})\s+\d{{1,2}}\s+\d{{4}}\s*-\s*\d{{2}}:\d{{2}}:\d{{2}}"
    ))
    .unwrap()
});

/// Event patterns in decreasing strictness. Production runs only the
/// first; the rest are the historical permissive fallbacks, applied
/// top-to-bottom when explicitly enabled.
pub static EVENT_CASCADE: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "strict",
            Regex::new(&format!(
                r"(?s)^(?P<ts>(?:{MONTHS})\s+\d{{1,2}}\s+\d{{4}})\s*-\s*(?P<hms>\d{{2}}:\d{{2}}:\d{{2}})\s*:\s*(?P<ip>[\d.]+)\s*:\s*(?P<dir>send|recv).*?<id>\s*(?P<id>\d+)\s*</id>"
            ))
            .unwrap(),
        ),
        (
            "no-source-ip",
            Regex::new(&format!(
                r"(?s)^(?P<ts>(?:{MONTHS})\s+\d{{1,2}}\s+\d{{4}})\s*-\s*(?P<hms>\d{{2}}:\d{{2}}:\d{{2}}).*?\b(?P<dir>send|recv)\b.*?<id>\s*(?P<id>\d+)\s*</id>"
            ))
            .unwrap(),
        ),
        (
            "direction-and-id",
            Regex::new(r"(?s)\b(?P<dir>send|recv)\b.*?<id>\s*(?P<id>\d+)\s*</id>").unwrap(),
        ),
    ]
});

static WASH_PKG_NUM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<washPkgNum>\s*(\d+)\s*</washPkgNum>").unwrap());

const TS_FORMAT: &str = "%b %d %Y %H:%M:%S";

/// Split normalized text into candidate event lines, one per timestamp
/// header. Headers may share a physical line, so splitting is positional
/// rather than newline-based. Text with no headers at all falls back to
/// plain non-empty lines so the permissive cascade still has input.
pub fn split_candidates(text: &str) -> Vec<&str> {
    let starts: Vec<usize> = TS_HEADER_RE.find_iter(text).map(|m| m.start()).collect();
    if starts.is_empty() {
        return text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
    }

    let mut candidates = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        let candidate = text[start..end].trim();
        if !candidate.is_empty() {
            candidates.push(candidate);
        }
    }
    candidates
}

/// Run one candidate line through the pattern cascade. Strict mode uses
/// only the first pattern; a candidate failing every applicable pattern
/// is silently dropped.
pub fn extract_event(candidate: &str, permissive: bool) -> Option<RtcEvent> {
    let depth = if permissive { EVENT_CASCADE.len() } else { 1 };

    for (_, pattern) in EVENT_CASCADE.iter().take(depth) {
        let caps = match pattern.captures(candidate) {
            Some(caps) => caps,
            None => continue,
        };

        let direction = match caps.name("dir").and_then(|m| Direction::parse(m.as_str())) {
            Some(direction) => direction,
            None => continue,
        };
        let wash_id = match caps.name("id") {
            Some(m) => m.as_str().to_string(),
            None => continue,
        };

        let wash_ts = match (caps.name("ts"), caps.name("hms")) {
            (Some(date), Some(hms)) => NaiveDateTime::parse_from_str(
                &format!("{} {}", date.as_str(), hms.as_str()),
                TS_FORMAT,
            )
            .ok(),
            _ => None,
        };
        let source_ip = caps
            .name("ip")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let washpkgnum = WASH_PKG_NUM_RE
            .captures(candidate)
            .and_then(|caps| caps[1].parse::<i32>().ok());

        return Some(RtcEvent {
            wash_id,
            washpkgnum,
            wash_ts,
            source_ip,
            direction,
            raw_payload: candidate.chars().take(RAW_PAYLOAD_LIMIT).collect(),
        });
    }

    None
}

/// Extract every event from normalized text, in file order.
pub fn extract_events(text: &str, permissive: bool) -> Vec<RtcEvent> {
    split_candidates(text)
        .into_iter()
        .filter_map(|candidate| extract_event(candidate, permissive))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const RECV_LINE: &str =
        "Mar 03 2025 - 12:44:55 : 192.168.1.50 : recv : <WashData><id>55019</id><washPkgNum>3</washPkgNum></WashData>";

    #[test]
    fn test_strict_extraction() {
        let event = extract_event(RECV_LINE, false).unwrap();
        assert_eq!(event.wash_id, "55019");
        assert_eq!(event.washpkgnum, Some(3));
        assert_eq!(event.source_ip, "192.168.1.50");
        assert_eq!(event.direction, Direction::Recv);
        let expected = NaiveDate::from_ymd_opt(2025, 3, 3)
            .unwrap()
            .and_hms_opt(12, 44, 55)
            .unwrap();
        assert_eq!(event.wash_ts, Some(expected));
    }

    #[test]
    fn test_washpkgnum_is_optional() {
        let line = "Mar 03 2025 - 12:44:55 : 10.0.0.5 : send : <WashData><id>7</id></WashData>";
        let event = extract_event(line, false).unwrap();
        assert_eq!(event.wash_id, "7");
        assert_eq!(event.washpkgnum, None);
        assert_eq!(event.direction, Direction::Send);
    }

    #[test]
    fn test_line_without_id_is_dropped() {
        let line = "Mar 03 2025 - 12:44:55 : 10.0.0.5 : recv : <WashData>no id here</WashData>";
        assert!(extract_event(line, false).is_none());
    }

    #[test]
    fn test_strict_mode_rejects_ip_less_line() {
        let line = "Mar 03 2025 - 12:44:55 - recv : <id>42</id>";
        assert!(extract_event(line, false).is_none());
        // permissive cascade picks it up with an empty source ip
        let event = extract_event(line, true).unwrap();
        assert_eq!(event.wash_id, "42");
        assert_eq!(event.source_ip, "");
        assert!(event.wash_ts.is_some());
    }

    #[test]
    fn test_permissive_loosest_pattern_has_no_timestamp() {
        let line = "recv <id>42</id>";
        let event = extract_event(line, true).unwrap();
        assert_eq!(event.wash_id, "42");
        assert_eq!(event.wash_ts, None);
        assert_eq!(event.source_ip, "");
    }

    #[test]
    fn test_split_candidates_shared_physical_line() {
        let text = "Mar 03 2025 - 12:44:55 : 10.0.0.5 : recv : <id>1</id> Mar 03 2025 - 12:45:10 : 10.0.0.5 : recv : <id>2</id>";
        let candidates = split_candidates(text);
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].contains("<id>1</id>"));
        assert!(candidates[1].contains("<id>2</id>"));
    }

    #[test]
    fn test_split_candidates_without_headers_falls_back_to_lines() {
        let text = "recv <id>1</id>\n\nsend <id>2</id>";
        let candidates = split_candidates(text);
        assert_eq!(candidates, vec!["recv <id>1</id>", "send <id>2</id>"]);
    }

    #[test]
    fn test_extract_events_keeps_file_order() {
        let text = "\
Mar 03 2025 - 12:44:55 : 10.0.0.5 : recv : <id>1</id>
Mar 03 2025 - 12:45:10 : 10.0.0.5 : send : <id>2</id>
Mar 03 2025 - 12:45:30 : 10.0.0.5 : recv : <id>3</id>";
        let events = extract_events(text, false);
        let ids: Vec<&str> = events.iter().map(|e| e.wash_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_raw_payload_truncated() {
        let long_tail = "x".repeat(2 * RAW_PAYLOAD_LIMIT);
        let line =
            format!("Mar 03 2025 - 12:44:55 : 10.0.0.5 : recv : <id>9</id> {long_tail}");
        let event = extract_event(&line, false).unwrap();
        assert_eq!(event.raw_payload.chars().count(), RAW_PAYLOAD_LIMIT);
    }

    #[test]
    fn test_cascade_order_is_fixed() {
        let names: Vec<&str> = EVENT_CASCADE.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["strict", "no-source-ip", "direction-and-id"]);
    }
}
