//! Kiosk transaction-log session reconstructor.
//!
//! A kiosk log interleaves everything the terminal did (screen
//! transitions, payment attempts, membership lookups) into one stream of
//! timestamped lines. This module folds that stream into transaction
//! sessions: a session opens on the first content line, accumulates
//! fields through ordered pattern cascades, and closes on an explicit
//! end-marker pair. Closed sessions become one `WashSessionRow` each;
//! sessions without a positive invoice number are discarded.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

/// Wash-type vocabulary: package-name fragment to mapped type.
/// Matching is containment against the upper-cased package name;
/// the longest matching fragment wins.
pub const WASH_TYPE_VOCABULARY: &[(&str, WashType)] = &[
    ("INTERIOR SUP", WashType::Super),
    ("BEST WASH", WashType::Best),
    ("BETTER WASH", WashType::Better),
    ("GOOD WASH", WashType::Good),
    ("BASIC WASH", WashType::Basic),
];

/// Mapped wash type, restricted to the known vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WashType {
    Basic,
    Good,
    Better,
    Best,
    Super,
}

impl WashType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WashType::Basic => "Basic",
            WashType::Good => "Good",
            WashType::Better => "Better",
            WashType::Best => "Best",
            WashType::Super => "Super",
        }
    }
}

/// Unlimited-membership flag kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlimitedType {
    New,
    Recurring,
}

impl UnlimitedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnlimitedType::New => "NEW",
            UnlimitedType::Recurring => "RECURRING",
        }
    }
}

/// Session classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceKind {
    Normal,
    Signup,
    Wash,
}

impl InvoiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceKind::Normal => "NORMAL",
            InvoiceKind::Signup => "SIGNUP",
            InvoiceKind::Wash => "WASH",
        }
    }
}

// Line markers that gate the field extractors
const SERVICE_SELECTION_MARKER: &str = "ServiceControlViewModel";
const SELECT_SERVICE_MARKER: &str = "SelectServiceBlock";
const OPTIONAL_SERVICE_MARKER: &str = "SelectOptionalServiceBlock";
const SAVE_TRANSACTIONS_MARKER: &str = "SaveTransactions";
const SAVE_TRANSACTION_MARKER: &str = "SaveTransaction";

static TS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d{1,2}/\d{1,2}/\d{4}\s+\d{1,2}:\d{2}:\d{2}\s+[AP]M)\s*,\s*").unwrap()
});

const TS_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

/// Invoice patterns in fixed priority order; the first non-zero match
/// wins and is sticky for the session.
pub static INVOICE_CASCADE: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "inline-payment",
            Regex::new(r"(?i)InvoiceID\s+(\d+)\s+Payment Type\s+[A-Za-z]+").unwrap(),
        ),
        (
            "proceed-to-wash",
            Regex::new(r"(?i)ProceedToCarWashViewModel.*?InvoiceID\s+(\d+)").unwrap(),
        ),
        (
            "dispatcher",
            Regex::new(r"(?i)DoTransactionAfterDispatcher\s+(\d+)").unwrap(),
        ),
        ("invoice-id", Regex::new(r"(?i)InvoiceID\s+(\d+)").unwrap()),
        ("aws-invoice-id", Regex::new(r"(?i)InvoiceId\s+(\d+)").unwrap()),
    ]
});

static WASH_PKG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Wash Package\s+(\d+)\s+with Name\s+(.+)$").unwrap());
static PAYMENT_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Payment Type\s+([A-Za-z]+)").unwrap());
static AWS_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Aws File Name\s+(.+)$").unwrap());
static LICENSE_PLATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)License Plate\s+([A-Z0-9]+)").unwrap());
static CUSTOMER_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Customer Name\s+([^,]+)").unwrap());
static UNLIMITED_NEW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)NEW CUSTOMER\s*->").unwrap());
static UNLIMITED_RECUR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)RECURRING\s*->").unwrap());

static TIP_HEAD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*TIP\b").unwrap());
static TIP_AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bTip\s*\$?\s*([0-9]+(?:\.[0-9]{1,2})?)\b").unwrap());

static DISCOUNT_BOTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Discount[:\s]+([A-Za-z0-9._-]+)\s+\$?([0-9]+(?:\.[0-9]{1,2})?)").unwrap()
});
static DISCOUNT_CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Discount(?:\s+Code)?[:\s]+([A-Za-z][A-Za-z0-9._-]*)").unwrap()
});
static DISCOUNT_AMOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Discount(?:\s+Amount)?[:\s]+\$?([0-9]+(?:\.[0-9]{1,2})?)").unwrap()
});
static TAX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Tax[:\s]+\$?([0-9]+(?:\.[0-9]{1,2})?)\b").unwrap());
static TOTAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Total[:\s]+\$?([0-9]+(?:\.[0-9]{1,2})?)\b").unwrap());

static SPACE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// An add-on observed during a session
#[derive(Debug, Clone, PartialEq)]
pub struct AddOn {
    pub name: String,
    pub observed_ts: Option<NaiveDateTime>,
}

/// Accumulating state for one kiosk transaction
#[derive(Debug, Clone)]
pub struct Session {
    pub invoice: Option<i64>,
    pub first_ts: Option<NaiveDateTime>,
    pub last_ts: Option<NaiveDateTime>,
    pub customer_name: Option<String>,
    pub license_plate: Option<String>,
    pub wash_package_id: Option<String>,
    pub wash_package_name: Option<String>,
    pub payment_type: Option<String>,
    payment_type_ts: Option<NaiveDateTime>,
    pub image_path: Option<String>,
    pub is_unlimited: bool,
    pub unlimited_type: Option<UnlimitedType>,
    unlimited_ts: Option<NaiveDateTime>,
    // insertion-ordered, keyed by package id; re-observing an id
    // overwrites in place
    addons: Vec<(String, AddOn)>,
    pub tip_amount: f64,
    tip_ts: Option<NaiveDateTime>,
    pub discount_code: Option<String>,
    pub discount_amount: Option<f64>,
    pub tax: Option<f64>,
    pub total: Option<f64>,
    /// Position of this session within its file, assigned at close
    pub session_index: usize,
}

impl Session {
    fn open(ts: Option<NaiveDateTime>) -> Self {
        Self {
            invoice: None,
            first_ts: ts,
            last_ts: ts,
            customer_name: None,
            license_plate: None,
            wash_package_id: None,
            wash_package_name: None,
            payment_type: None,
            payment_type_ts: None,
            image_path: None,
            is_unlimited: false,
            unlimited_type: None,
            unlimited_ts: None,
            addons: Vec::new(),
            tip_amount: 0.0,
            tip_ts: None,
            discount_code: None,
            discount_amount: None,
            tax: None,
            total: None,
            session_index: 0,
        }
    }

    fn observe_timestamp(&mut self, ts: Option<NaiveDateTime>) {
        if let Some(t) = ts {
            if self.first_ts.map_or(true, |cur| t < cur) {
                self.first_ts = Some(t);
            }
            if self.last_ts.map_or(true, |cur| t > cur) {
                self.last_ts = Some(t);
            }
        }
    }

    /// RECURRING always wins over NEW; otherwise a flag only applies if
    /// its timestamp is not older than the one already recorded.
    fn set_unlimited(&mut self, kind: UnlimitedType, ts: Option<NaiveDateTime>) {
        let newer = match (self.unlimited_ts, ts) {
            (None, _) => true,
            (Some(cur), Some(t)) => t >= cur,
            (Some(_), None) => false,
        };
        if newer || kind == UnlimitedType::Recurring {
            self.is_unlimited = true;
            if kind == UnlimitedType::Recurring || self.unlimited_type.is_none() {
                self.unlimited_type = Some(kind);
            }
            if ts.is_some() {
                self.unlimited_ts = ts;
            }
        }
    }

    fn record_addon(&mut self, id: String, name: String, ts: Option<NaiveDateTime>) {
        let entry = AddOn {
            name,
            observed_ts: ts,
        };
        if let Some(slot) = self.addons.iter_mut().find(|(k, _)| *k == id) {
            slot.1 = entry;
        } else {
            self.addons.push((id, entry));
        }
    }

    fn apply_discounts(&mut self, content: &str) {
        if let Some(caps) = DISCOUNT_BOTH_RE.captures(content) {
            if !is_discount_keyword(&caps[1]) {
                self.discount_code = Some(caps[1].to_string());
                self.discount_amount = caps[2].parse().ok();
                return;
            }
        }
        if let Some(caps) = DISCOUNT_AMOUNT_RE.captures(content) {
            self.discount_amount = caps[1].parse().ok();
        } else if let Some(caps) = DISCOUNT_CODE_RE.captures(content) {
            if !is_discount_keyword(&caps[1]) {
                self.discount_code = Some(caps[1].to_string());
            }
        }
    }

    fn apply_line(&mut self, content: &str, ts: Option<NaiveDateTime>) {
        // Invoice: ordered cascade, first non-zero match is sticky
        if self.invoice.is_none() {
            for (_, pattern) in INVOICE_CASCADE.iter() {
                if let Some(n) = pattern
                    .captures(content)
                    .and_then(|caps| caps.get(1))
                    .and_then(|m| m.as_str().parse::<i64>().ok())
                {
                    if n > 0 {
                        self.invoice = Some(n);
                        break;
                    }
                }
            }
        }

        // Unlimited membership flags
        if UNLIMITED_NEW_RE.is_match(content) {
            self.set_unlimited(UnlimitedType::New, ts);
        }
        if UNLIMITED_RECUR_RE.is_match(content) {
            self.set_unlimited(UnlimitedType::Recurring, ts);
        }

        // Customer name and license plate: first match is sticky
        if self.customer_name.is_none() {
            if let Some(caps) = CUSTOMER_NAME_RE.captures(content) {
                let name = SPACE_RUN_RE.replace_all(caps[1].trim(), " ").into_owned();
                if !name.is_empty() {
                    self.customer_name = Some(name);
                }
            }
        }
        if self.license_plate.is_none() {
            if let Some(caps) = LICENSE_PLATE_RE.captures(content) {
                self.license_plate = Some(caps[1].trim().to_uppercase());
            }
        }

        // Wash package: only inside a service-selection line
        if content.contains(SERVICE_SELECTION_MARKER) && content.contains(SELECT_SERVICE_MARKER) {
            if let Some(caps) = WASH_PKG_RE.captures(content) {
                let pkg_id = caps[1].trim().to_string();
                let pkg_name = caps[2].trim().trim_end_matches('.').to_string();
                if !TIP_HEAD_RE.is_match(&pkg_name) {
                    self.wash_package_id = Some(pkg_id);
                    self.wash_package_name = Some(pkg_name);
                }
            }
        }

        // Add-ons: only inside an optional-service line; the primary wash
        // re-appearing as its own add-on is filtered out
        if content.contains(OPTIONAL_SERVICE_MARKER) {
            if let Some(caps) = WASH_PKG_RE.captures(content) {
                let id = caps[1].trim().to_string();
                let name = caps[2].trim().trim_end_matches('.').to_string();
                if !name.is_empty()
                    && self.wash_package_id.as_deref() != Some(id.as_str())
                    && self.wash_package_name.as_deref() != Some(name.as_str())
                {
                    if let Some(amount) = tip_amount_from_text(&name) {
                        let newer = match (self.tip_ts, ts) {
                            (None, _) => true,
                            (Some(cur), Some(t)) => t >= cur,
                            (Some(_), None) => false,
                        };
                        if newer {
                            self.tip_amount = amount;
                            self.tip_ts = ts;
                        }
                    }
                    self.record_addon(id, name, ts);
                }
            }
        }

        // Payment: latest-timestamp wins
        if content.contains(SAVE_TRANSACTIONS_MARKER) && content.contains(SAVE_TRANSACTION_MARKER) {
            if let Some(caps) = PAYMENT_TYPE_RE.captures(content) {
                let newer = match (self.payment_type_ts, ts) {
                    (None, _) => true,
                    (Some(cur), Some(t)) => t >= cur,
                    (Some(_), None) => false,
                };
                if newer {
                    self.payment_type = Some(caps[1].trim().to_string());
                    self.payment_type_ts = ts;
                }
            }
        }

        // Receipt image path: first match is sticky
        if self.image_path.is_none() {
            if let Some(caps) = AWS_FILE_RE.captures(content) {
                self.image_path = Some(caps[1].trim().to_string());
            }
        }

        // Discount / tax / total: overwrite on every match
        self.apply_discounts(content);
        if let Some(caps) = TAX_RE.captures(content) {
            self.tax = caps[1].parse().ok();
        }
        if let Some(caps) = TOTAL_RE.captures(content) {
            self.total = caps[1].parse().ok();
        }
    }
}

fn is_discount_keyword(token: &str) -> bool {
    token.eq_ignore_ascii_case("code") || token.eq_ignore_ascii_case("amount")
}

/// Extract the tip amount embedded in an add-on name, if any.
fn tip_amount_from_text(text: &str) -> Option<f64> {
    TIP_AMOUNT_RE
        .captures(text)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .filter(|v| *v > 0.0)
}

/// Split a raw line into its optional timestamp header and content.
pub fn split_timestamp(line: &str) -> (Option<NaiveDateTime>, &str) {
    if let Some(caps) = TS_RE.captures(line) {
        if let (Some(whole), Some(header)) = (caps.get(0), caps.get(1)) {
            let ts = NaiveDateTime::parse_from_str(header.as_str(), TS_FORMAT).ok();
            return (ts, &line[whole.end()..]);
        }
    }
    (None, line)
}

fn is_close_marker(content: &str) -> bool {
    (content.contains("ProceedToCarWashViewModel") && content.contains("ReturnToMainScreen"))
        || (content.contains("TransactionMethods") && content.contains("ResetTransaction"))
}

/// Fold a file's lines into closed sessions.
///
/// Exactly one session accumulates at a time; it closes on an end-marker
/// line and the next content line opens a new one. A session still open
/// at end of file is dropped, never flushed.
pub fn fold_sessions<'a, I>(lines: I) -> Vec<Session>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut closed = Vec::new();
    let mut current: Option<Session> = None;
    let mut next_index = 0usize;

    for raw in lines {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let (ts, content) = split_timestamp(line);

        let sess = current.get_or_insert_with(|| Session::open(ts));
        sess.observe_timestamp(ts);
        sess.apply_line(content, ts);

        if is_close_marker(content) {
            if let Some(mut done) = current.take() {
                done.observe_timestamp(ts);
                done.session_index = next_index;
                next_index += 1;
                closed.push(done);
            }
        }
    }

    closed
}

/// Map a package name onto the wash-type vocabulary; longest matching
/// fragment wins, unrecognized names map to None.
pub fn map_wash_type(name: &str) -> Option<WashType> {
    let upper = name.to_uppercase();
    WASH_TYPE_VOCABULARY
        .iter()
        .filter(|(fragment, _)| upper.contains(fragment))
        .max_by_key(|(fragment, _)| fragment.len())
        .map(|(_, wash_type)| *wash_type)
}

/// Pull the location token out of a kiosk source filename
/// (`<site_prefix>_<LOCATION>_<digits>_Transaction...`); no match yields
/// an empty location, never an error.
pub fn location_from_filename(file_name: &str, site_prefix: &str) -> String {
    let pattern = format!(r"(?i){}_(.+?)_\d+_Transaction", regex::escape(site_prefix));
    match Regex::new(&pattern) {
        Ok(re) => re
            .captures(file_name)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}

/// One persisted wash-transaction row, keyed by `bill`
#[derive(Debug, Clone, PartialEq)]
pub struct WashSessionRow {
    pub bill: i64,
    pub wash_ts_first: Option<NaiveDateTime>,
    pub wash_ts_last: Option<NaiveDateTime>,
    pub license_plate: Option<String>,
    pub customer_name: Option<String>,
    pub wash_package_id: Option<i32>,
    pub wash_package_name: Option<String>,
    pub wash_type: Option<WashType>,
    pub payment_type: Option<String>,
    pub image_path: Option<String>,
    pub is_unlimited: bool,
    pub unlimited_type: Option<UnlimitedType>,
    pub addons: Option<String>,
    pub tip_amount: f64,
    pub discount_code: Option<String>,
    pub discount_amount: Option<f64>,
    pub tax: Option<f64>,
    pub total: Option<f64>,
    pub location: String,
    pub source_file: String,
    pub created_on: NaiveDate,
    pub created_at: NaiveTime,
    pub invoice_kind: InvoiceKind,
}

/// Turn closed sessions into rows. Sessions without a positive invoice
/// are discarded. Add-ons render as a semicolon-joined list ordered by
/// observation timestamp (missing timestamps sort first).
pub fn build_rows(
    sessions: Vec<Session>,
    location: &str,
    source_file: &str,
    created_on: NaiveDate,
    created_at: NaiveTime,
) -> Vec<WashSessionRow> {
    sessions
        .into_iter()
        .filter_map(|sess| {
            let bill = sess.invoice?;

            let mut entries: Vec<AddOn> =
                sess.addons.iter().map(|(_, addon)| addon.clone()).collect();
            entries.sort_by_key(|a| a.observed_ts.unwrap_or(NaiveDateTime::MIN));
            let addons = if entries.is_empty() {
                None
            } else {
                Some(
                    entries
                        .iter()
                        .map(|a| a.name.as_str())
                        .collect::<Vec<_>>()
                        .join("; "),
                )
            };

            let invoice_kind = if sess.is_unlimited {
                if sess.session_index == 0 {
                    InvoiceKind::Signup
                } else {
                    InvoiceKind::Wash
                }
            } else {
                InvoiceKind::Normal
            };

            let wash_type = sess.wash_package_name.as_deref().and_then(map_wash_type);
            let wash_package_id = sess
                .wash_package_id
                .as_deref()
                .and_then(|id| id.parse::<i32>().ok());

            Some(WashSessionRow {
                bill,
                wash_ts_first: sess.first_ts,
                wash_ts_last: sess.last_ts,
                license_plate: sess.license_plate,
                customer_name: sess.customer_name,
                wash_package_id,
                wash_package_name: sess.wash_package_name,
                wash_type,
                payment_type: sess.payment_type,
                image_path: sess.image_path,
                is_unlimited: sess.is_unlimited,
                unlimited_type: sess.unlimited_type,
                addons,
                tip_amount: sess.tip_amount,
                discount_code: sess.discount_code,
                discount_amount: sess.discount_amount,
                tax: sess.tax,
                total: sess.total,
                location: location.to_string(),
                source_file: source_file.to_string(),
                created_on,
                created_at,
                invoice_kind,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn stamp() -> (NaiveDate, NaiveTime) {
        (
            NaiveDate::from_ymd_opt(2025, 11, 4).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        )
    }

    fn rows_for(lines: &[&str]) -> Vec<WashSessionRow> {
        let sessions = fold_sessions(lines.iter().copied());
        let (d, t) = stamp();
        build_rows(sessions, "FRA", "test.txt", d, t)
    }

    const CLOSE_LINE: &str =
        "11/04/2025 09:20:00 AM , ProceedToCarWashViewModel ReturnToMainScreen";

    #[test]
    fn test_invoice_and_payment_from_inline_line() {
        let rows = rows_for(&[
            "11/04/2025 09:15:02 AM , InvoiceID 55019 Payment Type CREDIT",
            "11/04/2025 09:15:40 AM , SaveTransactions SaveTransaction Payment Type CREDIT",
            CLOSE_LINE,
        ]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bill, 55019);
        assert_eq!(rows[0].payment_type.as_deref(), Some("CREDIT"));
        assert_eq!(rows[0].invoice_kind, InvoiceKind::Normal);
    }

    #[test]
    fn test_invoice_is_sticky_and_zero_is_rejected() {
        let rows = rows_for(&[
            "11/04/2025 09:00:00 AM , InvoiceID 0 noise",
            "11/04/2025 09:01:00 AM , DoTransactionAfterDispatcher 777",
            "11/04/2025 09:02:00 AM , InvoiceID 999",
            CLOSE_LINE,
        ]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bill, 777);
    }

    #[test]
    fn test_session_without_invoice_is_discarded() {
        let rows = rows_for(&[
            "11/04/2025 09:00:00 AM , just some noise",
            CLOSE_LINE,
        ]);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_open_session_at_eof_is_dropped() {
        let rows = rows_for(&[
            "11/04/2025 09:15:02 AM , InvoiceID 55019 Payment Type CREDIT",
            "11/04/2025 09:16:00 AM , more activity",
        ]);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_recurring_beats_new_in_either_order() {
        let rows = rows_for(&[
            "11/04/2025 09:00:00 AM , RECURRING -> member check",
            "11/04/2025 09:01:00 AM , NEW CUSTOMER -> enrolled",
            "11/04/2025 09:02:00 AM , InvoiceID 41",
            CLOSE_LINE,
        ]);
        assert_eq!(rows[0].unlimited_type, Some(UnlimitedType::Recurring));

        let rows = rows_for(&[
            "11/04/2025 09:00:00 AM , NEW CUSTOMER -> enrolled",
            "11/04/2025 09:01:00 AM , RECURRING -> member check",
            "11/04/2025 09:02:00 AM , InvoiceID 41",
            CLOSE_LINE,
        ]);
        assert_eq!(rows[0].unlimited_type, Some(UnlimitedType::Recurring));
        assert!(rows[0].is_unlimited);
    }

    #[test]
    fn test_classification_signup_then_wash() {
        let rows = rows_for(&[
            "11/04/2025 09:00:00 AM , NEW CUSTOMER -> enrolled",
            "11/04/2025 09:01:00 AM , InvoiceID 10",
            CLOSE_LINE,
            "11/04/2025 09:30:00 AM , RECURRING -> member check",
            "11/04/2025 09:31:00 AM , InvoiceID 11",
            CLOSE_LINE,
            "11/04/2025 10:00:00 AM , InvoiceID 12",
            CLOSE_LINE,
        ]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].invoice_kind, InvoiceKind::Signup);
        assert_eq!(rows[1].invoice_kind, InvoiceKind::Wash);
        assert_eq!(rows[2].invoice_kind, InvoiceKind::Normal);
    }

    #[test]
    fn test_invoiceless_first_session_still_consumes_index_zero() {
        let rows = rows_for(&[
            "11/04/2025 08:00:00 AM , attract screen",
            CLOSE_LINE,
            "11/04/2025 09:00:00 AM , NEW CUSTOMER -> enrolled",
            "11/04/2025 09:01:00 AM , InvoiceID 10",
            CLOSE_LINE,
        ]);
        // the unlimited session is second in the file, so it is a WASH
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].invoice_kind, InvoiceKind::Wash);
    }

    #[test]
    fn test_wash_package_and_type() {
        let rows = rows_for(&[
            "11/04/2025 09:00:00 AM , ServiceControlViewModel SelectServiceBlock Wash Package 4 with Name BEST WASH.",
            "11/04/2025 09:01:00 AM , InvoiceID 10",
            CLOSE_LINE,
        ]);
        assert_eq!(rows[0].wash_package_id, Some(4));
        assert_eq!(rows[0].wash_package_name.as_deref(), Some("BEST WASH"));
        assert_eq!(rows[0].wash_type, Some(WashType::Best));
    }

    #[test]
    fn test_tip_text_is_not_a_wash_package() {
        let rows = rows_for(&[
            "11/04/2025 09:00:00 AM , ServiceControlViewModel SelectServiceBlock Wash Package 9 with Name TIP $5.00",
            "11/04/2025 09:01:00 AM , InvoiceID 10",
            CLOSE_LINE,
        ]);
        assert_eq!(rows[0].wash_package_id, None);
        assert_eq!(rows[0].wash_package_name, None);
    }

    #[test]
    fn test_addon_dedup_against_primary_package() {
        let rows = rows_for(&[
            "11/04/2025 09:00:00 AM , ServiceControlViewModel SelectServiceBlock Wash Package 4 with Name BEST WASH",
            "11/04/2025 09:01:00 AM , SelectOptionalServiceBlock Wash Package 4 with Name BEST WASH",
            "11/04/2025 09:02:00 AM , SelectOptionalServiceBlock Wash Package 7 with Name CERAMIC SEAL",
            "11/04/2025 09:03:00 AM , InvoiceID 10",
            CLOSE_LINE,
        ]);
        assert_eq!(rows[0].addons.as_deref(), Some("CERAMIC SEAL"));
    }

    #[test]
    fn test_addons_ordered_by_observation_timestamp() {
        let rows = rows_for(&[
            "11/04/2025 09:02:00 AM , SelectOptionalServiceBlock Wash Package 7 with Name SECOND",
            "11/04/2025 09:01:00 AM , SelectOptionalServiceBlock Wash Package 8 with Name FIRST",
            "11/04/2025 09:03:00 AM , SelectOptionalServiceBlock Wash Package 9 with Name THIRD",
            "11/04/2025 09:04:00 AM , InvoiceID 10",
            CLOSE_LINE,
        ]);
        assert_eq!(rows[0].addons.as_deref(), Some("FIRST; SECOND; THIRD"));
    }

    #[test]
    fn test_addon_tip_updates_session_tip() {
        let rows = rows_for(&[
            "11/04/2025 09:01:00 AM , SelectOptionalServiceBlock Wash Package 20 with Name Tip $3.00",
            "11/04/2025 09:02:00 AM , SelectOptionalServiceBlock Wash Package 21 with Name Tip $5.00",
            "11/04/2025 09:03:00 AM , InvoiceID 10",
            CLOSE_LINE,
        ]);
        assert_eq!(rows[0].tip_amount, 5.0);
    }

    #[test]
    fn test_customer_name_and_plate() {
        let rows = rows_for(&[
            "11/04/2025 09:00:00 AM , Customer Name  JOHN   DOE , more",
            "11/04/2025 09:01:00 AM , License Plate abc123",
            "11/04/2025 09:02:00 AM , InvoiceID 10",
            CLOSE_LINE,
        ]);
        assert_eq!(rows[0].customer_name.as_deref(), Some("JOHN DOE"));
        assert_eq!(rows[0].license_plate.as_deref(), Some("ABC123"));
    }

    #[test]
    fn test_discount_tax_total() {
        let rows = rows_for(&[
            "11/04/2025 09:00:00 AM , Discount SAVE5 $3.00 applied",
            "11/04/2025 09:01:00 AM , Tax 1.24 Total 15.99",
            "11/04/2025 09:02:00 AM , InvoiceID 10",
            CLOSE_LINE,
        ]);
        assert_eq!(rows[0].discount_code.as_deref(), Some("SAVE5"));
        assert_eq!(rows[0].discount_amount, Some(3.0));
        assert_eq!(rows[0].tax, Some(1.24));
        assert_eq!(rows[0].total, Some(15.99));
    }

    #[test]
    fn test_discount_amount_keyword_is_not_a_code() {
        let rows = rows_for(&[
            "11/04/2025 09:00:00 AM , Discount Amount 4.00",
            "11/04/2025 09:01:00 AM , InvoiceID 10",
            CLOSE_LINE,
        ]);
        assert_eq!(rows[0].discount_code, None);
        assert_eq!(rows[0].discount_amount, Some(4.0));
    }

    #[test]
    fn test_first_and_last_timestamps() {
        let rows = rows_for(&[
            "11/04/2025 09:15:02 AM , InvoiceID 10",
            "11/04/2025 09:10:00 AM , out-of-order earlier line",
            CLOSE_LINE,
        ]);
        let first = NaiveDate::from_ymd_opt(2025, 11, 4)
            .unwrap()
            .and_hms_opt(9, 10, 0)
            .unwrap();
        let last = NaiveDate::from_ymd_opt(2025, 11, 4)
            .unwrap()
            .and_hms_opt(9, 20, 0)
            .unwrap();
        assert_eq!(rows[0].wash_ts_first, Some(first));
        assert_eq!(rows[0].wash_ts_last, Some(last));
    }

    #[test]
    fn test_map_wash_type_longest_match_wins() {
        assert_eq!(map_wash_type("SUMMER BEST WASH DEAL"), Some(WashType::Best));
        assert_eq!(map_wash_type("interior sup package"), Some(WashType::Super));
        // both fragments present, longer one wins
        assert_eq!(
            map_wash_type("BASIC WASH GOOD WASH COMBO"),
            Some(WashType::Basic)
        );
        assert_eq!(map_wash_type("MYSTERY DELUXE"), None);
    }

    #[test]
    fn test_location_from_filename() {
        assert_eq!(
            location_from_filename(
                "safariexpresswash_FRANKLIN_0042_Transaction_2025.txt",
                "safariexpresswash"
            ),
            "FRANKLIN"
        );
        assert_eq!(
            location_from_filename("somethingelse.txt", "safariexpresswash"),
            ""
        );
    }

    #[test]
    fn test_invoice_cascade_order_is_fixed() {
        let names: Vec<&str> = INVOICE_CASCADE.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            vec![
                "inline-payment",
                "proceed-to-wash",
                "dispatcher",
                "invoice-id",
                "aws-invoice-id"
            ]
        );
    }

    #[test]
    fn test_reset_close_marker_also_closes() {
        let rows = rows_for(&[
            "11/04/2025 09:00:00 AM , InvoiceID 10",
            "11/04/2025 09:01:00 AM , TransactionMethods ResetTransaction",
        ]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bill, 10);
    }
}
