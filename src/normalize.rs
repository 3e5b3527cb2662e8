//! Shared line/block normalizer for the vendor log formats.
//!
//! Every pipeline starts from raw bytes whose encoding and markup habits
//! drift between hardware revisions. This module turns those bytes into
//! cleaned text: encoding detection, entity decoding, markup stripping,
//! punctuation normalization, and re-gluing of timestamp headers that
//! firmware splits across punctuation noise. Splitting the cleaned text
//! into logical lines or blocks is format-specific and lives with each
//! parser.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// How many leading bytes to probe when sniffing for a 16-bit encoding.
const ENCODING_PROBE_LEN: usize = 200;

/// Which cleaning steps to apply. The steps always run in the same
/// order: entities, markup, punctuation, whitespace, timestamp re-glue.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Decode HTML/XML character entities
    pub decode_entities: bool,
    /// Strip markup tags after entity decoding
    pub strip_markup: bool,
    /// Re-glue timestamp headers split by punctuation noise
    pub reglue_timestamps: bool,
}

impl NormalizeOptions {
    /// Plain-text logs: punctuation and whitespace cleanup only.
    pub fn plain() -> Self {
        Self {
            decode_entities: false,
            strip_markup: false,
            reglue_timestamps: false,
        }
    }

    /// RTC interface logs: entity-encoded XML inside an HTML shell. Tags
    /// are kept because the decoded XML elements carry the event fields.
    pub fn rtc() -> Self {
        Self {
            decode_entities: true,
            strip_markup: false,
            reglue_timestamps: true,
        }
    }
}

/// Decode raw log bytes into text.
///
/// Some kiosk firmware writes 16-bit text; probe the head of the file for
/// embedded NULs and pick a wide decoding if any are found, else fall back
/// to UTF-8 with lossy replacement of undecodable bytes.
pub fn decode_bytes(bytes: &[u8]) -> String {
    let probe = &bytes[..bytes.len().min(ENCODING_PROBE_LEN)];
    if probe.contains(&0) {
        decode_utf16(bytes)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

fn decode_utf16(bytes: &[u8]) -> String {
    // Honor a BOM when present; default to little-endian otherwise.
    let (data, big_endian) = match bytes {
        [0xFE, 0xFF, rest @ ..] => (rest, true),
        [0xFF, 0xFE, rest @ ..] => (rest, false),
        _ => (bytes, false),
    };
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| {
            if big_endian {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

static ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9A-Fa-f]+|[A-Za-z]+);").unwrap());

/// Decode the HTML/XML character entities the vendor logs actually emit.
pub fn decode_entities(input: &str) -> String {
    ENTITY_RE
        .replace_all(input, |caps: &Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match body {
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "amp" => Some('&'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some('\u{00A0}'),
                    _ => None,
                }
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

static MARKUP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Strip markup tags, leaving only text content.
pub fn strip_markup(input: &str) -> String {
    MARKUP_RE.replace_all(input, "").into_owned()
}

/// Fold non-ASCII dash and space variants onto their ASCII forms.
pub fn normalize_punctuation(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\u{2010}'..='\u{2015}' | '\u{2212}' | '\u{FE58}' | '\u{FE63}' | '\u{FF0D}' => '-',
            '\u{00A0}'
            | '\u{1680}'
            | '\u{2000}'..='\u{200A}'
            | '\u{202F}'
            | '\u{205F}'
            | '\u{3000}' => ' ',
            _ => c,
        })
        .collect()
}

static WS_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());

/// Collapse horizontal whitespace runs to a single space. Line structure
/// is preserved.
pub fn collapse_whitespace(input: &str) -> String {
    WS_RUN_RE.replace_all(input, " ").into_owned()
}

static REGLUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<mon>Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[ \t.,:;-]*(?P<day>\d{1,2})[ \t.,:;-]*(?P<year>\d{4})[ \t.,:;-]*(?P<hms>\d{2}:\d{2}:\d{2})",
    )
    .unwrap()
});

/// Re-glue a timestamp header the firmware split (or compacted) across
/// punctuation noise into the canonical `Mon DD YYYY - HH:MM:SS` form.
/// Canonical headers round-trip unchanged.
pub fn reglue_timestamp_headers(input: &str) -> String {
    REGLUE_RE
        .replace_all(input, |caps: &Captures| {
            format!(
                "{} {:0>2} {} - {}",
                &caps["mon"], &caps["day"], &caps["year"], &caps["hms"]
            )
        })
        .into_owned()
}

/// Run the ordered cleaning steps over already-decoded text.
pub fn clean_text(input: &str, opts: NormalizeOptions) -> String {
    let mut text = if opts.decode_entities {
        decode_entities(input)
    } else {
        input.to_string()
    };
    if opts.strip_markup {
        text = strip_markup(&text);
    }
    text = normalize_punctuation(&text);
    text = collapse_whitespace(&text);
    if opts.reglue_timestamps {
        text = reglue_timestamp_headers(&text);
    }
    text
}

/// Decode and clean raw log bytes in one step.
pub fn clean_bytes(bytes: &[u8], opts: NormalizeOptions) -> String {
    clean_text(&decode_bytes(bytes), opts)
}
