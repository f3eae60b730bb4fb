//! Free-text field coercion.
//!
//! Pure conversions from raw export text to typed values. Every function
//! returns `None` on input it cannot interpret; policy (warn vs. abort)
//! belongs to the caller.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

/// Formats a bare date shows up in across the legacy export. Month-first
/// wins the ambiguous slash case, matching the system the export came from.
const BARE_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
];

/// Parse a free-form date or datetime into UTC.
///
/// Bare dates land at midnight UTC; anything with a time component goes
/// through `dateparser`.
pub fn coerce_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    for fmt in BARE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(dt) = dateparser::parse(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    None
}

/// Parse a numeric string, tolerating currency symbols, grouping commas,
/// and accounting-style parenthesized negatives.
pub fn coerce_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let (negative, trimmed) = if trimmed.starts_with('(') && trimmed.ends_with(')') {
        (true, &trimmed[1..trimmed.len() - 1])
    } else {
        (false, trimmed)
    };
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned
        .parse::<f64>()
        .ok()
        .map(|n| if negative { -n } else { n })
}

/// Parse a boolean flag.
pub fn coerce_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}
