//! Report-date extraction and the all-or-nothing date check.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use crate::{normalize_ws, PageError, ParseRules};

struct DatePatterns {
    iso: Regex,
    long: Regex,
    numeric: Regex,
}

fn patterns() -> &'static DatePatterns {
    static PATTERNS: OnceLock<DatePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| DatePatterns {
        iso: Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap_or_else(|_| unreachable!()),
        long: Regex::new(
            r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b",
        )
        .unwrap_or_else(|_| unreachable!()),
        numeric: Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").unwrap_or_else(|_| unreachable!()),
    })
}

fn month_number(abbrev: &str) -> Option<u32> {
    let months = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let abbrev = abbrev.to_ascii_lowercase();
    months
        .iter()
        .position(|m| *m == abbrev)
        .and_then(|i| u32::try_from(i + 1).ok())
}

/// Finds the first calendar date written in `text`, returning it with its byte
/// offset so that the earliest match wins across formats.
pub fn find_date_in_text(text: &str) -> Option<NaiveDate> {
    let p = patterns();
    let mut found: Vec<(usize, NaiveDate)> = Vec::new();

    for caps in p.iso.captures_iter(text) {
        let (Some(y), Some(m), Some(d)) = (caps.get(1), caps.get(2), caps.get(3)) else {
            continue;
        };
        if let (Ok(y), Ok(m), Ok(d)) = (y.as_str().parse(), m.as_str().parse(), d.as_str().parse()) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                found.push((caps.get(0).map_or(0, |w| w.start()), date));
            }
        }
    }
    for caps in p.long.captures_iter(text) {
        let (Some(mon), Some(d), Some(y)) = (caps.get(1), caps.get(2), caps.get(3)) else {
            continue;
        };
        let Some(m) = month_number(mon.as_str()) else {
            continue;
        };
        if let (Ok(y), Ok(d)) = (y.as_str().parse(), d.as_str().parse()) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                found.push((caps.get(0).map_or(0, |w| w.start()), date));
            }
        }
    }
    for caps in p.numeric.captures_iter(text) {
        let (Some(m), Some(d), Some(y)) = (caps.get(1), caps.get(2), caps.get(3)) else {
            continue;
        };
        if let (Ok(y), Ok(m), Ok(d)) = (y.as_str().parse(), m.as_str().parse(), d.as_str().parse()) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                found.push((caps.get(0).map_or(0, |w| w.start()), date));
            }
        }
    }

    found.into_iter().min_by_key(|(offset, _)| *offset).map(|(_, d)| d)
}

/// Extracts the date the page header claims to represent.
pub fn extract_page_date(document: &Html, rules: &ParseRules) -> Result<NaiveDate, PageError> {
    for selector_text in &rules.header_selectors {
        let selector = Selector::parse(selector_text).map_err(|e| {
            PageError::Parser(format!("invalid header selector {selector_text:?}: {e}"))
        })?;
        for element in document.select(&selector) {
            let text = normalize_ws(&element.text().collect::<Vec<_>>().join(" "));
            if let Some(date) = find_date_in_text(&text) {
                debug!(selector = %selector_text, header = %text, %date, "page date found");
                return Ok(date);
            }
        }
    }
    Err(PageError::Parser(
        "no report date found in page header; page structure may have changed".to_string(),
    ))
}

/// Refuses the whole page unless its header date equals `requested`.
pub fn verify_page_date(
    document: &Html,
    requested: NaiveDate,
    rules: &ParseRules,
) -> Result<NaiveDate, PageError> {
    let found = extract_page_date(document, rules)?;
    if found != requested {
        return Err(PageError::DateMismatch { requested, found });
    }
    Ok(found)
}
