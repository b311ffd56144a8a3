//! Report-page sources and the dock-total page parsers.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dockcount_core::ParsedTrip;
use dockcount_storage::{FetchError, PageArchive, ReportHttpClient};
use scraper::Html;
use thiserror::Error;
use tracing::{debug_span, info, warn};

pub mod catch_text;
pub mod date_guard;
pub mod rules;
pub mod trip_records;

pub use catch_text::{CatchPass, CatchTextParser, PassMatch};
pub use date_guard::{extract_page_date, find_date_in_text, verify_page_date};
pub use rules::{normalize_name, LandingCheck, ParseRules};
pub use trip_records::{RawTripRecord, RowSkip, TripRecordParser};

pub const CRATE_NAME: &str = "dockcount-adapters";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub report_date: NaiveDate,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedPage {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Page-level refusals. Either one discards every row on the page.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("page structure error: {0}")]
    Parser(String),
    #[error("page header claims {found} but {requested} was requested")]
    DateMismatch {
        requested: NaiveDate,
        found: NaiveDate,
    },
}

/// Where report pages come from.
#[async_trait]
pub trait PageSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch_page(&self, report_date: NaiveDate) -> Result<FetchedPage, AdapterError>;
}

/// Live source: one GET per date against a URL template containing `{date}`.
#[derive(Debug)]
pub struct ReportPageSource {
    source_id: String,
    url_template: String,
    http: ReportHttpClient,
    archive: Option<PageArchive>,
}

impl ReportPageSource {
    pub fn new(
        source_id: impl Into<String>,
        url_template: impl Into<String>,
        http: ReportHttpClient,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            url_template: url_template.into(),
            http,
            archive: None,
        }
    }

    pub fn with_archive(mut self, archive: PageArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn url_for(&self, report_date: NaiveDate) -> String {
        self.url_template
            .replace("{date}", &report_date.format("%Y-%m-%d").to_string())
    }
}

#[async_trait]
impl PageSource for ReportPageSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_page(&self, report_date: NaiveDate) -> Result<FetchedPage, AdapterError> {
        let url = self.url_for(report_date);
        let fetched = self.http.get(&url).await?;
        let fetched_at = Utc::now();
        info!(
            %report_date,
            url = %fetched.final_url,
            bytes = fetched.body.len(),
            attempts = fetched.attempts,
            "report page fetched"
        );

        if let Some(archive) = &self.archive {
            match archive.store_page(report_date, fetched_at, &fetched.body).await {
                Ok(stored) => info!(path = %stored.relative_path.display(), "page archived"),
                Err(err) => warn!(%report_date, error = %err, "page archive write failed"),
            }
        }

        Ok(FetchedPage {
            url: fetched.final_url,
            report_date,
            body: fetched.body,
            fetched_at,
        })
    }
}

/// Offline source reading `<dir>/<YYYY-MM-DD>.html`.
#[derive(Debug, Clone)]
pub struct FixturePageSource {
    dir: PathBuf,
}

impl FixturePageSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, report_date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.html", report_date.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl PageSource for FixturePageSource {
    fn source_id(&self) -> &str {
        "fixture"
    }

    async fn fetch_page(&self, report_date: NaiveDate) -> Result<FetchedPage, AdapterError> {
        let path = self.path_for(report_date);
        let body = std::fs::read(&path)
            .with_context(|| format!("reading fixture page {}", path.display()))?;
        Ok(FetchedPage {
            url: format!("file://{}", path.display()),
            report_date,
            body,
            fetched_at: Utc::now(),
        })
    }
}

/// Date guard, row walk and catch parsing for one page.
#[derive(Debug, Clone)]
pub struct ReportPageParser {
    records: TripRecordParser,
    catches: CatchTextParser,
}

impl ReportPageParser {
    pub fn new(rules: ParseRules) -> Result<Self, AdapterError> {
        Ok(Self {
            records: TripRecordParser::new(rules)?,
            catches: CatchTextParser::new(),
        })
    }

    pub fn rules(&self) -> &ParseRules {
        self.records.rules()
    }

    /// Rejects the page outright unless its header date equals `requested`.
    pub fn parse_trips(&self, body: &str, requested: NaiveDate) -> Result<Vec<ParsedTrip>, PageError> {
        let document = Html::parse_document(body);
        verify_page_date(&document, requested, self.records.rules())?;

        let trips = self
            .records
            .records(&document, requested)
            .map(|raw| {
                let span = debug_span!("trip_row", row = raw.row_index, boat = %raw.boat_name);
                let _entered = span.enter();
                ParsedTrip {
                    catches: self.catches.parse(&raw.catch_text),
                    row_index: raw.row_index,
                    boat_name: raw.boat_name,
                    landing_name: raw.landing_name,
                    trip_date: raw.trip_date,
                    trip_duration: raw.trip_duration,
                    anglers: raw.anglers,
                }
            })
            .collect();
        Ok(trips)
    }
}

/// Collapses runs of whitespace (including non-breaking spaces) to one space.
pub fn normalize_ws(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    const PAGE: &str = r#"<html><body>
<h1 class="report-date">Dock Totals for Thursday, August 7, 2025</h1>
<table>
<tr><td><a href="/boats/daily-double">Daily Double</a><br><a href="/landings/fishermans">Fisherman's Landing</a></td>
<td>58 Anglers 1/2 Day PM</td><td>2 Barracuda, 48 Calico Bass, 28 Rockfish</td></tr>
<tr><td><a href="/boats/pacific-queen">Pacific Queen</a><br><a href="/landings/fishermans">Fisherman's Landing</a></td>
<td>22 Anglers 2 Day</td><td>40 Bluefin Tuna (up to 150 pounds)</td></tr>
</table></body></html>"#;

    #[test]
    fn page_parser_yields_trips_with_catches() {
        let parser = ReportPageParser::new(ParseRules::default()).unwrap();
        let trips = parser.parse_trips(PAGE, d(2025, 8, 7)).unwrap();
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].catches.total_fish(), 78);
        assert_eq!(trips[1].trip_duration, "2 Day");
        assert_eq!(trips[1].catches.pairs(), vec![("Bluefin Tuna", 40)]);
    }

    #[test]
    fn page_parser_rejects_other_dates_before_reading_rows() {
        let parser = ReportPageParser::new(ParseRules::default()).unwrap();
        let err = parser.parse_trips(PAGE, d(2025, 8, 8)).unwrap_err();
        assert_eq!(
            err,
            PageError::DateMismatch {
                requested: d(2025, 8, 8),
                found: d(2025, 8, 7)
            }
        );
    }

    #[tokio::test]
    async fn fixture_source_reads_pages_by_date() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2025-08-07.html"), PAGE).unwrap();
        let source = FixturePageSource::new(dir.path());

        let page = source.fetch_page(d(2025, 8, 7)).await.unwrap();
        assert!(page.body_text().contains("Daily Double"));
        assert!(source.fetch_page(d(2025, 8, 8)).await.is_err());
    }

    #[test]
    fn url_template_substitutes_the_date() {
        let http = ReportHttpClient::new(Default::default()).unwrap();
        let source = ReportPageSource::new(
            "sd",
            "https://reports.example/dock_totals/boats.php?date={date}",
            http,
        );
        assert_eq!(
            source.url_for(d(2025, 8, 7)),
            "https://reports.example/dock_totals/boats.php?date=2025-08-07"
        );
    }
}
