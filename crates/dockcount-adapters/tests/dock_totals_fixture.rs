use std::path::PathBuf;

use chrono::NaiveDate;
use dockcount_adapters::{FixturePageSource, PageError, PageSource, ParseRules, ReportPageParser};

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/pages")
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 8, day).unwrap()
}

fn rules() -> ParseRules {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../ingest.yaml");
    ParseRules::from_yaml_path(path).unwrap()
}

#[tokio::test]
async fn fixture_page_parses_into_trips() {
    let source = FixturePageSource::new(fixture_dir());
    let page = source.fetch_page(date(7)).await.unwrap();
    let parser = ReportPageParser::new(rules()).unwrap();

    let trips = parser.parse_trips(&page.body_text(), date(7)).unwrap();

    let summary: Vec<(&str, &str, u32, u64)> = trips
        .iter()
        .map(|t| {
            (
                t.boat_name.as_str(),
                t.trip_duration.as_str(),
                t.anglers,
                t.catches.total_fish(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Daily Double", "1/2 Day PM", 58, 78),
            ("Daily Double", "1/2 Day AM", 58, 36),
            ("Pacific Queen", "2 Day", 22, 58),
            ("New Seaforth", "3/4 Day", 41, 129),
        ]
    );
    assert!(trips.iter().all(|t| t.trip_date == date(7)));
    assert!(trips.iter().all(|t| t.landing_name != "Davey's Locker"));
}

#[tokio::test]
async fn stale_page_is_refused_as_a_whole() {
    let source = FixturePageSource::new(fixture_dir());
    let page = source.fetch_page(date(8)).await.unwrap();
    let parser = ReportPageParser::new(rules()).unwrap();

    let err = parser.parse_trips(&page.body_text(), date(8)).unwrap_err();
    assert_eq!(
        err,
        PageError::DateMismatch {
            requested: date(8),
            found: date(7),
        }
    );
}
