//! Table-row walking for dock-total pages.

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, info, warn};

use crate::rules::LandingCheck;
use crate::{normalize_ws, AdapterError, ParseRules};

const ANGLERS_MARKER: &str = "Anglers";

/// One table row before its catch text is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTripRecord {
    pub row_index: usize,
    pub trip_date: NaiveDate,
    pub boat_name: String,
    pub landing_name: String,
    pub anglers: u32,
    pub trip_duration: String,
    pub catch_text: String,
}

/// Why a row produced no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSkip {
    TooFewCells(usize),
    MissingLinks,
    NotALandingLink(String),
    MissingAnglersMarker,
    MissingAnglerCount,
    MissingDuration,
    EmptyBoatName,
    LandingOutOfScope(String),
}

impl RowSkip {
    fn reason(&self) -> String {
        match self {
            RowSkip::TooFewCells(n) => format!("row has {n} meaningful cells, need 3"),
            RowSkip::MissingLinks => "first cell lacks boat and landing links".to_string(),
            RowSkip::NotALandingLink(href) => format!("second link {href:?} is not a landing page"),
            RowSkip::MissingAnglersMarker => "trip details lack the Anglers marker".to_string(),
            RowSkip::MissingAnglerCount => "no angler count before the Anglers marker".to_string(),
            RowSkip::MissingDuration => "no trip duration after the Anglers marker".to_string(),
            RowSkip::EmptyBoatName => "boat link has no text".to_string(),
            RowSkip::LandingOutOfScope(l) => format!("landing {l:?} is outside the tracked region"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TripRecordParser {
    rules: ParseRules,
    row: Selector,
    cell: Selector,
    link: Selector,
}

impl TripRecordParser {
    pub fn new(rules: ParseRules) -> Result<Self, AdapterError> {
        let parse = |s: &str| {
            Selector::parse(s).map_err(|e| AdapterError::Message(format!("invalid selector {s:?}: {e}")))
        };
        Ok(Self {
            row: parse(&rules.row_selector)?,
            cell: parse(&rules.cell_selector)?,
            link: parse("a[href]")?,
            rules,
        })
    }

    pub fn rules(&self) -> &ParseRules {
        &self.rules
    }

    /// Lazily yields one record per usable row. Malformed rows are logged and
    /// skipped; they never end the walk.
    pub fn records<'a>(
        &'a self,
        document: &'a Html,
        trip_date: NaiveDate,
    ) -> impl Iterator<Item = RawTripRecord> + 'a {
        document
            .select(&self.row)
            .enumerate()
            .filter_map(move |(row_index, row)| match self.parse_row(row_index, row, trip_date) {
                Ok(record) => Some(record),
                Err(RowSkip::TooFewCells(n)) => {
                    debug!(%trip_date, row = row_index, cells = n, "not a trip row");
                    None
                }
                Err(skip @ RowSkip::LandingOutOfScope(_)) => {
                    info!(%trip_date, row = row_index, reason = %skip.reason(), "row filtered");
                    None
                }
                Err(skip) => {
                    warn!(%trip_date, row = row_index, reason = %skip.reason(), "row skipped");
                    None
                }
            })
    }

    pub fn parse_row(
        &self,
        row_index: usize,
        row: ElementRef<'_>,
        trip_date: NaiveDate,
    ) -> Result<RawTripRecord, RowSkip> {
        let cells: Vec<ElementRef<'_>> = row
            .select(&self.cell)
            .filter(|cell| {
                !cell_text(*cell).is_empty() || cell.select(&self.link).next().is_some()
            })
            .collect();
        if cells.len() < 3 {
            return Err(RowSkip::TooFewCells(cells.len()));
        }

        let (boat_name, landing_name) = self.boat_and_landing(cells[0])?;
        let (anglers, trip_duration) = split_trip_details(&cell_text(cells[1]))?;
        let catch_text = cell_text(cells[2]);

        if self.rules.is_denied_landing(&landing_name) {
            return Err(RowSkip::LandingOutOfScope(landing_name));
        }
        if let LandingCheck::Implausible { expected, score } =
            self.rules.check_landing(&boat_name, &landing_name)
        {
            warn!(
                %trip_date,
                row = row_index,
                boat = %boat_name,
                landing = %landing_name,
                expected = %expected,
                score,
                "landing attribution looks implausible; keeping row"
            );
        }

        Ok(RawTripRecord {
            row_index,
            trip_date,
            boat_name,
            landing_name,
            anglers,
            trip_duration,
            catch_text,
        })
    }

    fn boat_and_landing(&self, cell: ElementRef<'_>) -> Result<(String, String), RowSkip> {
        let mut links = cell.select(&self.link);
        let (Some(boat), Some(landing)) = (links.next(), links.next()) else {
            return Err(RowSkip::MissingLinks);
        };
        let href = landing.value().attr("href").unwrap_or_default();
        if !href
            .to_ascii_lowercase()
            .contains(&self.rules.landing_link_marker.to_ascii_lowercase())
        {
            return Err(RowSkip::NotALandingLink(href.to_string()));
        }
        let boat_name = normalize_ws(&boat.text().collect::<String>());
        if boat_name.is_empty() {
            return Err(RowSkip::EmptyBoatName);
        }
        let landing_name = normalize_ws(&landing.text().collect::<String>());
        Ok((boat_name, landing_name))
    }
}

/// Splits `"58 Anglers 1/2 Day PM"` into the angler count and duration label.
pub fn split_trip_details(text: &str) -> Result<(u32, String), RowSkip> {
    let Some((before, after)) = text.split_once(ANGLERS_MARKER) else {
        return Err(RowSkip::MissingAnglersMarker);
    };
    let anglers = before
        .split(|c: char| !c.is_ascii_digit())
        .filter(|t| !t.is_empty())
        .last()
        .and_then(|t| t.parse::<u32>().ok())
        .ok_or(RowSkip::MissingAnglerCount)?;
    let duration = normalize_ws(after.trim_start_matches(|c: char| {
        c.is_whitespace() || matches!(c, ',' | ':' | '-' | '|' | '/')
    }));
    if duration.is_empty() {
        return Err(RowSkip::MissingDuration);
    }
    Ok((anglers, duration))
}

/// Cell text with `<br>` and block boundaries turned into comma separators so
/// that stacked catch lines stay apart.
pub fn cell_text(cell: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_text(cell, &mut out);
    let joined = normalize_ws(&out);
    split_separator_commas(&joined)
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Splits on commas, except those grouping digits as in `1,200`.
fn split_separator_commas(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, byte) in bytes.iter().enumerate() {
        if *byte != b',' {
            continue;
        }
        let digit_before = i > 0 && bytes[i - 1].is_ascii_digit();
        let digit_after = bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
        if digit_before && digit_after {
            continue;
        }
        parts.push(&text[start..i]);
        start = i + 1;
    }
    parts.push(&text[start..]);
    parts
}

fn push_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let block = matches!(el.name(), "br" | "div" | "p" | "li");
                if block {
                    out.push_str(", ");
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    push_text(child_el, out);
                }
                if block {
                    out.push_str(", ");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 7).unwrap()
    }

    fn table(rows: &str) -> Html {
        Html::parse_document(&format!(
            "<html><body><h1>August 7, 2025</h1><table>{rows}</table></body></html>"
        ))
    }

    fn row(boat: &str, landing_href: &str, landing: &str, details: &str, catches: &str) -> String {
        format!(
            "<tr><td><a href=\"/boats/x\">{boat}</a><br><a href=\"{landing_href}\">{landing}</a></td><td>{details}</td><td>{catches}</td></tr>"
        )
    }

    fn parser() -> TripRecordParser {
        TripRecordParser::new(ParseRules::default()).unwrap()
    }

    #[test]
    fn extracts_all_fields_from_a_trip_row() {
        let doc = table(&row(
            "Daily Double",
            "/landings/fishermans",
            "Fisherman's Landing",
            "58 Anglers<br>1/2 Day PM",
            "2 Barracuda, 48 Calico Bass<br>28 Rockfish",
        ));
        let p = parser();
        let records: Vec<_> = p.records(&doc, date()).collect();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.boat_name, "Daily Double");
        assert_eq!(r.landing_name, "Fisherman's Landing");
        assert_eq!(r.anglers, 58);
        assert_eq!(r.trip_duration, "1/2 Day PM");
        assert_eq!(r.catch_text, "2 Barracuda, 48 Calico Bass, 28 Rockfish");
        assert_eq!(r.trip_date, date());
    }

    #[test]
    fn malformed_rows_are_skipped_without_losing_the_rest() {
        let rows = [
            "<tr><th>Boat</th><th>Details</th><th>Catch</th></tr>".to_string(),
            row("Bad Link", "/boats/elsewhere", "Nowhere", "20 Anglers Full Day", "5 Rockfish"),
            row("No Marker", "/landings/hm", "H&M Landing", "20 people Full Day", "5 Rockfish"),
            row("No Duration", "/landings/hm", "H&M Landing", "20 Anglers", "5 Rockfish"),
            row("Out Of Scope", "/landings/newport", "Newport Landing", "30 Anglers 3/4 Day", "9 Rockfish"),
            row("Good Boat", "/landings/hm", "H&M Landing", "25 Anglers Full Day", "12 Yellowtail"),
        ]
        .concat();
        let doc = table(&rows);
        let p = parser();
        let names: Vec<_> = p.records(&doc, date()).map(|r| r.boat_name).collect();
        assert_eq!(names, vec!["Good Boat".to_string()]);
    }

    #[test]
    fn row_with_blank_catch_cell_is_not_a_trip_row() {
        let doc = table(&row(
            "Skunked",
            "/landings/seaforth",
            "Seaforth Sportfishing",
            "12 Anglers 1/2 Day AM",
            "&nbsp;",
        ));
        assert_eq!(parser().records(&doc, date()).count(), 0);
    }

    #[test]
    fn thousands_separators_survive_cell_normalisation() {
        let doc = table(&row(
            "Big Haul",
            "/landings/hm",
            "H&M Landing",
            "40 Anglers Full Day",
            "1,200 Rockfish,3 Sculpin<br>12 Whitefish",
        ));
        let records: Vec<_> = parser().records(&doc, date()).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].catch_text, "1,200 Rockfish, 3 Sculpin, 12 Whitefish");
    }

    #[test]
    fn trip_details_split_tolerates_prefixes_and_separators() {
        assert_eq!(
            split_trip_details("Trip: 58 Anglers - 1/2 Day PM").unwrap(),
            (58, "1/2 Day PM".to_string())
        );
        assert_eq!(
            split_trip_details("0 Anglers, 2 Day").unwrap(),
            (0, "2 Day".to_string())
        );
        assert_eq!(split_trip_details("Anglers Full Day"), Err(RowSkip::MissingAnglerCount));
        assert_eq!(split_trip_details("12 Anglers"), Err(RowSkip::MissingDuration));
    }
}
