//! Page-layout and scope rules, loaded from `ingest.yaml`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use strsim::jaro_winkler;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParseRules {
    /// Elements whose text may carry the page's report date, tried in order.
    pub header_selectors: Vec<String>,
    pub row_selector: String,
    pub cell_selector: String,
    /// Substring the landing anchor's href must contain.
    pub landing_link_marker: String,
    /// Landings outside the tracked region. Matched case-insensitively.
    pub denied_landings: Vec<String>,
    /// Boat name -> landing it normally operates from.
    pub expected_landings: BTreeMap<String, String>,
    /// Below this Jaro-Winkler score an observed landing is reported as implausible.
    pub landing_similarity_threshold: f64,
}

impl Default for ParseRules {
    fn default() -> Self {
        Self {
            header_selectors: vec![
                ".report-date".to_string(),
                "h1".to_string(),
                "h2".to_string(),
                "title".to_string(),
            ],
            row_selector: "table tr".to_string(),
            cell_selector: "td".to_string(),
            landing_link_marker: "/landings/".to_string(),
            denied_landings: vec![
                "Dana Wharf Sportfishing".to_string(),
                "Davey's Locker".to_string(),
                "Newport Landing".to_string(),
                "Pierpoint Landing".to_string(),
                "Ensenada".to_string(),
            ],
            expected_landings: BTreeMap::new(),
            landing_similarity_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LandingCheck {
    Unknown,
    Plausible,
    Implausible { expected: String, score: f64 },
}

impl ParseRules {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing parse rules yaml")
    }

    pub fn from_yaml_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn is_denied_landing(&self, landing: &str) -> bool {
        let landing = normalize_name(landing);
        self.denied_landings
            .iter()
            .any(|denied| normalize_name(denied) == landing)
    }

    pub fn check_landing(&self, boat: &str, landing: &str) -> LandingCheck {
        let expected = self
            .expected_landings
            .iter()
            .find(|(name, _)| normalize_name(name) == normalize_name(boat))
            .map(|(_, landing)| landing);
        let Some(expected) = expected else {
            return LandingCheck::Unknown;
        };
        let score = jaro_winkler(&normalize_name(expected), &normalize_name(landing));
        if score >= self.landing_similarity_threshold {
            LandingCheck::Plausible
        } else {
            LandingCheck::Implausible {
                expected: expected.clone(),
                score,
            }
        }
    }
}

/// Lower-cased, punctuation-free, single-spaced form used for name comparisons.
pub fn normalize_name(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_overrides_merge_with_defaults() {
        let rules = ParseRules::from_yaml_str(
            r#"
denied_landings: ["Oceanside Sea Center"]
expected_landings:
  Daily Double: "Fisherman's Landing"
"#,
        )
        .unwrap();
        assert_eq!(rules.row_selector, "table tr");
        assert!(rules.is_denied_landing("oceanside sea center"));
        assert!(!rules.is_denied_landing("Newport Landing"));
        assert_eq!(rules.expected_landings.len(), 1);
    }

    #[test]
    fn landing_check_tolerates_punctuation_but_flags_moves() {
        let mut rules = ParseRules::default();
        rules
            .expected_landings
            .insert("Daily Double".into(), "Fisherman's Landing".into());

        assert_eq!(
            rules.check_landing("Daily Double", "Fishermans Landing"),
            LandingCheck::Plausible
        );
        assert!(matches!(
            rules.check_landing("Daily Double", "Point Loma Sportfishing"),
            LandingCheck::Implausible { .. }
        ));
        assert_eq!(
            rules.check_landing("Unknown Boat", "Point Loma Sportfishing"),
            LandingCheck::Unknown
        );
    }

    #[test]
    fn deny_list_ignores_case_and_spacing() {
        let rules = ParseRules::default();
        assert!(rules.is_denied_landing("  newport   LANDING "));
        assert!(!rules.is_denied_landing("H&M Landing"));
    }
}
