//! Free-text catch parsing.
//!
//! Catch cells mix three phrase shapes:
//!
//! - weight-qualified: `40 Bluefin Tuna (up to 150 pounds)`
//! - parenthetical count: `Yellowtail (12)`
//! - bare count: `48 Calico Bass`
//!
//! Each [`CatchPass`] runs over a shared remaining-text buffer in that order and
//! cuts out whatever it matched, so a later pass never sees text an earlier one
//! already accounted for.

use dockcount_core::{CatchLine, CatchSet};
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::normalize_ws;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchPass {
    WeightQualified,
    ParentheticalCount,
    BareCount,
}

impl CatchPass {
    pub const ORDER: [CatchPass; 3] = [
        CatchPass::WeightQualified,
        CatchPass::ParentheticalCount,
        CatchPass::BareCount,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CatchPass::WeightQualified => "weight_qualified",
            CatchPass::ParentheticalCount => "parenthetical_count",
            CatchPass::BareCount => "bare_count",
        }
    }
}

/// Result of one pattern match inside a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassMatch {
    Matched(CatchLine),
    NoMatch,
}

#[derive(Debug, Clone)]
pub struct CatchTextParser {
    weight_qualified: Regex,
    parenthetical: Regex,
    bare: Regex,
    separators: Regex,
    leftover_parens: Regex,
}

impl Default for CatchTextParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CatchTextParser {
    pub fn new() -> Self {
        let species = r"[a-z][a-z'&./\- ]*";
        let count = r"\d{1,3}(?:,\d{3})+|\d+";
        Self {
            weight_qualified: Regex::new(&format!(
                r"(?i)(?P<count>{count})\s+(?P<species>{species}?)\s*\(\s*(?P<weight>(?:(?:up\s+to|about|around|to)\s+)?\d[\d.,\-– ]*\s*(?:pounds?|lbs?\.?|#))\s*\)"
            ))
            .unwrap_or_else(|_| unreachable!()),
            parenthetical: Regex::new(&format!(
                r"(?i)(?P<species>{species}?)\s*\(\s*(?P<count>-?(?:{count}))\s*\)"
            ))
            .unwrap_or_else(|_| unreachable!()),
            bare: Regex::new(&format!(r"(?i)(?P<count>-?(?:{count}))\s+(?P<species>{species})"))
                .unwrap_or_else(|_| unreachable!()),
            separators: Regex::new(r"(?i)\s+and\s+|[;\n\r\t|]+").unwrap_or_else(|_| unreachable!()),
            leftover_parens: Regex::new(r"\([^)]*\)").unwrap_or_else(|_| unreachable!()),
        }
    }

    fn pattern(&self, pass: CatchPass) -> &Regex {
        match pass {
            CatchPass::WeightQualified => &self.weight_qualified,
            CatchPass::ParentheticalCount => &self.parenthetical,
            CatchPass::BareCount => &self.bare,
        }
    }

    /// Parses one row's catch text. Never fails: text that yields nothing is
    /// logged and returns an empty set.
    pub fn parse(&self, raw: &str) -> CatchSet {
        let mut remaining = self.separators.replace_all(raw, ", ").into_owned();
        let mut catches = CatchSet::new();

        for pass in CatchPass::ORDER {
            if pass == CatchPass::BareCount {
                // Parentheticals that no earlier pass claimed are weights or
                // notes, never counts.
                let stripped = self.leftover_parens.replace_all(&remaining, ", ");
                if stripped.len() != remaining.len() {
                    debug!(text = %remaining, "dropping unclaimed parentheticals");
                }
                remaining = stripped.into_owned();
            }
            remaining = self.run_pass(pass, &remaining, &mut catches);
        }

        if catches.is_empty() && raw.chars().any(char::is_alphanumeric) {
            warn!(text = %normalize_ws(raw), "no catches parsed from catch text");
        }
        catches
    }

    /// Applies one pass, returning the text it left unclaimed.
    pub fn run_pass(&self, pass: CatchPass, text: &str, catches: &mut CatchSet) -> String {
        let mut leftover = String::with_capacity(text.len());
        let mut cursor = 0;

        for caps in self.pattern(pass).captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            leftover.push_str(&text[cursor..whole.start()]);
            leftover.push_str(", ");
            cursor = whole.end();

            let PassMatch::Matched(line) = extract(pass, &caps) else {
                continue;
            };
            if pass == CatchPass::BareCount && catches.contains_species(&line.species) {
                debug!(species = %line.species, "bare count repeats an already parsed species; ignored");
                continue;
            }
            catches.add(line);
        }
        leftover.push_str(&text[cursor..]);
        leftover
    }
}

fn extract(pass: CatchPass, caps: &Captures<'_>) -> PassMatch {
    let Some(species) = caps.name("species").map(|m| clean_species(m.as_str())) else {
        return PassMatch::NoMatch;
    };
    let Some(count_text) = caps.name("count").map(|m| m.as_str()) else {
        return PassMatch::NoMatch;
    };
    if species.is_empty() {
        return PassMatch::NoMatch;
    }

    let count = match count_text.replace(',', "").parse::<u32>() {
        Ok(count) if count > 0 => count,
        _ => {
            warn!(
                pass = pass.name(),
                species = %species,
                count = count_text,
                "dropping catch with non-positive count"
            );
            return PassMatch::NoMatch;
        }
    };

    let mut line = CatchLine::new(species, count);
    if let Some(weight) = caps.name("weight") {
        line = line.with_weight_note(normalize_ws(weight.as_str()));
    }
    PassMatch::Matched(line)
}

/// Trims surrounding punctuation and collapses inner whitespace.
pub fn clean_species(raw: &str) -> String {
    normalize_ws(raw.trim_matches(|c: char| !c.is_alphanumeric()))
}
