use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Serialize, Serializer};

/// Named averaging windows, in the order they are tried during inference.
pub const NAMED_PERIODS: &[&str] = &[
    "ANN", "DJF", "MAM", "JJA", "SON", "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug",
    "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TemporalPeriod {
    Named(&'static str),
    YearRange { start: u32, end: u32 },
}

impl TemporalPeriod {
    pub const ANNUAL: Self = Self::Named("ANN");

    pub fn label(&self) -> String {
        match self {
            Self::Named(code) => (*code).to_string(),
            Self::YearRange { start, end } => format!("yrs_{start}_{end}"),
        }
    }

    pub fn parse_label(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Some(code) = named_period(value) {
            return Some(Self::Named(code));
        }
        let captures = year_range_label_pattern().captures(value)?;
        Some(Self::YearRange {
            start: captures[1].parse().ok()?,
            end: captures[2].parse().ok()?,
        })
    }
}

impl Default for TemporalPeriod {
    fn default() -> Self {
        Self::ANNUAL
    }
}

impl fmt::Display for TemporalPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl Serialize for TemporalPeriod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

/// Period for a remote table page: a named period path segment wins, a year-range
/// token maps to annual, anything else is annual.
pub fn period_from_url_path(path: &str) -> TemporalPeriod {
    for segment in path.split('/') {
        if let Some(code) = named_period(segment) {
            return TemporalPeriod::Named(code);
        }
    }
    TemporalPeriod::ANNUAL
}

/// Period for a local table file: season/month tokens in the file name first,
/// then a year-range token in the containing directories, then annual.
pub fn period_from_file_path(path: &Path) -> TemporalPeriod {
    if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
        let tokens = stem_tokens(stem);
        for code in NAMED_PERIODS {
            if tokens.iter().any(|token| token == code) {
                return TemporalPeriod::Named(code);
            }
        }
    }
    path.parent()
        .and_then(year_range_in_path)
        .unwrap_or(TemporalPeriod::ANNUAL)
}

/// Find a `yrs_{start}_{end}` or ADF `_{start}_{end}_vs_` token anywhere in `path`.
pub fn year_range_in_path(path: &Path) -> Option<TemporalPeriod> {
    let text = path.to_string_lossy();
    for pattern in year_range_patterns() {
        if let Some(captures) = pattern.captures(&text) {
            let start = captures[1].parse().ok()?;
            let end = captures[2].parse().ok()?;
            return Some(TemporalPeriod::YearRange { start, end });
        }
    }
    None
}

pub(crate) fn stem_tokens(stem: &str) -> Vec<&str> {
    stem.split(['_', '.', '-'])
        .filter(|token| !token.is_empty())
        .collect()
}

fn named_period(value: &str) -> Option<&'static str> {
    NAMED_PERIODS.iter().copied().find(|code| *code == value)
}

fn year_range_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"yrs_(\d+)_(\d+)", r"_(\d+)_(\d+)_vs_"]
            .iter()
            .map(|pattern| Regex::new(pattern).expect("valid year range pattern"))
            .collect()
    })
}

fn year_range_label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^yrs_(\d+)_(\d+)$").expect("valid year range label"))
}
