use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::case_name::{CaseIdentity, parse_case_name};

const DIAGNOSTIC_PATH_KEYWORDS: &[&str] = &["diagnostic", "amwg", "climo"];
const OUTPUT_PATH_KEYWORDS: &[&str] = &["archive", "output"];
const RUN_DIRECTORY_KEYWORDS: &[&str] = &["runs", "cesm"];
const PATH_TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '`'];
const URL_TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '`'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionLabel {
    Purpose,
    Description,
    CaseDirectory,
    Diagnostics,
    Output,
}

impl SectionLabel {
    pub const ALL: [Self; 5] = [
        Self::Purpose,
        Self::Description,
        Self::CaseDirectory,
        Self::Diagnostics,
        Self::Output,
    ];

    pub fn heading(self) -> &'static str {
        match self {
            Self::Purpose => "Purpose",
            Self::Description => "Description",
            Self::CaseDirectory => "Case Directory",
            Self::Diagnostics => "Diagnostics",
            Self::Output => "Output",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueSections {
    pub purpose: Option<String>,
    pub description: Option<String>,
    pub case_directory: Option<String>,
    pub diagnostics: Option<String>,
    pub output: Option<String>,
}

impl IssueSections {
    fn slot(&mut self, label: SectionLabel) -> &mut Option<String> {
        match label {
            SectionLabel::Purpose => &mut self.purpose,
            SectionLabel::Description => &mut self.description,
            SectionLabel::CaseDirectory => &mut self.case_directory,
            SectionLabel::Diagnostics => &mut self.diagnostics,
            SectionLabel::Output => &mut self.output,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedIssueRecord {
    pub issue_number: u64,
    pub title: String,
    pub case_name: Option<String>,
    pub identity: Option<CaseIdentity>,
    pub purpose: Option<String>,
    pub description: Option<String>,
    pub case_directory: Option<String>,
    pub diagnostics_paths: Vec<String>,
    pub output_paths: Vec<String>,
    pub contacts: BTreeSet<String>,
    pub diagnostic_urls: BTreeSet<String>,
    pub warnings: Vec<String>,
}

/// Pulls structured fields out of free-form issue text.
#[derive(Debug, Clone)]
pub struct IssueParser {
    sections: Vec<(SectionLabel, Regex)>,
    path_pattern: Regex,
    url_pattern: Regex,
}

impl Default for IssueParser {
    fn default() -> Self {
        Self::new(&["/glade/".to_string()], &["webext.cgd.ucar.edu".to_string()])
    }
}

impl IssueParser {
    /// `path_roots` are absolute filesystem prefixes (e.g. `/glade/`) and
    /// `url_hosts` the hosts whose URLs count as diagnostics links.
    pub fn new(path_roots: &[String], url_hosts: &[String]) -> Self {
        let sections = SectionLabel::ALL
            .iter()
            .map(|label| {
                let pattern = format!(
                    r"(?is)\*\*{}:\*\*\s*\n(.*?)(?:\n\*\*|\n\n|$)",
                    regex::escape(label.heading())
                );
                (
                    *label,
                    Regex::new(&pattern).expect("valid section pattern"),
                )
            })
            .collect();

        let roots = non_empty_alternation(path_roots, "/glade/");
        let path_pattern = Regex::new(&format!(r#"(?:{roots})[^\s)"'<>]+"#))
            .expect("valid path pattern");
        let hosts = non_empty_alternation(url_hosts, "webext.cgd.ucar.edu");
        let url_pattern = Regex::new(&format!(r#"https?://(?:{hosts})/[^\s)"'<>]+"#))
            .expect("valid url pattern");

        Self {
            sections,
            path_pattern,
            url_pattern,
        }
    }

    pub fn parse(&self, issue_number: u64, title: &str, body: &str) -> ParsedIssueRecord {
        let mut record = ParsedIssueRecord {
            issue_number,
            title: title.to_string(),
            ..ParsedIssueRecord::default()
        };

        let case_name = title.trim();
        if case_name.is_empty() {
            record
                .warnings
                .push("Could not extract case name from title".to_string());
        } else {
            let identity = parse_case_name(case_name);
            if !identity.is_recognized() {
                warn!(issue = issue_number, title = case_name, "title does not match expected case name pattern");
                record.warnings.push(format!(
                    "Title does not match expected case name pattern: {case_name}"
                ));
            }
            record.case_name = Some(case_name.to_string());
            record.identity = Some(identity);
        }

        let sections = self.extract_sections(body);
        if sections.purpose.is_none() {
            record.warnings.push("No purpose section found".to_string());
        }

        let paths = self.extract_paths(body);
        record.diagnostics_paths = paths_with_keywords(&paths, DIAGNOSTIC_PATH_KEYWORDS);
        record.output_paths = paths_with_keywords(&paths, OUTPUT_PATH_KEYWORDS);
        record.case_directory = self.resolve_case_directory(&sections, &paths);
        record.contacts = extract_contacts(body);
        record.diagnostic_urls = self.extract_diagnostic_urls(body);
        record.purpose = sections.purpose;
        record.description = sections.description;
        record
    }

    pub fn extract_sections(&self, body: &str) -> IssueSections {
        let mut sections = IssueSections::default();
        for (label, pattern) in &self.sections {
            if let Some(text) = pattern
                .captures(body)
                .and_then(|captures| captures.get(1))
                .map(|matched| matched.as_str().trim())
                && !text.is_empty()
            {
                *sections.slot(*label) = Some(text.to_string());
            }
        }
        sections
    }

    /// Every path under a known root, deduplicated and sorted.
    pub fn extract_paths(&self, text: &str) -> BTreeSet<String> {
        self.paths_in_order(text).into_iter().collect()
    }

    pub fn extract_diagnostic_urls(&self, text: &str) -> BTreeSet<String> {
        self.url_pattern
            .find_iter(text)
            .map(|matched| matched.as_str().trim_end_matches(URL_TRAILING_PUNCTUATION))
            .filter(|url| !url.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    fn paths_in_order(&self, text: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for matched in self.path_pattern.find_iter(text) {
            let path = matched.as_str().trim_end_matches(PATH_TRAILING_PUNCTUATION);
            if !path.is_empty() && seen.insert(path.to_string()) {
                out.push(path.to_string());
            }
        }
        out
    }

    fn resolve_case_directory(
        &self,
        sections: &IssueSections,
        body_paths: &BTreeSet<String>,
    ) -> Option<String> {
        if let Some(section) = sections.case_directory.as_deref() {
            let candidates = self.paths_in_order(section);
            if let Some(run_like) = candidates
                .iter()
                .find(|path| contains_any_keyword(path, RUN_DIRECTORY_KEYWORDS))
            {
                return Some(run_like.clone());
            }
            if let Some(first) = candidates.into_iter().next() {
                return Some(first);
            }
        }

        body_paths
            .iter()
            .find(|path| {
                let lowered = path.to_lowercase();
                RUN_DIRECTORY_KEYWORDS
                    .iter()
                    .all(|keyword| lowered.contains(keyword))
            })
            .cloned()
    }
}

pub fn extract_contacts(text: &str) -> BTreeSet<String> {
    contact_pattern()
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|handle| handle.as_str().to_string())
        .collect()
}

fn paths_with_keywords(paths: &BTreeSet<String>, keywords: &[&str]) -> Vec<String> {
    paths
        .iter()
        .filter(|path| contains_any_keyword(path, keywords))
        .cloned()
        .collect()
}

fn contains_any_keyword(path: &str, keywords: &[&str]) -> bool {
    let lowered = path.to_lowercase();
    keywords.iter().any(|keyword| lowered.contains(keyword))
}

fn non_empty_alternation(values: &[String], fallback: &str) -> String {
    let escaped = values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(regex::escape)
        .collect::<Vec<_>>();
    if escaped.is_empty() {
        regex::escape(fallback)
    } else {
        escaped.join("|")
    }
}

fn contact_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // An `@` glued to a preceding word character is an email address, not a mention.
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:^|[^A-Za-z0-9_.@])@([A-Za-z0-9_-]+)").expect("valid contact pattern")
    })
}
