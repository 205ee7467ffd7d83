use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Full four-segment form: `{experiment_id}.{compset}.{resolution}.{case_number}`.
/// Compsets lead with an uppercase letter; modifier suffixes such as `_LTso` keep
/// their lowercase letters.
const PRIMARY_PATTERN: &str = r"^(?P<experiment_id>[A-Za-z0-9._-]+?)\.(?P<compset>[A-Z][A-Za-z0-9_]+)\.(?P<resolution>[a-z0-9_]+)\.(?P<case_number>\d+)$";

const FALLBACK_RULES: &[(IdentityField, &str)] = &[
    (IdentityField::Compset, r"\b([A-Z][A-Z0-9_]+)\b"),
    (IdentityField::Resolution, r"\b([a-z0-9]+_[a-z0-9_]+)\b"),
    (IdentityField::CaseNumber, r"\.(\d+)$"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaseIdentity {
    pub case_name: String,
    pub experiment_id: Option<String>,
    pub compset: Option<String>,
    pub resolution: Option<String>,
    pub case_number: Option<String>,
}

impl CaseIdentity {
    pub fn is_recognized(&self) -> bool {
        self.compset.is_some() || self.resolution.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentityField {
    ExperimentId,
    Compset,
    Resolution,
    CaseNumber,
}

impl IdentityField {
    fn assign(self, identity: &mut CaseIdentity, value: &str) {
        let value = Some(value.to_string());
        match self {
            Self::ExperimentId => identity.experiment_id = value,
            Self::Compset => identity.compset = value,
            Self::Resolution => identity.resolution = value,
            Self::CaseNumber => identity.case_number = value,
        }
    }

    fn group_name(self) -> &'static str {
        match self {
            Self::ExperimentId => "experiment_id",
            Self::Compset => "compset",
            Self::Resolution => "resolution",
            Self::CaseNumber => "case_number",
        }
    }
}

/// Parse a case name into its identity fields. Never fails: anything the
/// grammars cannot recover is left as `None`.
pub fn parse_case_name(case_name: &str) -> CaseIdentity {
    let trimmed = case_name.trim();
    let mut identity = CaseIdentity {
        case_name: trimmed.to_string(),
        ..CaseIdentity::default()
    };
    if trimmed.is_empty() {
        return identity;
    }

    if let Some(captures) = primary_pattern().captures(trimmed) {
        for field in [
            IdentityField::ExperimentId,
            IdentityField::Compset,
            IdentityField::Resolution,
            IdentityField::CaseNumber,
        ] {
            if let Some(matched) = captures.name(field.group_name()) {
                field.assign(&mut identity, matched.as_str());
            }
        }
        return identity;
    }

    for (field, pattern) in fallback_rules() {
        if let Some(matched) = pattern.captures(trimmed).and_then(|captures| captures.get(1)) {
            field.assign(&mut identity, matched.as_str());
        }
    }
    identity
}

fn primary_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(PRIMARY_PATTERN).expect("valid case name pattern"))
}

fn fallback_rules() -> &'static [(IdentityField, Regex)] {
    static RULES: OnceLock<Vec<(IdentityField, Regex)>> = OnceLock::new();
    RULES.get_or_init(|| {
        FALLBACK_RULES
            .iter()
            .map(|(field, pattern)| {
                (
                    *field,
                    Regex::new(pattern).expect("valid fallback case name pattern"),
                )
            })
            .collect()
    })
}
