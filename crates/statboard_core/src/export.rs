use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::runtime::write_text_file;
use crate::store::{
    CaseFilters, CaseRecord, CaseStatistics, GroupCount, Store, SummaryStatistics, UpdateLogEntry,
    format_timestamp,
};

pub const CASES_FILE: &str = "cases.json";
pub const STATISTICS_FILE: &str = "statistics.json";
pub const LAST_UPDATE_FILE: &str = "last_update.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub cases: usize,
    pub cases_with_diagnostics: usize,
    pub statistics: usize,
    pub written: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ExportedCase<'a> {
    case_name: &'a str,
    experiment_id: Option<&'a str>,
    compset: Option<&'a str>,
    resolution: Option<&'a str>,
    case_number: Option<&'a str>,
    issue_number: Option<i64>,
    issue_state: Option<&'a str>,
    issue_url: Option<&'a str>,
    purpose: Option<&'a str>,
    description: Option<&'a str>,
    case_directory: Option<&'a str>,
    diagnostics_directory: Option<&'a str>,
    diagnostics_url: Option<&'a str>,
    has_diagnostics: bool,
    contacts: &'a [String],
    year_range: Option<&'a str>,
    atm_in_path: Option<&'a str>,
    atm_in_namelist: Option<&'a serde_json::Value>,
    statistics: BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>,
    created_at: &'a str,
    updated_at: &'a str,
}

impl<'a> ExportedCase<'a> {
    fn new(case: &'a CaseRecord, statistics: CaseStatistics) -> Self {
        Self {
            case_name: &case.case_name,
            experiment_id: case.experiment_id.as_deref(),
            compset: case.compset.as_deref(),
            resolution: case.resolution.as_deref(),
            case_number: case.case_number.as_deref(),
            issue_number: case.issue_number,
            issue_state: case.issue_state.as_deref(),
            issue_url: case.issue_url.as_deref(),
            purpose: case.purpose.as_deref(),
            description: case.description.as_deref(),
            case_directory: case.case_directory.as_deref(),
            diagnostics_directory: case.diagnostics_directory.as_deref(),
            diagnostics_url: case.diagnostics_url.as_deref(),
            has_diagnostics: case.has_diagnostics,
            contacts: &case.contacts,
            year_range: case.year_range.as_deref(),
            atm_in_path: case.atm_in_path.as_deref(),
            atm_in_namelist: case.atm_in_namelist.as_ref(),
            statistics: statistics
                .into_iter()
                .map(|(period, variables)| {
                    let variables = variables
                        .into_iter()
                        .map(|(variable, stats)| (variable, stats.metrics))
                        .collect();
                    (period, variables)
                })
                .collect(),
            created_at: &case.created_at,
            updated_at: &case.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct CasesMetadata<'a> {
    total_cases: usize,
    cases_with_diagnostics: usize,
    diagnostic_coverage: f64,
    exported_at: &'a str,
}

#[derive(Debug, Serialize)]
struct CasesFile<'a> {
    cases: Vec<ExportedCase<'a>>,
    metadata: CasesMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct StatisticsFile<'a> {
    total_cases: usize,
    cases_with_diagnostics: usize,
    diagnostic_coverage: f64,
    by_compset: &'a BTreeMap<String, GroupCount>,
    by_resolution: &'a BTreeMap<String, GroupCount>,
    exported_at: &'a str,
}

#[derive(Debug, Serialize)]
struct LastUpdateFile<'a> {
    exported_at: &'a str,
    total_cases: usize,
    cases_with_diagnostics: usize,
    last_update: Option<&'a UpdateLogEntry>,
}

/// Write the dashboard JSON files into `output_dir`, replacing earlier exports.
pub fn export_static(store: &Store, output_dir: &Path) -> Result<ExportReport> {
    let exported_at = format_timestamp(Utc::now());
    let summary = store.get_summary_statistics()?;
    let coverage = coverage_percent(&summary);
    let cases = store.get_all_cases(&CaseFilters::default())?;

    let mut statistics = 0;
    let mut exported = Vec::with_capacity(cases.len());
    for case in &cases {
        let case_statistics = store.get_case_statistics(case.id)?;
        statistics += case_statistics
            .values()
            .flat_map(|variables| variables.values())
            .map(|stats| stats.metrics.len())
            .sum::<usize>();
        exported.push(ExportedCase::new(case, case_statistics));
    }

    let mut written = Vec::new();
    written.push(write_json(
        &output_dir.join(CASES_FILE),
        &CasesFile {
            cases: exported,
            metadata: CasesMetadata {
                total_cases: summary.total_cases,
                cases_with_diagnostics: summary.cases_with_diagnostics,
                diagnostic_coverage: coverage,
                exported_at: &exported_at,
            },
        },
    )?);
    written.push(write_json(
        &output_dir.join(STATISTICS_FILE),
        &StatisticsFile {
            total_cases: summary.total_cases,
            cases_with_diagnostics: summary.cases_with_diagnostics,
            diagnostic_coverage: coverage,
            by_compset: &summary.by_compset,
            by_resolution: &summary.by_resolution,
            exported_at: &exported_at,
        },
    )?);
    let latest = store.latest_update()?;
    written.push(write_json(
        &output_dir.join(LAST_UPDATE_FILE),
        &LastUpdateFile {
            exported_at: &exported_at,
            total_cases: summary.total_cases,
            cases_with_diagnostics: summary.cases_with_diagnostics,
            last_update: latest.as_ref(),
        },
    )?);

    info!(
        dir = %output_dir.display(),
        cases = cases.len(),
        statistics,
        "exported static data"
    );
    Ok(ExportReport {
        cases: cases.len(),
        cases_with_diagnostics: summary.cases_with_diagnostics,
        statistics,
        written,
    })
}

/// Percentage of cases with diagnostics, rounded to one decimal.
fn coverage_percent(summary: &SummaryStatistics) -> f64 {
    if summary.total_cases == 0 {
        return 0.0;
    }
    let ratio = summary.cases_with_diagnostics as f64 / summary.total_cases as f64;
    (ratio * 1000.0).round() / 10.0
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<PathBuf> {
    let content = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    write_text_file(path, &content, true)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::Value;
    use tempfile::tempdir;

    use super::*;
    use crate::case_name::parse_case_name;
    use crate::period::TemporalPeriod;
    use crate::resolver::{DiagnosticsLocation, SourceKind};
    use crate::stats::{Metric, StatisticRecord};
    use crate::store::{CaseUpsert, UpdateCounts};

    const CASE: &str = "b.e30_alpha08b.B1850C_LTso.ne30_t232_wgx3.308";
    const OTHER: &str = "b.e30_alpha08b.B1850C_LTso.ne30_t232_wgx3.309";

    fn read_json(path: &Path) -> Value {
        let text = fs::read_to_string(path).expect("read export");
        serde_json::from_str(&text).expect("valid json")
    }

    #[test]
    fn coverage_is_rounded_percentage() {
        let summary = SummaryStatistics {
            total_cases: 3,
            cases_with_diagnostics: 1,
            ..SummaryStatistics::default()
        };
        assert_eq!(coverage_percent(&summary), 33.3);
        assert_eq!(coverage_percent(&SummaryStatistics::default()), 0.0);
    }

    #[test]
    fn export_writes_cases_summary_and_last_update() {
        let temp = tempdir().expect("tempdir");
        let mut store = Store::open(&temp.path().join("statboard.db")).expect("store");

        let mut case = CaseUpsert::from_identity(&parse_case_name(CASE));
        case.has_diagnostics = Some(true);
        case.contacts = Some(vec!["hannay".to_string()]);
        let case = store.upsert_case(&case).expect("case");
        store
            .upsert_case(&CaseUpsert::from_identity(&parse_case_name(OTHER)))
            .expect("other case");
        let diagnostic = store
            .upsert_diagnostic(
                case.id,
                &DiagnosticsLocation {
                    path_or_url: "/glade/adf/case".to_string(),
                    exists: true,
                    kind: SourceKind::Filesystem,
                    file_or_table_count: 1,
                    last_modified: None,
                },
            )
            .expect("diagnostic");
        store
            .replace_statistics(
                diagnostic,
                &[StatisticRecord {
                    variable_name: "TS".to_string(),
                    temporal_period: TemporalPeriod::ANNUAL,
                    metric: Metric::GlobalMean,
                    value: 288.5,
                    unit: Some("K".to_string()),
                }],
            )
            .expect("statistics");
        let log = store.log_update("full").expect("log");
        store
            .complete_update_log(log, &UpdateCounts::default(), &[])
            .expect("complete");

        let out = temp.path().join("web").join("data");
        let report = export_static(&store, &out).expect("export");
        assert_eq!(report.cases, 2);
        assert_eq!(report.cases_with_diagnostics, 1);
        assert_eq!(report.statistics, 1);
        assert_eq!(report.written.len(), 3);

        let cases = read_json(&out.join(CASES_FILE));
        assert_eq!(cases["metadata"]["total_cases"], 2);
        assert_eq!(cases["metadata"]["diagnostic_coverage"], 50.0);
        let first = &cases["cases"][0];
        assert_eq!(first["case_name"], CASE);
        assert_eq!(first["contacts"][0], "hannay");
        assert_eq!(first["statistics"]["ANN"]["TS"]["global_mean"], 288.5);
        assert_eq!(cases["cases"][1]["statistics"], serde_json::json!({}));

        let statistics = read_json(&out.join(STATISTICS_FILE));
        assert_eq!(statistics["by_compset"]["B1850C_LTso"]["count"], 2);
        assert_eq!(statistics["by_compset"]["B1850C_LTso"]["with_diagnostics"], 1);

        let last = read_json(&out.join(LAST_UPDATE_FILE));
        assert_eq!(last["last_update"]["status"], "completed");
        assert_eq!(last["total_cases"], 2);
    }
}
