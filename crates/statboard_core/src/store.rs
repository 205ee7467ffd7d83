use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;
use tracing::{debug, info};

use crate::case_name::CaseIdentity;
use crate::github::IssueRecord;
use crate::migrate::{ensure_db_parent, migrate_connection, open_connection};
use crate::resolver::DiagnosticsLocation;
use crate::stats::StatisticRecord;

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_COMPLETED_WITH_ERRORS: &str = "completed_with_errors";

/// Case fields to write. `None` leaves a stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseUpsert {
    pub case_name: String,
    pub experiment_id: Option<String>,
    pub compset: Option<String>,
    pub resolution: Option<String>,
    pub case_number: Option<String>,
    pub issue_id: Option<i64>,
    pub purpose: Option<String>,
    pub description: Option<String>,
    pub case_directory: Option<String>,
    pub diagnostics_directory: Option<String>,
    pub diagnostics_url: Option<String>,
    pub has_diagnostics: Option<bool>,
    pub contacts: Option<Vec<String>>,
    pub year_range: Option<String>,
}

impl CaseUpsert {
    pub fn from_identity(identity: &CaseIdentity) -> Self {
        Self {
            case_name: identity.case_name.clone(),
            experiment_id: identity.experiment_id.clone(),
            compset: identity.compset.clone(),
            resolution: identity.resolution.clone(),
            case_number: identity.case_number.clone(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertedCase {
    pub id: i64,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseRecord {
    pub id: i64,
    pub case_name: String,
    pub experiment_id: Option<String>,
    pub compset: Option<String>,
    pub resolution: Option<String>,
    pub case_number: Option<String>,
    pub issue_id: Option<i64>,
    pub issue_number: Option<i64>,
    pub issue_state: Option<String>,
    pub issue_url: Option<String>,
    pub purpose: Option<String>,
    pub description: Option<String>,
    pub case_directory: Option<String>,
    pub diagnostics_directory: Option<String>,
    pub diagnostics_url: Option<String>,
    pub has_diagnostics: bool,
    pub contacts: Vec<String>,
    pub year_range: Option<String>,
    pub atm_in_path: Option<String>,
    pub atm_in_namelist: Option<serde_json::Value>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseFilters {
    pub compset: Option<String>,
    pub resolution: Option<String>,
    pub has_diagnostics: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VariableStatistics {
    pub units: Option<String>,
    pub metrics: BTreeMap<String, f64>,
}

/// `period -> variable -> metrics` for one case.
pub type CaseStatistics = BTreeMap<String, BTreeMap<String, VariableStatistics>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateCounts {
    pub issues_fetched: usize,
    pub cases_updated: usize,
    pub diagnostics_found: usize,
    pub statistics_extracted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateLogEntry {
    pub id: i64,
    pub update_type: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub issues_fetched: i64,
    pub cases_updated: i64,
    pub diagnostics_found: i64,
    pub statistics_extracted: i64,
    pub errors: Vec<String>,
    pub status: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupCount {
    pub count: usize,
    pub with_diagnostics: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummaryStatistics {
    pub total_cases: usize,
    pub cases_with_diagnostics: usize,
    pub by_compset: BTreeMap<String, GroupCount>,
    pub by_resolution: BTreeMap<String, GroupCount>,
    pub last_update: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub issues: usize,
    pub cases: usize,
    pub diagnostics: usize,
    pub statistics: usize,
    pub update_runs: usize,
}

const CASE_SELECT: &str = "SELECT
        c.id, c.case_name, c.experiment_id, c.compset, c.resolution, c.case_number,
        c.issue_id, i.issue_number, i.state, i.html_url,
        c.purpose, c.description, c.case_directory, c.diagnostics_directory,
        c.diagnostics_url, c.has_diagnostics, c.contacts_json, c.year_range,
        c.atm_in_path, c.atm_in_namelist, c.created_at, c.updated_at
    FROM cases c
    LEFT JOIN issues i ON c.issue_id = i.id";

pub struct Store {
    connection: Connection,
    db_path: PathBuf,
}

impl Store {
    /// Open (creating if needed) and bring the schema up to date.
    pub fn open(db_path: &Path) -> Result<Self> {
        ensure_db_parent(db_path)?;
        let connection = open_connection(db_path)?;
        migrate_connection(&connection)?;
        debug!(path = %db_path.display(), "opened store");
        Ok(Self {
            connection,
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn upsert_issue(&self, issue: &IssueRecord, case_name: Option<&str>) -> Result<i64> {
        let labels_json =
            serde_json::to_string(&issue.labels).context("failed to encode issue labels")?;
        let number = i64::try_from(issue.number).context("issue number does not fit into i64")?;
        self.connection
            .execute(
                "INSERT INTO issues (
                    issue_number, title, state, created_at, updated_at, closed_at,
                    body, case_name, author, labels_json, html_url, last_fetched
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, CURRENT_TIMESTAMP)
                ON CONFLICT(issue_number) DO UPDATE SET
                    title = excluded.title,
                    state = excluded.state,
                    created_at = COALESCE(excluded.created_at, issues.created_at),
                    updated_at = excluded.updated_at,
                    closed_at = excluded.closed_at,
                    body = excluded.body,
                    case_name = COALESCE(excluded.case_name, issues.case_name),
                    author = excluded.author,
                    labels_json = excluded.labels_json,
                    html_url = excluded.html_url,
                    last_fetched = CURRENT_TIMESTAMP",
                params![
                    number,
                    issue.title,
                    issue.state,
                    issue.created_at.map(format_timestamp),
                    issue.updated_at.map(format_timestamp),
                    issue.closed_at.map(format_timestamp),
                    issue.body,
                    case_name,
                    issue.author,
                    labels_json,
                    issue.html_url,
                ],
            )
            .with_context(|| format!("failed to upsert issue #{}", issue.number))?;

        self.connection
            .query_row(
                "SELECT id FROM issues WHERE issue_number = ?1",
                [number],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to read id of issue #{}", issue.number))
    }

    pub fn issue_body(&self, issue_id: i64) -> Result<Option<String>> {
        self.connection
            .query_row("SELECT body FROM issues WHERE id = ?1", [issue_id], |row| {
                row.get(0)
            })
            .optional()
            .with_context(|| format!("failed to read body of issue id {issue_id}"))
    }

    /// Insert or merge a case. Known non-null fields are never cleared and
    /// `has_diagnostics` only ever moves from false to true through this path.
    pub fn upsert_case(&self, case: &CaseUpsert) -> Result<UpsertedCase> {
        let existing = self.case_id(&case.case_name)?;
        let contacts_json = case
            .contacts
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to encode contacts")?;

        self.connection
            .execute(
                "INSERT INTO cases (
                    case_name, experiment_id, compset, resolution, case_number, issue_id,
                    purpose, description, case_directory, diagnostics_directory,
                    diagnostics_url, has_diagnostics, contacts_json, year_range, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, COALESCE(?12, 0), ?13, ?14, CURRENT_TIMESTAMP)
                ON CONFLICT(case_name) DO UPDATE SET
                    experiment_id = COALESCE(excluded.experiment_id, cases.experiment_id),
                    compset = COALESCE(excluded.compset, cases.compset),
                    resolution = COALESCE(excluded.resolution, cases.resolution),
                    case_number = COALESCE(excluded.case_number, cases.case_number),
                    issue_id = COALESCE(excluded.issue_id, cases.issue_id),
                    purpose = COALESCE(excluded.purpose, cases.purpose),
                    description = COALESCE(excluded.description, cases.description),
                    case_directory = COALESCE(excluded.case_directory, cases.case_directory),
                    diagnostics_directory = COALESCE(excluded.diagnostics_directory, cases.diagnostics_directory),
                    diagnostics_url = COALESCE(excluded.diagnostics_url, cases.diagnostics_url),
                    has_diagnostics = MAX(COALESCE(?12, 0), cases.has_diagnostics),
                    contacts_json = COALESCE(excluded.contacts_json, cases.contacts_json),
                    year_range = COALESCE(excluded.year_range, cases.year_range),
                    updated_at = CURRENT_TIMESTAMP",
                params![
                    case.case_name,
                    case.experiment_id,
                    case.compset,
                    case.resolution,
                    case.case_number,
                    case.issue_id,
                    case.purpose,
                    case.description,
                    case.case_directory,
                    case.diagnostics_directory,
                    case.diagnostics_url,
                    case.has_diagnostics,
                    contacts_json,
                    case.year_range,
                ],
            )
            .with_context(|| format!("failed to upsert case {}", case.case_name))?;

        let id = self
            .case_id(&case.case_name)?
            .with_context(|| format!("case {} missing after upsert", case.case_name))?;
        Ok(UpsertedCase {
            id,
            created: existing.is_none(),
        })
    }

    /// Record the winning diagnostics location for a case. Rows for any earlier
    /// location of the same case are dropped, statistics included.
    pub fn upsert_diagnostic(&self, case_id: i64, location: &DiagnosticsLocation) -> Result<i64> {
        let file_count = i64::try_from(location.file_or_table_count)
            .context("file count does not fit into i64")?;
        let transaction = self
            .connection
            .unchecked_transaction()
            .context("failed to begin diagnostic transaction")?;
        transaction
            .execute(
                "INSERT INTO diagnostics (case_id, diagnostic_type, path, source, file_count, last_modified)
                 VALUES (?1, 'AMWG', ?2, ?3, ?4, ?5)
                 ON CONFLICT(case_id, path) DO UPDATE SET
                    source = excluded.source,
                    file_count = excluded.file_count,
                    last_modified = excluded.last_modified",
                params![
                    case_id,
                    location.path_or_url,
                    location.kind.as_str(),
                    file_count,
                    location.last_modified.map(format_timestamp),
                ],
            )
            .with_context(|| format!("failed to upsert diagnostic {}", location.path_or_url))?;

        let stale = transaction
            .execute(
                "DELETE FROM diagnostics WHERE case_id = ?1 AND path <> ?2",
                params![case_id, location.path_or_url],
            )
            .context("failed to drop superseded diagnostics")?;
        if stale > 0 {
            debug!(case_id, stale, path = %location.path_or_url, "dropped superseded diagnostics");
        }
        let diagnostic_id = transaction
            .query_row(
                "SELECT id FROM diagnostics WHERE case_id = ?1 AND path = ?2",
                params![case_id, location.path_or_url],
                |row| row.get(0),
            )
            .context("failed to read diagnostic id")?;
        transaction
            .commit()
            .context("failed to commit diagnostic upsert")?;
        Ok(diagnostic_id)
    }

    /// Append statistics rows for a diagnostic. Repeated calls accumulate rows.
    pub fn bulk_insert_statistics(
        &mut self,
        diagnostic_id: i64,
        records: &[StatisticRecord],
    ) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let transaction = self
            .connection
            .transaction()
            .context("failed to start statistics transaction")?;
        let inserted = insert_statistics(&transaction, diagnostic_id, records)?;
        transaction
            .commit()
            .context("failed to commit statistics transaction")?;
        debug!(diagnostic_id, inserted, "inserted statistics");
        Ok(inserted)
    }

    /// Delete every statistic of a diagnostic and insert `records`, atomically.
    pub fn replace_statistics(
        &mut self,
        diagnostic_id: i64,
        records: &[StatisticRecord],
    ) -> Result<usize> {
        let transaction = self
            .connection
            .transaction()
            .context("failed to start statistics transaction")?;
        let removed = transaction
            .execute(
                "DELETE FROM statistics WHERE diagnostic_id = ?1",
                [diagnostic_id],
            )
            .context("failed to clear previous statistics")?;
        let inserted = insert_statistics(&transaction, diagnostic_id, records)?;
        transaction
            .commit()
            .context("failed to commit statistics transaction")?;
        debug!(diagnostic_id, removed, inserted, "replaced statistics");
        Ok(inserted)
    }

    pub fn get_case_by_name(&self, case_name: &str) -> Result<Option<CaseRecord>> {
        let sql = format!("{CASE_SELECT} WHERE c.case_name = ?1");
        self.connection
            .query_row(&sql, [case_name], case_from_row)
            .optional()
            .with_context(|| format!("failed to load case {case_name}"))
    }

    pub fn get_all_cases(&self, filters: &CaseFilters) -> Result<Vec<CaseRecord>> {
        let mut sql = format!("{CASE_SELECT} WHERE 1 = 1");
        let mut values = Vec::new();
        if let Some(compset) = &filters.compset {
            sql.push_str(" AND c.compset = ?");
            values.push(SqlValue::Text(compset.clone()));
        }
        if let Some(resolution) = &filters.resolution {
            sql.push_str(" AND c.resolution = ?");
            values.push(SqlValue::Text(resolution.clone()));
        }
        if let Some(has_diagnostics) = filters.has_diagnostics {
            sql.push_str(" AND c.has_diagnostics = ?");
            values.push(SqlValue::Integer(i64::from(has_diagnostics)));
        }
        sql.push_str(" ORDER BY c.case_name ASC");

        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare case listing query")?;
        let rows = statement
            .query_map(params_from_iter(values), case_from_row)
            .context("failed to run case listing query")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to read case row")?);
        }
        Ok(out)
    }

    pub fn get_case_statistics(&self, case_id: i64) -> Result<CaseStatistics> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT s.temporal_period, s.variable_name, s.metric_name, s.value, s.units
                 FROM statistics s
                 JOIN diagnostics d ON s.diagnostic_id = d.id
                 WHERE d.case_id = ?1
                 ORDER BY s.temporal_period, s.variable_name, s.metric_name, s.id",
            )
            .context("failed to prepare case statistics query")?;
        let rows = statement
            .query_map([case_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .context("failed to run case statistics query")?;

        let mut out = CaseStatistics::new();
        for row in rows {
            let (period, variable, metric, value, units) =
                row.context("failed to read statistics row")?;
            let entry = out
                .entry(period)
                .or_default()
                .entry(variable)
                .or_default();
            entry.metrics.insert(metric, value);
            if units.is_some() {
                entry.units = units;
            }
        }
        Ok(out)
    }

    pub fn update_case_namelist(
        &self,
        case_id: i64,
        namelist: &serde_json::Value,
        path: &str,
    ) -> Result<()> {
        let encoded = serde_json::to_string(namelist).context("failed to encode namelist")?;
        self.connection
            .execute(
                "UPDATE cases SET atm_in_namelist = ?1, atm_in_path = ?2, updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?3",
                params![encoded, path, case_id],
            )
            .with_context(|| format!("failed to store namelist for case id {case_id}"))?;
        debug!(case_id, path, "stored atm_in namelist");
        Ok(())
    }

    pub fn log_update(&self, update_type: &str) -> Result<i64> {
        self.connection
            .execute(
                "INSERT INTO update_log (update_type, started_at, status) VALUES (?1, ?2, ?3)",
                params![update_type, format_timestamp(Utc::now()), STATUS_RUNNING],
            )
            .context("failed to open update log entry")?;
        Ok(self.connection.last_insert_rowid())
    }

    /// Close a run. The status is `completed` unless `errors` is non-empty.
    pub fn complete_update_log(
        &self,
        log_id: i64,
        counts: &UpdateCounts,
        errors: &[String],
    ) -> Result<&'static str> {
        let status = if errors.is_empty() {
            STATUS_COMPLETED
        } else {
            STATUS_COMPLETED_WITH_ERRORS
        };
        let errors_json = if errors.is_empty() {
            None
        } else {
            Some(serde_json::to_string(errors).context("failed to encode run errors")?)
        };
        self.connection
            .execute(
                "UPDATE update_log
                 SET completed_at = ?1, issues_fetched = ?2, cases_updated = ?3,
                     diagnostics_found = ?4, statistics_extracted = ?5, errors = ?6, status = ?7
                 WHERE id = ?8",
                params![
                    format_timestamp(Utc::now()),
                    to_i64(counts.issues_fetched)?,
                    to_i64(counts.cases_updated)?,
                    to_i64(counts.diagnostics_found)?,
                    to_i64(counts.statistics_extracted)?,
                    errors_json,
                    status,
                    log_id,
                ],
            )
            .with_context(|| format!("failed to complete update log {log_id}"))?;
        info!(log_id, status, "update run recorded");
        Ok(status)
    }

    pub fn latest_update(&self) -> Result<Option<UpdateLogEntry>> {
        self.connection
            .query_row(
                "SELECT id, update_type, started_at, completed_at, issues_fetched, cases_updated,
                        diagnostics_found, statistics_extracted, errors, status
                 FROM update_log
                 WHERE status != ?1
                 ORDER BY completed_at DESC, id DESC
                 LIMIT 1",
                [STATUS_RUNNING],
                |row| {
                    let errors: Option<String> = row.get(8)?;
                    Ok(UpdateLogEntry {
                        id: row.get(0)?,
                        update_type: row.get(1)?,
                        started_at: row.get(2)?,
                        completed_at: row.get(3)?,
                        issues_fetched: row.get(4)?,
                        cases_updated: row.get(5)?,
                        diagnostics_found: row.get(6)?,
                        statistics_extracted: row.get(7)?,
                        errors: errors
                            .and_then(|json| serde_json::from_str(&json).ok())
                            .unwrap_or_default(),
                        status: row.get(9)?,
                    })
                },
            )
            .optional()
            .context("failed to read latest update log entry")
    }

    pub fn get_summary_statistics(&self) -> Result<SummaryStatistics> {
        let total_cases = count_query(&self.connection, "SELECT COUNT(*) FROM cases")?;
        let cases_with_diagnostics = count_query(
            &self.connection,
            "SELECT COUNT(*) FROM cases WHERE has_diagnostics = 1",
        )?;
        let last_update = self
            .connection
            .query_row(
                "SELECT MAX(completed_at) FROM update_log WHERE status != ?1",
                [STATUS_RUNNING],
                |row| row.get::<_, Option<String>>(0),
            )
            .context("failed to read last update time")?;

        Ok(SummaryStatistics {
            total_cases,
            cases_with_diagnostics,
            by_compset: group_counts(&self.connection, "compset")?,
            by_resolution: group_counts(&self.connection, "resolution")?,
            last_update,
        })
    }

    pub fn table_counts(&self) -> Result<TableCounts> {
        Ok(TableCounts {
            issues: count_query(&self.connection, "SELECT COUNT(*) FROM issues")?,
            cases: count_query(&self.connection, "SELECT COUNT(*) FROM cases")?,
            diagnostics: count_query(&self.connection, "SELECT COUNT(*) FROM diagnostics")?,
            statistics: count_query(&self.connection, "SELECT COUNT(*) FROM statistics")?,
            update_runs: count_query(&self.connection, "SELECT COUNT(*) FROM update_log")?,
        })
    }

    /// Strip markdown backticks and whitespace captured at the end of case directories.
    pub fn cleanup_case_directories(&self) -> Result<usize> {
        let fixed = self
            .connection
            .execute(
                "UPDATE cases SET case_directory = RTRIM(TRIM(case_directory), '` ')
                 WHERE case_directory LIKE '%`' OR case_directory LIKE '% '",
                [],
            )
            .context("failed to clean case directories")?;
        if fixed > 0 {
            info!(fixed, "cleaned stored case directories");
        }
        Ok(fixed)
    }

    fn case_id(&self, case_name: &str) -> Result<Option<i64>> {
        self.connection
            .query_row(
                "SELECT id FROM cases WHERE case_name = ?1",
                [case_name],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to look up case {case_name}"))
    }
}

fn insert_statistics(
    connection: &Connection,
    diagnostic_id: i64,
    records: &[StatisticRecord],
) -> Result<usize> {
    let mut statement = connection
        .prepare(
            "INSERT INTO statistics (diagnostic_id, variable_name, temporal_period, metric_name, value, units)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .context("failed to prepare statistics insert")?;
    for record in records {
        statement
            .execute(params![
                diagnostic_id,
                record.variable_name,
                record.temporal_period.label(),
                record.metric.as_str(),
                record.value,
                record.unit,
            ])
            .with_context(|| format!("failed to insert statistic for {}", record.variable_name))?;
    }
    Ok(records.len())
}

fn case_from_row(row: &Row<'_>) -> rusqlite::Result<CaseRecord> {
    let contacts_json: Option<String> = row.get(16)?;
    let namelist_json: Option<String> = row.get(19)?;
    Ok(CaseRecord {
        id: row.get(0)?,
        case_name: row.get(1)?,
        experiment_id: row.get(2)?,
        compset: row.get(3)?,
        resolution: row.get(4)?,
        case_number: row.get(5)?,
        issue_id: row.get(6)?,
        issue_number: row.get(7)?,
        issue_state: row.get(8)?,
        issue_url: row.get(9)?,
        purpose: row.get(10)?,
        description: row.get(11)?,
        case_directory: row.get(12)?,
        diagnostics_directory: row.get(13)?,
        diagnostics_url: row.get(14)?,
        has_diagnostics: row.get(15)?,
        contacts: contacts_json
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default(),
        year_range: row.get(17)?,
        atm_in_path: row.get(18)?,
        atm_in_namelist: namelist_json.and_then(|json| serde_json::from_str(&json).ok()),
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

fn group_counts(connection: &Connection, column: &str) -> Result<BTreeMap<String, GroupCount>> {
    let sql = format!(
        "SELECT {column}, COUNT(*), SUM(CASE WHEN has_diagnostics = 1 THEN 1 ELSE 0 END)
         FROM cases
         WHERE {column} IS NOT NULL
         GROUP BY {column}"
    );
    let mut statement = connection
        .prepare(&sql)
        .with_context(|| format!("failed to prepare {column} aggregation query"))?;
    let rows = statement
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })
        .with_context(|| format!("failed to run {column} aggregation query"))?;

    let mut out = BTreeMap::new();
    for row in rows {
        let (key, count, with_diagnostics) =
            row.with_context(|| format!("failed to read {column} aggregation row"))?;
        out.insert(
            key,
            GroupCount {
                count: usize::try_from(count).context("count does not fit into usize")?,
                with_diagnostics: usize::try_from(with_diagnostics)
                    .context("count does not fit into usize")?,
            },
        );
    }
    Ok(out)
}

fn count_query(connection: &Connection, sql: &str) -> Result<usize> {
    let count: i64 = connection
        .query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("failed query: {sql}"))?;
    usize::try_from(count).context("count does not fit into usize")
}

fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value).context("count does not fit into i64")
}

pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}
