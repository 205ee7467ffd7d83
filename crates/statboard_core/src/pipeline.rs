use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::case_name::{CaseIdentity, parse_case_name};
use crate::config::BoardConfig;
use crate::github::{IssueRecord, IssueSource, IssueState};
use crate::issue::IssueParser;
use crate::namelist::{case_namelist_path, read_namelist_file};
use crate::period::year_range_in_path;
use crate::remote::{HostAllowList, PageFetcher, RemoteResolver};
use crate::resolver::{DiagnosticsLocation, DiagnosticsResolver, ResolverRoots, SourceKind};
use crate::stats::{StatisticRecord, StatisticsSource, directory_year_range, extract};
use crate::store::{CaseFilters, CaseRecord, CaseUpsert, STATUS_RUNNING, Store, UpdateCounts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectMode {
    Full,
    Test(usize),
}

impl CollectMode {
    pub fn update_type(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Test(_) => "test",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub update_type: String,
    pub issues_processed: usize,
    pub cases_created: usize,
    pub cases_updated: usize,
    pub diagnostics_found: usize,
    pub statistics_extracted: usize,
    pub namelists_added: usize,
    pub errors: Vec<String>,
    pub status: String,
}

impl RunSummary {
    fn new(update_type: &str) -> Self {
        Self {
            update_type: update_type.to_string(),
            issues_processed: 0,
            cases_created: 0,
            cases_updated: 0,
            diagnostics_found: 0,
            statistics_extracted: 0,
            namelists_added: 0,
            errors: Vec::new(),
            status: STATUS_RUNNING.to_string(),
        }
    }

    fn counts(&self) -> UpdateCounts {
        UpdateCounts {
            issues_fetched: self.issues_processed,
            cases_updated: self.cases_updated,
            diagnostics_found: self.diagnostics_found,
            statistics_extracted: self.statistics_extracted,
        }
    }
}

/// Everything one collection run needs besides the issue source.
pub struct PipelineContext<F: PageFetcher> {
    pub store: Store,
    pub parser: IssueParser,
    pub resolver: DiagnosticsResolver,
    pub remote: RemoteResolver<F>,
}

impl<F: PageFetcher> PipelineContext<F> {
    pub fn new(
        store: Store,
        parser: IssueParser,
        resolver: DiagnosticsResolver,
        remote: RemoteResolver<F>,
    ) -> Self {
        Self {
            store,
            parser,
            resolver,
            remote,
        }
    }

    pub fn from_config(store: Store, config: &BoardConfig, fetcher: F) -> Self {
        Self::new(
            store,
            IssueParser::new(&config.filesystem.path_roots, &config.web.allowed_hosts),
            DiagnosticsResolver::new(ResolverRoots::from_config(config)),
            RemoteResolver::new(
                fetcher,
                HostAllowList::new(&config.web.allowed_hosts),
                config.web.max_depth,
            ),
        )
    }
}

/// Diagnostics found for one case, ready for storage.
struct ResolvedDiagnostics {
    location: DiagnosticsLocation,
    records: Vec<StatisticRecord>,
    year_range: Option<String>,
}

pub fn collect<F: PageFetcher, S: IssueSource>(
    ctx: &mut PipelineContext<F>,
    source: &mut S,
    mode: CollectMode,
) -> Result<RunSummary> {
    run_logged(ctx, mode.update_type(), |ctx, summary| {
        let mut issues = source
            .fetch_all_issues(IssueState::All)
            .context("failed to fetch issues")?;
        if let CollectMode::Test(limit) = mode {
            issues.truncate(limit);
        }
        info!(issues = issues.len(), mode = mode.update_type(), "collecting cases");
        process_issues(ctx, &issues, summary);
        Ok(())
    })
}

pub fn update_incremental<F: PageFetcher, S: IssueSource>(
    ctx: &mut PipelineContext<F>,
    source: &mut S,
    days: u32,
) -> Result<RunSummary> {
    run_logged(ctx, "incremental", |ctx, summary| {
        let since = Utc::now() - Duration::days(i64::from(days));
        let issues = source
            .fetch_updated_issues(since)
            .context("failed to fetch updated issues")?;
        info!(issues = issues.len(), days, "updating recently changed issues");
        process_issues(ctx, &issues, summary);
        Ok(())
    })
}

/// Retry diagnostics for every case still without them and backfill namelists.
pub fn update_diagnostics<F: PageFetcher>(ctx: &mut PipelineContext<F>) -> Result<RunSummary> {
    run_logged(ctx, "diagnostics", |ctx, summary| {
        let pending = ctx.store.get_all_cases(&CaseFilters {
            has_diagnostics: Some(false),
            ..CaseFilters::default()
        })?;
        info!(cases = pending.len(), "rescanning cases without diagnostics");

        for case in &pending {
            if let Err(error) = rescan_case(ctx, case, summary) {
                error!(case = %case.case_name, error = %format!("{error:#}"), "case rescan failed");
                summary
                    .errors
                    .push(format!("case {}: {error:#}", case.case_name));
            }
        }

        for case in ctx.store.get_all_cases(&CaseFilters::default())? {
            if case.atm_in_namelist.is_some() {
                continue;
            }
            let Some(case_dir) = case.case_directory.as_deref() else {
                continue;
            };
            attach_namelist(ctx, case.id, &case.case_name, Path::new(case_dir), summary);
        }
        Ok(())
    })
}

/// Opens an update_log row, runs `body` and always closes the row. A failure
/// inside `body` is recorded as a run error rather than returned.
fn run_logged<F, B>(ctx: &mut PipelineContext<F>, update_type: &str, body: B) -> Result<RunSummary>
where
    F: PageFetcher,
    B: FnOnce(&mut PipelineContext<F>, &mut RunSummary) -> Result<()>,
{
    let cleaned = ctx.store.cleanup_case_directories()?;
    debug!(cleaned, "checked stored case directories");

    let log_id = ctx.store.log_update(update_type)?;
    let mut summary = RunSummary::new(update_type);
    if let Err(error) = body(ctx, &mut summary) {
        error!(update_type, error = %format!("{error:#}"), "run aborted");
        summary.errors.push(format!("run: {error:#}"));
    }

    let status = ctx
        .store
        .complete_update_log(log_id, &summary.counts(), &summary.errors)?;
    summary.status = status.to_string();
    info!(
        update_type,
        issues = summary.issues_processed,
        cases_created = summary.cases_created,
        diagnostics = summary.diagnostics_found,
        statistics = summary.statistics_extracted,
        errors = summary.errors.len(),
        status,
        "run finished"
    );
    Ok(summary)
}

fn process_issues<F: PageFetcher>(
    ctx: &mut PipelineContext<F>,
    issues: &[IssueRecord],
    summary: &mut RunSummary,
) {
    for issue in issues {
        match process_issue(ctx, issue, summary) {
            Ok(()) => summary.issues_processed += 1,
            Err(error) => {
                error!(issue = issue.number, error = %format!("{error:#}"), "failed to process issue");
                summary
                    .errors
                    .push(format!("issue #{}: {error:#}", issue.number));
            }
        }
    }
}

fn process_issue<F: PageFetcher>(
    ctx: &mut PipelineContext<F>,
    issue: &IssueRecord,
    summary: &mut RunSummary,
) -> Result<()> {
    let parsed = ctx.parser.parse(issue.number, &issue.title, &issue.body);
    for warning in &parsed.warnings {
        debug!(issue = issue.number, warning = %warning, "issue parse warning");
    }
    let issue_id = ctx.store.upsert_issue(issue, parsed.case_name.as_deref())?;

    let Some(identity) = parsed.identity.as_ref() else {
        debug!(issue = issue.number, "issue names no case");
        return Ok(());
    };

    let case_directory = parsed
        .case_directory
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| ctx.resolver.default_case_directory(&identity.case_name));
    let diagnostic_urls = parsed.diagnostic_urls.iter().cloned().collect::<Vec<_>>();

    let mut upsert = CaseUpsert::from_identity(identity);
    upsert.issue_id = Some(issue_id);
    upsert.purpose = parsed.purpose.clone();
    upsert.description = parsed.description.clone();
    upsert.case_directory = case_directory
        .as_deref()
        .map(|path| path.to_string_lossy().into_owned());
    upsert.diagnostics_url = diagnostic_urls.first().cloned();
    if !parsed.contacts.is_empty() {
        upsert.contacts = Some(parsed.contacts.iter().cloned().collect());
    }
    let case = ctx.store.upsert_case(&upsert)?;
    summary.cases_updated += 1;
    if case.created {
        summary.cases_created += 1;
    }

    let path_hints = parsed
        .diagnostics_paths
        .iter()
        .map(PathBuf::from)
        .collect::<Vec<_>>();
    if let Some(resolved) = resolve_diagnostics(
        ctx,
        identity,
        case_directory.as_deref(),
        &path_hints,
        &diagnostic_urls,
    )? {
        store_diagnostics(ctx, case.id, &identity.case_name, resolved, summary)?;
    }

    if let Some(case_dir) = case_directory.as_deref() {
        attach_namelist(ctx, case.id, &identity.case_name, case_dir, summary);
    }
    Ok(())
}

fn rescan_case<F: PageFetcher>(
    ctx: &mut PipelineContext<F>,
    case: &CaseRecord,
    summary: &mut RunSummary,
) -> Result<()> {
    let identity = parse_case_name(&case.case_name);
    let body = match case.issue_id {
        Some(issue_id) => ctx.store.issue_body(issue_id)?,
        None => None,
    };
    let parsed = body
        .as_deref()
        .map(|body| ctx.parser.parse(0, &case.case_name, body));

    let case_directory = case
        .case_directory
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| ctx.resolver.default_case_directory(&case.case_name));
    let path_hints: Vec<PathBuf> = parsed
        .as_ref()
        .map(|parsed| parsed.diagnostics_paths.iter().map(PathBuf::from).collect())
        .unwrap_or_default();
    let candidate_urls: Vec<String> = match &case.diagnostics_url {
        Some(url) => vec![url.clone()],
        None => parsed
            .as_ref()
            .map(|parsed| parsed.diagnostic_urls.iter().cloned().collect())
            .unwrap_or_default(),
    };

    summary.cases_updated += 1;
    if let Some(resolved) = resolve_diagnostics(
        ctx,
        &identity,
        case_directory.as_deref(),
        &path_hints,
        &candidate_urls,
    )? {
        store_diagnostics(ctx, case.id, &case.case_name, resolved, summary)?;
    }
    Ok(())
}

/// Local strategies first, then the remote candidates.
fn resolve_diagnostics<F: PageFetcher>(
    ctx: &mut PipelineContext<F>,
    identity: &CaseIdentity,
    case_directory: Option<&Path>,
    path_hints: &[PathBuf],
    candidate_urls: &[String],
) -> Result<Option<ResolvedDiagnostics>> {
    if let Some(location) = ctx.resolver.resolve(identity, case_directory, path_hints) {
        let dir = PathBuf::from(&location.path_or_url);
        let records = extract(StatisticsSource::Directory(&dir), None)?;
        return Ok(Some(ResolvedDiagnostics {
            year_range: directory_year_range(&dir).map(|period| period.label()),
            location,
            records,
        }));
    }

    if candidate_urls.is_empty() {
        debug!(case = %identity.case_name, "no local diagnostics and no urls to try");
        return Ok(None);
    }
    let Some(remote) = ctx.remote.resolve(candidate_urls, &identity.case_name) else {
        debug!(case = %identity.case_name, "no diagnostics found locally or remotely");
        return Ok(None);
    };
    let records = extract(StatisticsSource::RemoteTables(&remote.tables), None)?;
    let year_range = remote
        .tables
        .iter()
        .find_map(|table| year_range_in_path(Path::new(&table.source_url)))
        .map(|period| period.label());
    Ok(Some(ResolvedDiagnostics {
        location: remote.location,
        records,
        year_range,
    }))
}

fn store_diagnostics<F: PageFetcher>(
    ctx: &mut PipelineContext<F>,
    case_id: i64,
    case_name: &str,
    resolved: ResolvedDiagnostics,
    summary: &mut RunSummary,
) -> Result<()> {
    let diagnostic_id = ctx.store.upsert_diagnostic(case_id, &resolved.location)?;
    let inserted = ctx
        .store
        .replace_statistics(diagnostic_id, &resolved.records)?;

    let mut update = CaseUpsert {
        case_name: case_name.to_string(),
        has_diagnostics: Some(true),
        year_range: resolved.year_range,
        ..CaseUpsert::default()
    };
    match resolved.location.kind {
        SourceKind::Filesystem => {
            update.diagnostics_directory = Some(resolved.location.path_or_url.clone());
        }
        SourceKind::Web => {
            update.diagnostics_url = Some(resolved.location.path_or_url.clone());
        }
    }
    ctx.store.upsert_case(&update)?;

    summary.diagnostics_found += 1;
    summary.statistics_extracted += inserted;
    info!(
        case = case_name,
        source = resolved.location.kind.as_str(),
        path = %resolved.location.path_or_url,
        statistics = inserted,
        "stored diagnostics"
    );
    Ok(())
}

/// Store `<case_dir>/CaseDocs/atm_in` when present. Failures are reported in the
/// run summary and never abort the case.
fn attach_namelist<F: PageFetcher>(
    ctx: &mut PipelineContext<F>,
    case_id: i64,
    case_name: &str,
    case_dir: &Path,
    summary: &mut RunSummary,
) {
    let path = case_namelist_path(case_dir);
    if !path.is_file() {
        return;
    }
    let result = read_namelist_file(&path)
        .and_then(|namelist| serde_json::to_value(namelist).context("failed to encode namelist"))
        .and_then(|value| {
            ctx.store
                .update_case_namelist(case_id, &value, &path.to_string_lossy())
        });
    match result {
        Ok(()) => summary.namelists_added += 1,
        Err(error) => {
            warn!(case = case_name, path = %path.display(), error = %format!("{error:#}"), "failed to attach namelist");
            summary
                .errors
                .push(format!("case {case_name}: namelist: {error:#}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use anyhow::bail;
    use chrono::DateTime;
    use reqwest::Url;
    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::remote::FetchedPage;
    use crate::store::{STATUS_COMPLETED, STATUS_COMPLETED_WITH_ERRORS};

    const CASE: &str = "b.e30_alpha08b.B1850C_LTso.ne30_t232_wgx3.308";
    const WEB_CASE: &str = "b.e30_alpha08b.B1850C_LTso.ne30_t232_wgx3.309";
    const HOST: &str = "https://webext.cgd.ucar.edu";
    const SINGLE_CSV: &str = "variable,unit,mean,sample size,standard dev.,standard error,95% CI,trend,trend p-value\nTS,K,288.5,30,1.2,0.3,0.1,,\n";
    const TABLE_HTML: &str = "<table><tr><th>variable</th><th>unit</th><th>test</th><th>control</th><th>diff</th></tr><tr><td>PRECT</td><td>mm/day</td><td>2.1</td><td>1.9</td><td>0.2</td></tr></table>";

    #[derive(Default)]
    struct MockFetcher {
        pages: BTreeMap<String, String>,
        requested: Vec<String>,
    }

    impl PageFetcher for MockFetcher {
        fn fetch(&mut self, url: &Url) -> anyhow::Result<FetchedPage> {
            self.requested.push(url.to_string());
            let (status, body) = match self.pages.get(url.as_str()) {
                Some(body) => (200, body.clone()),
                None => (404, String::new()),
            };
            Ok(FetchedPage {
                url: url.clone(),
                status,
                body,
                last_modified: None,
            })
        }

        fn request_count(&self) -> usize {
            self.requested.len()
        }
    }

    struct MockSource {
        issues: Vec<IssueRecord>,
        fail: bool,
        requests: usize,
    }

    impl IssueSource for MockSource {
        fn fetch_all_issues(&mut self, _state: IssueState) -> anyhow::Result<Vec<IssueRecord>> {
            self.requests += 1;
            if self.fail {
                bail!("github unavailable");
            }
            Ok(self.issues.clone())
        }

        fn fetch_updated_issues(
            &mut self,
            _since: DateTime<Utc>,
        ) -> anyhow::Result<Vec<IssueRecord>> {
            self.fetch_all_issues(IssueState::All)
        }

        fn request_count(&self) -> usize {
            self.requests
        }
    }

    fn issue(number: u64, title: &str, body: &str) -> IssueRecord {
        IssueRecord {
            number,
            title: title.to_string(),
            body: body.to_string(),
            state: "open".to_string(),
            created_at: None,
            updated_at: None,
            closed_at: None,
            author: Some("hannay".to_string()),
            labels: Vec::new(),
            html_url: None,
        }
    }

    struct Fixture {
        temp: TempDir,
        ctx: PipelineContext<MockFetcher>,
    }

    fn fixture(fetcher: MockFetcher) -> Fixture {
        let temp = tempdir().expect("tempdir");
        let adf = temp.path().join("adf");
        let runs = temp.path().join("runs");
        fs::create_dir_all(&adf).expect("adf base");
        fs::create_dir_all(&runs).expect("runs base");

        let store = Store::open(&temp.path().join("statboard.db")).expect("store");
        let root = format!("{}/", temp.path().display());
        let ctx = PipelineContext::new(
            store,
            IssueParser::new(&[root], &["webext.cgd.ucar.edu".to_string()]),
            DiagnosticsResolver::new(ResolverRoots {
                adf_output_bases: vec![adf],
                case_runs_base: Some(runs),
                ..ResolverRoots::default()
            }),
            RemoteResolver::new(
                fetcher,
                HostAllowList::new(&["webext.cgd.ucar.edu".to_string()]),
                4,
            ),
        );
        Fixture { temp, ctx }
    }

    fn write_adf_table(fixture: &Fixture, case: &str) {
        let dir = fixture
            .temp
            .path()
            .join("adf")
            .join(case)
            .join(format!("{case}_1995_2004_vs_obs"));
        fs::create_dir_all(&dir).expect("adf case dir");
        fs::write(dir.join(format!("amwg_table_{case}.csv")), SINGLE_CSV).expect("table");
    }

    fn source(issues: Vec<IssueRecord>) -> MockSource {
        MockSource {
            issues,
            fail: false,
            requests: 0,
        }
    }

    #[test]
    fn collect_stores_cases_and_local_statistics() {
        let mut fixture = fixture(MockFetcher::default());
        write_adf_table(&fixture, CASE);
        let mut source = source(vec![issue(
            308,
            CASE,
            "**Purpose:**\nTuning run\n\ncc @hannay",
        )]);

        let summary =
            collect(&mut fixture.ctx, &mut source, CollectMode::Full).expect("collect");
        assert_eq!(summary.issues_processed, 1);
        assert_eq!(summary.cases_created, 1);
        assert_eq!(summary.diagnostics_found, 1);
        assert_eq!(summary.statistics_extracted, 4);
        assert_eq!(summary.status, STATUS_COMPLETED);
        assert_eq!(fixture.ctx.remote.fetcher().request_count(), 0);

        let case = fixture
            .ctx
            .store
            .get_case_by_name(CASE)
            .expect("load")
            .expect("case");
        assert!(case.has_diagnostics);
        assert_eq!(case.purpose.as_deref(), Some("Tuning run"));
        assert_eq!(case.contacts, vec!["hannay"]);
        assert_eq!(case.year_range.as_deref(), Some("yrs_1995_2004"));
        assert_eq!(case.issue_number, Some(308));
    }

    #[test]
    fn rerunning_collect_does_not_duplicate_statistics() {
        let mut fixture = fixture(MockFetcher::default());
        write_adf_table(&fixture, CASE);
        let mut source = source(vec![issue(308, CASE, "")]);

        collect(&mut fixture.ctx, &mut source, CollectMode::Full).expect("first");
        let second = collect(&mut fixture.ctx, &mut source, CollectMode::Full).expect("second");
        assert_eq!(second.cases_created, 0);
        assert_eq!(fixture.ctx.store.table_counts().expect("counts").statistics, 4);
    }

    #[test]
    fn remote_fallback_uses_issue_urls() {
        let table_url = format!("{HOST}/adf/{WEB_CASE}/amwg_table_{WEB_CASE}.html");
        let mut fetcher = MockFetcher::default();
        fetcher.pages.insert(table_url.clone(), TABLE_HTML.to_string());
        let mut fixture = fixture(fetcher);
        let mut source = source(vec![issue(
            309,
            WEB_CASE,
            &format!("**Diagnostics:**\n{table_url}\n"),
        )]);

        let summary =
            collect(&mut fixture.ctx, &mut source, CollectMode::Full).expect("collect");
        assert_eq!(summary.diagnostics_found, 1);
        assert_eq!(summary.statistics_extracted, 2);

        let case = fixture
            .ctx
            .store
            .get_case_by_name(WEB_CASE)
            .expect("load")
            .expect("case");
        assert!(case.has_diagnostics);
        assert_eq!(case.diagnostics_url.as_deref(), Some(table_url.as_str()));
        let stats = fixture.ctx.store.get_case_statistics(case.id).expect("stats");
        assert_eq!(stats["ANN"]["PRECT"].metrics["bias"], 0.2);
    }

    #[test]
    fn missing_remote_page_is_not_an_error() {
        let mut fixture = fixture(MockFetcher::default());
        let mut source = source(vec![issue(
            309,
            WEB_CASE,
            &format!("{HOST}/adf/{WEB_CASE}/"),
        )]);

        let summary =
            collect(&mut fixture.ctx, &mut source, CollectMode::Full).expect("collect");
        assert_eq!(summary.diagnostics_found, 0);
        assert!(summary.errors.is_empty());
        assert_eq!(summary.status, STATUS_COMPLETED);
    }

    #[test]
    fn test_mode_limits_issue_count() {
        let mut fixture = fixture(MockFetcher::default());
        let issues = (1..=5)
            .map(|n| issue(n, &format!("b.e30_x.B1850.ne30_g17.{n:03}"), ""))
            .collect();
        let mut source = source(issues);

        let summary =
            collect(&mut fixture.ctx, &mut source, CollectMode::Test(2)).expect("collect");
        assert_eq!(summary.issues_processed, 2);
        assert_eq!(summary.update_type, "test");
        assert_eq!(fixture.ctx.store.table_counts().expect("counts").cases, 2);
    }

    #[test]
    fn fetch_failure_still_closes_the_run() {
        let mut fixture = fixture(MockFetcher::default());
        let mut source = MockSource {
            issues: Vec::new(),
            fail: true,
            requests: 0,
        };

        let summary =
            update_incremental(&mut fixture.ctx, &mut source, 7).expect("update");
        assert_eq!(summary.status, STATUS_COMPLETED_WITH_ERRORS);
        assert!(summary.errors[0].contains("github unavailable"));
        let latest = fixture
            .ctx
            .store
            .latest_update()
            .expect("latest")
            .expect("entry");
        assert_eq!(latest.update_type, "incremental");
        assert_eq!(latest.status, STATUS_COMPLETED_WITH_ERRORS);
    }

    #[test]
    fn update_diagnostics_picks_up_late_output_and_namelists() {
        let mut fixture = fixture(MockFetcher::default());
        let case_dir = fixture.temp.path().join("runs").join(CASE);
        fs::create_dir_all(case_dir.join("CaseDocs")).expect("case docs");
        let mut source = source(vec![issue(308, CASE, "")]);

        let first = collect(&mut fixture.ctx, &mut source, CollectMode::Full).expect("collect");
        assert_eq!(first.diagnostics_found, 0);
        assert_eq!(first.namelists_added, 0);

        write_adf_table(&fixture, CASE);
        fs::write(
            case_dir.join("CaseDocs").join("atm_in"),
            "&phys_ctl_nl\n deep_scheme = 'ZM'\n/\n",
        )
        .expect("atm_in");

        let rescan = update_diagnostics(&mut fixture.ctx).expect("rescan");
        assert_eq!(rescan.diagnostics_found, 1);
        assert_eq!(rescan.namelists_added, 1);

        let case = fixture
            .ctx
            .store
            .get_case_by_name(CASE)
            .expect("load")
            .expect("case");
        assert!(case.has_diagnostics);
        assert_eq!(
            case.atm_in_namelist.expect("namelist")["phys_ctl_nl"]["deep_scheme"],
            "ZM"
        );

        let again = update_diagnostics(&mut fixture.ctx).expect("rescan");
        assert_eq!(again.cases_updated, 0);
        assert_eq!(again.namelists_added, 0);
    }
}
