use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use statboard_core::case_name::parse_case_name;
use statboard_core::config::{BoardConfig, DEFAULT_LOG_LEVEL, load_config};
use statboard_core::export::export_static;
use statboard_core::github::{GithubClient, GithubClientConfig};
use statboard_core::issue::IssueParser;
use statboard_core::logging::init_tracing;
use statboard_core::migrate::{latest_version, pending_migration_count, run_migrations};
use statboard_core::pipeline::{
    CollectMode, PipelineContext, RunSummary, collect, update_diagnostics, update_incremental,
};
use statboard_core::remote::{HostAllowList, HttpFetcher, HttpFetcherConfig, RemoteResolver};
use statboard_core::resolver::{
    DiagnosticsLocation, DiagnosticsResolver, ResolverRoots, discover_adf_bases,
    find_adf_diagnostics_expanded, inspect_adf_bases,
};
use statboard_core::runtime::{
    InitOptions, MIGRATIONS_POLICY_MESSAGE, PathOverrides, ResolutionContext, ResolvedPaths,
    ensure_runtime_ready, init_layout, inspect_runtime, normalize_for_display, resolve_paths,
};
use statboard_core::stats::{StatisticsSource, extract};
use statboard_core::store::Store;
use tracing::{debug, warn};

#[derive(Debug, Parser)]
#[command(
    name = "statboard",
    version,
    about = "Collect CESM development cases and their diagnostics into a status board"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
    verbose: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
            verbose: cli.verbose,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    #[command(about = "Fetch every issue and rebuild case and diagnostics records")]
    Collect(CollectArgs),
    Update(UpdateArgs),
    #[command(about = "Write the static JSON files for the dashboard")]
    Export(ExportArgs),
    #[command(name = "parse-case", about = "Show the identity fields of a case name")]
    ParseCase(ParseCaseArgs),
    #[command(name = "parse-issue", about = "Parse an issue title and body")]
    ParseIssue(ParseIssueArgs),
    #[command(about = "Locate diagnostics for one case")]
    Resolve(ResolveArgs),
    #[command(about = "Extract statistics from a table file or directory")]
    Extract(ExtractArgs),
    Audit(AuditArgs),
    Db(DbArgs),
    Status,
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
    #[arg(long, help = "Skip writing .statboard/config.toml")]
    no_config: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Full,
    Test,
}

#[derive(Debug, Args)]
struct CollectArgs {
    #[arg(long, value_enum, default_value = "full")]
    mode: ModeArg,
    #[arg(long, value_name = "N", help = "Issue limit in test mode")]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    #[command(subcommand)]
    command: UpdateSubcommand,
}

#[derive(Debug, Subcommand)]
enum UpdateSubcommand {
    #[command(about = "Process issues updated in the last N days")]
    Incremental {
        #[arg(long, value_name = "N")]
        days: Option<u32>,
    },
    #[command(about = "Retry diagnostics for cases that have none yet")]
    Diagnostics,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ParseCaseArgs {
    name: String,
}

#[derive(Debug, Args)]
struct ParseIssueArgs {
    #[arg(long)]
    title: String,
    #[arg(long, value_name = "PATH")]
    body_file: Option<PathBuf>,
    #[arg(long, default_value_t = 0)]
    number: u64,
}

#[derive(Debug, Args)]
struct ResolveArgs {
    case: String,
    #[arg(long, value_name = "PATH")]
    case_dir: Option<PathBuf>,
    #[arg(long = "url", value_name = "URL")]
    urls: Vec<String>,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    path: PathBuf,
}

#[derive(Debug, Args)]
struct AuditArgs {
    #[command(subcommand)]
    command: AuditSubcommand,
}

#[derive(Debug, Subcommand)]
enum AuditSubcommand {
    #[command(about = "Search every ADF output base for the given cases")]
    Adf {
        #[arg(required = true)]
        cases: Vec<String>,
        #[arg(long, help = "Also search bases matched by the discovery pattern")]
        discover: bool,
    },
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Migrate,
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);
    init_logging(&runtime)?;

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Collect(args)) => run_collect(&runtime, args),
        Some(Commands::Update(UpdateArgs { command })) => match command {
            UpdateSubcommand::Incremental { days } => run_update_incremental(&runtime, days),
            UpdateSubcommand::Diagnostics => run_update_diagnostics(&runtime),
        },
        Some(Commands::Export(args)) => run_export(&runtime, args),
        Some(Commands::ParseCase(ParseCaseArgs { name })) => run_parse_case(&name),
        Some(Commands::ParseIssue(args)) => run_parse_issue(&runtime, args),
        Some(Commands::Resolve(args)) => run_resolve(&runtime, args),
        Some(Commands::Extract(ExtractArgs { path })) => run_extract(&path),
        Some(Commands::Audit(AuditArgs { command })) => match command {
            AuditSubcommand::Adf { cases, discover } => run_audit_adf(&runtime, &cases, discover),
        },
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Migrate => run_db_migrate(&runtime),
            DbSubcommand::Stats => run_db_stats(&runtime),
        },
        Some(Commands::Status) => run_status(&runtime),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(runtime: &RuntimeOptions) -> Result<()> {
    let level = resolve_runtime_paths(runtime, None)
        .and_then(|paths| load_config(&paths.config_path))
        .map(|config| config.log_level())
        .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
    init_tracing(&level, runtime.verbose)
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime, None)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;
    let migrations = run_migrations(&paths.db_path)?;

    println!("Initialized statboard runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("export_dir: {}", normalize_for_display(&paths.export_dir));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("migrations_applied: {}", migrations.applied.len());
    println!("schema_version: {}", migrations.current_version);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_collect(runtime: &RuntimeOptions, args: CollectArgs) -> Result<()> {
    let (paths, config) = ready_runtime(runtime)?;
    let mode = match args.mode {
        ModeArg::Full => CollectMode::Full,
        ModeArg::Test => CollectMode::Test(args.limit.unwrap_or(config.collection.test_limit)),
    };
    let mut ctx = pipeline_context(&paths, &config)?;
    let mut source = GithubClient::new(GithubClientConfig::from_config(&config))?;

    let summary = collect(&mut ctx, &mut source, mode)?;
    println!("collect");
    println!("repo: {}/{}", config.repo_owner(), config.repo_name());
    if let CollectMode::Test(limit) = mode {
        println!("limit: {limit}");
    }
    print_run_summary(&summary);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_update_incremental(runtime: &RuntimeOptions, days: Option<u32>) -> Result<()> {
    let (paths, config) = ready_runtime(runtime)?;
    let days = days.unwrap_or(config.collection.incremental_days);
    let mut ctx = pipeline_context(&paths, &config)?;
    let mut source = GithubClient::new(GithubClientConfig::from_config(&config))?;

    let summary = update_incremental(&mut ctx, &mut source, days)?;
    println!("update incremental");
    println!("days: {days}");
    print_run_summary(&summary);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_update_diagnostics(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = ready_runtime(runtime)?;
    let mut ctx = pipeline_context(&paths, &config)?;

    let summary = update_diagnostics(&mut ctx)?;
    println!("update diagnostics");
    print_run_summary(&summary);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_export(runtime: &RuntimeOptions, args: ExportArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime, args.output)?;
    let status = inspect_runtime(&paths)?;
    ensure_runtime_ready(&paths, &status)?;
    let store = Store::open(&paths.db_path)?;

    let report = export_static(&store, &paths.export_dir)?;
    println!("export");
    println!("export_dir: {}", normalize_for_display(&paths.export_dir));
    println!("cases: {}", report.cases);
    println!("cases_with_diagnostics: {}", report.cases_with_diagnostics);
    println!("statistics: {}", report.statistics);
    for path in &report.written {
        println!("written: {}", normalize_for_display(path));
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_parse_case(name: &str) -> Result<()> {
    let identity = parse_case_name(name);
    println!("case_name: {}", identity.case_name);
    println!("experiment_id: {}", display_option(identity.experiment_id.as_deref()));
    println!("compset: {}", display_option(identity.compset.as_deref()));
    println!("resolution: {}", display_option(identity.resolution.as_deref()));
    println!("case_number: {}", display_option(identity.case_number.as_deref()));
    println!("recognized: {}", format_flag(identity.is_recognized()));
    Ok(())
}

fn run_parse_issue(runtime: &RuntimeOptions, args: ParseIssueArgs) -> Result<()> {
    let config = load_runtime_config(runtime)?;
    let body = match &args.body_file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => String::new(),
    };
    let parser = IssueParser::new(&config.filesystem.path_roots, &config.web.allowed_hosts);
    let record = parser.parse(args.number, &args.title, &body);
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn run_resolve(runtime: &RuntimeOptions, args: ResolveArgs) -> Result<()> {
    let config = load_runtime_config(runtime)?;
    let identity = parse_case_name(&args.case);
    let resolver = DiagnosticsResolver::new(ResolverRoots::from_config(&config));
    let case_dir = args
        .case_dir
        .clone()
        .or_else(|| resolver.default_case_directory(&identity.case_name));

    println!("resolve");
    println!("case_name: {}", identity.case_name);
    println!(
        "case_directory: {}",
        case_dir
            .as_deref()
            .map(normalize_for_display)
            .unwrap_or_else(|| "<none>".to_string())
    );

    if let Some(location) = resolver.resolve(&identity, case_dir.as_deref(), &[]) {
        print_location(&location);
        let records = extract(
            StatisticsSource::Directory(Path::new(&location.path_or_url)),
            None,
        )?;
        println!("statistics: {}", records.len());
        return Ok(());
    }
    if args.urls.is_empty() {
        println!("diagnostics: <not found>");
        return Ok(());
    }

    let fetcher = HttpFetcher::new(HttpFetcherConfig::from_config(&config))?;
    let mut remote = RemoteResolver::new(
        fetcher,
        HostAllowList::new(&config.web.allowed_hosts),
        config.web.max_depth,
    );
    match remote.resolve(&args.urls, &identity.case_name) {
        Some(result) => {
            print_location(&result.location);
            let records = extract(StatisticsSource::RemoteTables(&result.tables), None)?;
            println!("statistics: {}", records.len());
        }
        None => println!("diagnostics: <not found>"),
    }
    Ok(())
}

fn run_extract(path: &Path) -> Result<()> {
    let source = if path.is_dir() {
        StatisticsSource::Directory(path)
    } else if path.is_file() {
        StatisticsSource::CsvFile(path)
    } else {
        bail!("no such file or directory: {}", path.display());
    };
    let records = extract(source, None)?;

    println!("extract");
    println!("source: {}", normalize_for_display(path));
    println!("statistics.count: {}", records.len());
    for record in &records {
        println!(
            "statistic: {} {} {}={} {}",
            record.temporal_period,
            record.variable_name,
            record.metric.as_str(),
            record.value,
            record.unit.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn run_audit_adf(runtime: &RuntimeOptions, cases: &[String], discover: bool) -> Result<()> {
    let config = load_runtime_config(runtime)?;
    let mut bases = config.adf_output_bases().into_iter().collect::<BTreeSet<_>>();
    if discover {
        let discovered = discover_adf_bases(&config.filesystem.adf_discovery_pattern)?;
        debug!(count = discovered.len(), "discovered ADF bases");
        bases.extend(discovered);
    }
    let bases = bases.into_iter().collect::<Vec<_>>();

    println!("audit adf");
    println!("bases.count: {}", bases.len());
    for status in inspect_adf_bases(&bases) {
        println!(
            "base: {} owner={} access={} case_dirs={}",
            status.base,
            status.owner.as_deref().unwrap_or("-"),
            status.access.as_str(),
            status.case_directories
        );
    }

    let mut found = 0;
    for case in cases {
        let matches = find_adf_diagnostics_expanded(case, &bases);
        if !matches.is_empty() {
            found += 1;
        }
        println!("case: {case}");
        println!("  matches: {}", matches.len());
        for hit in &matches {
            println!(
                "  - {} ({}, owner={}, tables={})",
                hit.path,
                hit.match_kind.as_str(),
                hit.owner.as_deref().unwrap_or("-"),
                hit.table_count
            );
        }
    }
    println!("coverage: {found}/{}", cases.len());
    Ok(())
}

fn run_db_migrate(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime, None)?;
    let report = run_migrations(&paths.db_path)?;

    println!("db migrate");
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    if report.applied.is_empty() {
        println!("applied: <none>");
    }
    for migration in &report.applied {
        println!("applied: v{:03}_{}", migration.version, migration.name);
    }
    println!("schema_version: {}", report.current_version);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime, None)?;
    let status = inspect_runtime(&paths)?;

    println!("db stats");
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    if status.db_exists {
        let store = Store::open(&paths.db_path)?;
        let counts = store.table_counts()?;
        println!("rows.issues: {}", counts.issues);
        println!("rows.cases: {}", counts.cases);
        println!("rows.diagnostics: {}", counts.diagnostics);
        println!("rows.statistics: {}", counts.statistics);
        println!("rows.update_log: {}", counts.update_runs);
    }
    println!("schema_latest: {}", latest_version());
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime, None)?;
    let status = inspect_runtime(&paths)?;

    println!("runtime status");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("project_root_exists: {}", format_flag(status.project_root_exists));
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("data_dir_exists: {}", format_flag(status.data_dir_exists));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("export_dir_exists: {}", format_flag(status.export_dir_exists));

    if status.db_exists {
        let pending = pending_migration_count(&paths.db_path)?;
        println!("pending_migrations: {pending}");
        if pending > 0 {
            println!("policy: {MIGRATIONS_POLICY_MESSAGE}");
        } else {
            let store = Store::open(&paths.db_path)?;
            let summary = store.get_summary_statistics()?;
            println!("cases: {}", summary.total_cases);
            println!("cases_with_diagnostics: {}", summary.cases_with_diagnostics);
            match store.latest_update()? {
                Some(entry) => {
                    println!("last_update.type: {}", entry.update_type);
                    println!("last_update.status: {}", entry.status);
                    println!(
                        "last_update.completed_at: {}",
                        entry.completed_at.as_deref().unwrap_or("-")
                    );
                    println!("last_update.errors: {}", entry.errors.len());
                }
                None => println!("last_update: <never>"),
            }
        }
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn pipeline_context(paths: &ResolvedPaths, config: &BoardConfig) -> Result<PipelineContext<HttpFetcher>> {
    let store = Store::open(&paths.db_path)?;
    let fetcher = HttpFetcher::new(HttpFetcherConfig::from_config(config))?;
    Ok(PipelineContext::from_config(store, config, fetcher))
}

fn ready_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, BoardConfig)> {
    let paths = resolve_runtime_paths(runtime, None)?;
    let status = inspect_runtime(&paths)?;
    ensure_runtime_ready(&paths, &status)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn load_runtime_config(runtime: &RuntimeOptions) -> Result<BoardConfig> {
    let paths = resolve_runtime_paths(runtime, None)?;
    load_config(&paths.config_path)
}

fn resolve_runtime_paths(
    runtime: &RuntimeOptions,
    export_dir: Option<PathBuf>,
) -> Result<ResolvedPaths> {
    if let Some(error) = env_load_problem(dotenvy::dotenv()) {
        warn!(error = %error, "ignoring unreadable .env in the working directory");
    }

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
        export_dir,
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if let Some(error) = env_load_problem(dotenvy::from_path_override(&project_env)) {
        warn!(file = %project_env.display(), error = %error, "ignoring malformed project .env");
    }

    resolve_paths(&context, &overrides)
}

/// A missing `.env` is normal; anything else is worth a warning.
fn env_load_problem<T>(result: dotenvy::Result<T>) -> Option<dotenvy::Error> {
    result.err().filter(|error| !error.not_found())
}

fn print_run_summary(summary: &RunSummary) {
    println!("update_type: {}", summary.update_type);
    println!("issues_processed: {}", summary.issues_processed);
    println!("cases_created: {}", summary.cases_created);
    println!("cases_updated: {}", summary.cases_updated);
    println!("diagnostics_found: {}", summary.diagnostics_found);
    println!("statistics_extracted: {}", summary.statistics_extracted);
    println!("namelists_added: {}", summary.namelists_added);
    println!("status: {}", summary.status);
    if summary.errors.is_empty() {
        println!("errors: <none>");
    } else {
        println!("errors: {}", summary.errors.len());
        for error in &summary.errors {
            println!("  - {error}");
        }
    }
}

fn print_location(location: &DiagnosticsLocation) {
    println!("diagnostics: {}", location.path_or_url);
    println!("source: {}", location.kind.as_str());
    println!("tables: {}", location.file_or_table_count);
    println!(
        "last_modified: {}",
        location
            .last_modified
            .map(|value| value.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
    );
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn display_option(value: Option<&str>) -> &str {
    value.unwrap_or("<none>")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::env_load_problem;

    #[test]
    fn missing_env_file_is_silent() {
        let temp = tempdir().expect("tempdir");
        let missing = temp.path().join(".env");
        assert!(env_load_problem(dotenvy::from_path(&missing)).is_none());
    }

    #[test]
    fn malformed_env_file_is_reported() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join(".env");
        fs::write(&path, "THIS IS NOT AN ASSIGNMENT\n").expect("write env");
        let error = env_load_problem(dotenvy::from_path(&path)).expect("parse problem");
        assert!(!error.not_found());
    }
}
