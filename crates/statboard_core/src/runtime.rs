use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};

use crate::config::BoardConfig;

pub const MIGRATIONS_POLICY_MESSAGE: &str =
    "Run `statboard db migrate` to apply pending schema migrations.";

pub const STATE_DIR_NAME: &str = ".statboard";
pub const DB_FILENAME: &str = "statboard.db";

const ENV_PROJECT_ROOT: &str = "STATBOARD_PROJECT_ROOT";
const ENV_DATA_DIR: &str = "STATBOARD_DATA_DIR";
const ENV_CONFIG: &str = "STATBOARD_CONFIG";
const ENV_EXPORT_DIR: &str = "STATBOARD_EXPORT_DIR";

/// Where a resolved path came from, reported by `status` and `--diagnostics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub export_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        Ok(Self {
            cwd: env::current_dir().context("failed to read current directory")?,
            executable_dir: env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub export_dir: PathBuf,
    pub root_source: ValueSource,
    pub data_source: ValueSource,
    pub config_source: ValueSource,
    pub export_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        let rows: [(&str, &Path, Option<ValueSource>); 6] = [
            ("project_root", &self.project_root, Some(self.root_source)),
            ("state_dir", &self.state_dir, None),
            ("data_dir", &self.data_dir, Some(self.data_source)),
            ("db_path", &self.db_path, None),
            ("config_path", &self.config_path, Some(self.config_source)),
            ("export_dir", &self.export_dir, Some(self.export_source)),
        ];
        let mut out = String::new();
        for (key, path, source) in rows {
            out.push_str(key);
            out.push('=');
            out.push_str(&normalize_for_display(path));
            if let Some(source) = source {
                out.push_str(&format!(" ({})", source.as_str()));
            }
            out.push('\n');
        }
        out.push_str("policy=");
        out.push_str(MIGRATIONS_POLICY_MESSAGE);
        out
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub state_dir_exists: bool,
    pub data_dir_exists: bool,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub config_exists: bool,
    pub export_dir_exists: bool,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let db_size_bytes = match fs::metadata(&paths.db_path) {
        Ok(metadata) => Some(metadata.len()),
        Err(error) if error.kind() == ErrorKind::NotFound => None,
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to inspect {}", paths.db_path.display()));
        }
    };

    let status = RuntimeStatus {
        project_root_exists: paths.project_root.is_dir(),
        state_dir_exists: paths.state_dir.is_dir(),
        data_dir_exists: paths.data_dir.is_dir(),
        db_exists: db_size_bytes.is_some(),
        db_size_bytes,
        config_exists: paths.config_path.is_file(),
        export_dir_exists: paths.export_dir.is_dir(),
        warnings: Vec::new(),
    };
    let mut warnings = Vec::new();
    if !status.state_dir_exists {
        warnings.push(format!(
            "{STATE_DIR_NAME}/ is missing; run `statboard init` before collecting"
        ));
    }
    if !status.config_exists {
        warnings.push("config file is missing; built-in defaults are in effect".to_string());
    }
    if status.state_dir_exists && !status.db_exists {
        warnings.push(format!("database not created yet. {MIGRATIONS_POLICY_MESSAGE}"));
    }
    Ok(RuntimeStatus { warnings, ..status })
}

pub fn ensure_runtime_ready(paths: &ResolvedPaths, status: &RuntimeStatus) -> Result<()> {
    if status.state_dir_exists {
        return Ok(());
    }
    bail!(
        "Runtime layout is not initialized.\nMissing required path:\n  - {}\nRun: statboard init --project-root {}",
        normalize_for_display(&paths.state_dir),
        normalize_for_display(&paths.project_root)
    )
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

/// Flag > env > default for every path; the root falls back to an ancestor holding
/// `.statboard/` before the working directory.
fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = match choose_path(
        overrides.project_root.as_deref(),
        lookup_env(ENV_PROJECT_ROOT),
        &context.cwd,
    ) {
        Some(chosen) => chosen,
        None => (
            find_initialized_root(&context.cwd, context.executable_dir.as_deref())
                .unwrap_or_else(|| context.cwd.clone()),
            ValueSource::Heuristic,
        ),
    };
    let state_dir = project_root.join(STATE_DIR_NAME);

    let or_default = |chosen: Option<(PathBuf, ValueSource)>, default: PathBuf| {
        chosen.unwrap_or((default, ValueSource::Default))
    };
    let (data_dir, data_source) = or_default(
        choose_path(
            overrides.data_dir.as_deref(),
            lookup_env(ENV_DATA_DIR),
            &project_root,
        ),
        state_dir.join("data"),
    );
    let (config_path, config_source) = or_default(
        choose_path(
            overrides.config.as_deref(),
            lookup_env(ENV_CONFIG),
            &project_root,
        ),
        state_dir.join("config.toml"),
    );
    let (export_dir, export_source) = or_default(
        choose_path(
            overrides.export_dir.as_deref(),
            lookup_env(ENV_EXPORT_DIR),
            &project_root,
        ),
        project_root.join("web").join("data"),
    );

    Ok(ResolvedPaths {
        db_path: data_dir.join(DB_FILENAME),
        project_root,
        state_dir,
        data_dir,
        config_path,
        export_dir,
        root_source,
        data_source,
        config_source,
        export_source,
    })
}

/// Relative values are anchored at `base`. Blank env values count as unset.
fn choose_path(
    flag: Option<&Path>,
    env_value: Option<String>,
    base: &Path,
) -> Option<(PathBuf, ValueSource)> {
    let anchor = |path: &Path| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    };
    if let Some(path) = flag {
        return Some((anchor(path), ValueSource::Flag));
    }
    let value = env_value?;
    let value = value.trim();
    (!value.is_empty()).then(|| (anchor(Path::new(value)), ValueSource::Env))
}

fn find_initialized_root(cwd: &Path, executable_dir: Option<&Path>) -> Option<PathBuf> {
    cwd.ancestors()
        .chain(executable_dir.into_iter().flat_map(Path::ancestors))
        .find(|candidate| candidate.join(STATE_DIR_NAME).is_dir())
        .map(Path::to_path_buf)
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    for dir in [
        &paths.state_dir,
        &paths.data_dir,
        &paths.state_dir.join("logs"),
        &paths.export_dir,
    ] {
        if dir.is_dir() {
            continue;
        }
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        created_dirs.push(dir.clone());
    }

    let wrote_config = options.materialize_config
        && write_text_file(
            &paths.config_path,
            &render_materialized_config()?,
            options.force,
        )?;

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

const CONFIG_HEADER: &str = "\
# statboard configuration (written by `statboard init`)
#
# Environment overrides, applied over this file:
#   GITHUB_TOKEN, GITHUB_REPO_OWNER, GITHUB_REPO_NAME
#   CESM_RUNS_BASE, AMWG_CLIMO_BASE, SCRATCH_BASE
#   ADF_OUTPUT_BASES (colon-separated)
#   STATBOARD_LOG_LEVEL, RUST_LOG

";

/// The built-in defaults serialized as TOML, every key spelled out.
pub fn render_materialized_config() -> Result<String> {
    let body = toml::to_string_pretty(&BoardConfig::default())
        .context("failed to serialize default config")?;
    Ok(format!("{CONFIG_HEADER}{body}"))
}

/// Returns false without touching the file when it exists and `force` is off.
pub(crate) fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if !force && path.exists() {
        return Ok(false);
    }
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
