use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::case_name::CaseIdentity;
use crate::config::BoardConfig;

pub const TABLE_EXTENSION: &str = "csv";

const CASE_SUBDIRECTORIES: &[&str] = &["diagnostics", "diag", "postprocess"];
const DIAGNOSTIC_HINT_KEYWORDS: &[&str] = &["diagnostic", "amwg", "climo", "postprocess", "diag"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Filesystem,
    Web,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Web => "web",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticsLocation {
    pub path_or_url: String,
    pub exists: bool,
    pub kind: SourceKind,
    pub file_or_table_count: usize,
    pub last_modified: Option<DateTime<Utc>>,
}

impl DiagnosticsLocation {
    pub fn missing(path_or_url: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            path_or_url: path_or_url.into(),
            exists: false,
            kind,
            file_or_table_count: 0,
            last_modified: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolutionStrategy {
    AdfOutputBase,
    ClimatologyBase,
    CaseSubdirectory,
    IssuePath,
    GlobPattern,
}

impl ResolutionStrategy {
    pub const ORDERED: [Self; 5] = [
        Self::AdfOutputBase,
        Self::ClimatologyBase,
        Self::CaseSubdirectory,
        Self::IssuePath,
        Self::GlobPattern,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AdfOutputBase => "adf_output_base",
            Self::ClimatologyBase => "climatology_base",
            Self::CaseSubdirectory => "case_subdirectory",
            Self::IssuePath => "issue_path",
            Self::GlobPattern => "glob_pattern",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverRoots {
    pub adf_output_bases: Vec<PathBuf>,
    pub climo_base: Option<PathBuf>,
    pub scratch_base: Option<PathBuf>,
    pub case_runs_base: Option<PathBuf>,
}

impl ResolverRoots {
    pub fn from_config(config: &BoardConfig) -> Self {
        Self {
            adf_output_bases: config.adf_output_bases(),
            climo_base: Some(config.amwg_climo_base()),
            scratch_base: Some(config.scratch_base()),
            case_runs_base: Some(config.cesm_runs_base()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedDirectory {
    pub strategy: ResolutionStrategy,
    pub path: PathBuf,
}

/// Finds where a case's diagnostics live on the local filesystem.
#[derive(Debug, Clone)]
pub struct DiagnosticsResolver {
    roots: ResolverRoots,
}

impl DiagnosticsResolver {
    pub fn new(roots: ResolverRoots) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &ResolverRoots {
        &self.roots
    }

    pub fn resolve(
        &self,
        identity: &CaseIdentity,
        case_directory_hint: Option<&Path>,
        issue_path_hints: &[PathBuf],
    ) -> Option<DiagnosticsLocation> {
        let located = self.locate(identity, case_directory_hint, issue_path_hints)?;
        let location = scan_table_directory(&located.path);
        if location.file_or_table_count == 0 {
            info!(
                case = %identity.case_name,
                strategy = located.strategy.as_str(),
                path = %location.path_or_url,
                "diagnostics directory found but holds no tables"
            );
        } else {
            info!(
                case = %identity.case_name,
                strategy = located.strategy.as_str(),
                path = %location.path_or_url,
                tables = location.file_or_table_count,
                "found diagnostics directory"
            );
        }
        Some(location)
    }

    /// Runs the strategies in priority order and stops at the first directory found.
    pub fn locate(
        &self,
        identity: &CaseIdentity,
        case_directory_hint: Option<&Path>,
        issue_path_hints: &[PathBuf],
    ) -> Option<LocatedDirectory> {
        let case_name = identity.case_name.as_str();
        if !is_safe_case_name(case_name) {
            warn!(case = case_name, "case name is not usable as a directory name");
            return None;
        }

        for strategy in ResolutionStrategy::ORDERED {
            let found = match strategy {
                ResolutionStrategy::AdfOutputBase => self.from_adf_bases(case_name),
                ResolutionStrategy::ClimatologyBase => self.from_climo_base(case_name),
                ResolutionStrategy::CaseSubdirectory => {
                    case_directory_hint.and_then(from_case_subdirectories)
                }
                ResolutionStrategy::IssuePath => from_issue_paths(issue_path_hints),
                ResolutionStrategy::GlobPattern => self.from_glob_patterns(case_name),
            };
            if let Some(path) = found {
                debug!(case = case_name, strategy = strategy.as_str(), path = %path.display(), "strategy matched");
                return Some(LocatedDirectory { strategy, path });
            }
        }
        debug!(case = case_name, "no local diagnostics strategy matched");
        None
    }

    /// `<case_runs_base>/<case>` when it exists, used when an issue names no case directory.
    pub fn default_case_directory(&self, case_name: &str) -> Option<PathBuf> {
        if !is_safe_case_name(case_name) {
            return None;
        }
        let candidate = self.roots.case_runs_base.as_ref()?.join(case_name);
        candidate.is_dir().then_some(candidate)
    }

    fn from_adf_bases(&self, case_name: &str) -> Option<PathBuf> {
        self.roots
            .adf_output_bases
            .iter()
            .map(|base| base.join(case_name))
            .find(|candidate| candidate.is_dir())
    }

    fn from_climo_base(&self, case_name: &str) -> Option<PathBuf> {
        let candidate = self.roots.climo_base.as_ref()?.join(case_name);
        candidate.is_dir().then_some(candidate)
    }

    fn from_glob_patterns(&self, case_name: &str) -> Option<PathBuf> {
        let escaped_case = glob::Pattern::escape(case_name);
        let mut patterns = Vec::new();
        if let Some(climo) = &self.roots.climo_base {
            patterns.push(format!(
                "{}/*{escaped_case}*",
                glob::Pattern::escape(&climo.to_string_lossy())
            ));
        }
        if let Some(scratch) = &self.roots.scratch_base {
            patterns.push(format!(
                "{}/*/diagnostics-output/atm/climo/{escaped_case}",
                glob::Pattern::escape(&scratch.to_string_lossy())
            ));
        }

        for pattern in patterns {
            let entries = match glob::glob(&pattern) {
                Ok(entries) => entries,
                Err(error) => {
                    warn!(pattern = %pattern, error = %error, "invalid diagnostics glob pattern");
                    continue;
                }
            };
            let mut matches = entries
                .filter_map(|entry| match entry {
                    Ok(path) => Some(path),
                    Err(error) => {
                        debug!(error = %error, "skipping unreadable glob match");
                        None
                    }
                })
                .filter(|path| path.is_dir())
                .collect::<Vec<_>>();
            matches.sort();
            if let Some(first) = matches.into_iter().next() {
                return Some(first);
            }
        }
        None
    }
}

fn from_case_subdirectories(case_directory: &Path) -> Option<PathBuf> {
    if !case_directory.is_dir() {
        return None;
    }
    CASE_SUBDIRECTORIES
        .iter()
        .map(|name| case_directory.join(name))
        .find(|candidate| candidate.is_dir())
}

fn from_issue_paths(hints: &[PathBuf]) -> Option<PathBuf> {
    hints
        .iter()
        .find(|hint| {
            let lowered = hint.to_string_lossy().to_lowercase();
            DIAGNOSTIC_HINT_KEYWORDS
                .iter()
                .any(|keyword| lowered.contains(keyword))
                && hint.exists()
        })
        .cloned()
}

/// Case names become single path components; reject anything that would escape a base.
pub fn is_safe_case_name(case_name: &str) -> bool {
    let mut components = Path::new(case_name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Walk `dir` recursively for table files. An unreadable or empty directory still
/// yields an existing location with a zero count.
pub fn scan_table_directory(dir: &Path) -> DiagnosticsLocation {
    let tables = list_table_files(dir);
    let last_modified = tables
        .iter()
        .filter_map(|path| modified_at(path))
        .max();
    DiagnosticsLocation {
        path_or_url: normalize_path(dir),
        exists: true,
        kind: SourceKind::Filesystem,
        file_or_table_count: tables.len(),
        last_modified,
    }
}

/// Table files under `dir`, sorted by path.
pub fn list_table_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(path = %dir.display(), error = %error, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|ext| ext.to_str()) == Some(TABLE_EXTENSION) {
            out.push(entry.into_path());
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseAccess {
    Readable,
    Unreadable,
    Missing,
}

impl BaseAccess {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Readable => "readable",
            Self::Unreadable => "unreadable",
            Self::Missing => "missing",
        }
    }
}

pub fn check_path_access(path: &Path) -> BaseAccess {
    if !path.exists() {
        return BaseAccess::Missing;
    }
    if path.is_dir() {
        return match fs::read_dir(path) {
            Ok(_) => BaseAccess::Readable,
            Err(_) => BaseAccess::Unreadable,
        };
    }
    match fs::File::open(path) {
        Ok(_) => BaseAccess::Readable,
        Err(_) => BaseAccess::Unreadable,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Substring,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Substring => "substring",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdfMatch {
    pub owner: Option<String>,
    pub base: String,
    pub path: String,
    pub match_kind: MatchKind,
    pub table_count: usize,
}

/// Audit variant of strategy 1: every base is checked for an exact directory
/// and for immediate subdirectories whose name contains the case name.
pub fn find_adf_diagnostics_expanded(case_name: &str, bases: &[PathBuf]) -> Vec<AdfMatch> {
    let mut matches = Vec::new();
    if !is_safe_case_name(case_name) {
        return matches;
    }

    for base in bases {
        let owner = base_owner(base);
        let exact = base.join(case_name);
        if exact.is_dir() {
            matches.push(AdfMatch {
                owner: owner.clone(),
                base: normalize_path(base),
                path: normalize_path(&exact),
                match_kind: MatchKind::Exact,
                table_count: list_table_files(&exact).len(),
            });
        }

        let entries = match fs::read_dir(base) {
            Ok(entries) => entries,
            Err(error) => {
                debug!(base = %base.display(), error = %error, "cannot list ADF base");
                continue;
            }
        };
        let mut substring_hits = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                (name != case_name && name.contains(case_name)).then(|| entry.path())
            })
            .collect::<Vec<_>>();
        substring_hits.sort();
        for path in substring_hits {
            matches.push(AdfMatch {
                owner: owner.clone(),
                base: normalize_path(base),
                table_count: list_table_files(&path).len(),
                path: normalize_path(&path),
                match_kind: MatchKind::Substring,
            });
        }
    }
    matches
}

#[derive(Debug, Clone, Serialize)]
pub struct AdfBaseStatus {
    pub base: String,
    pub owner: Option<String>,
    pub access: BaseAccess,
    pub case_directories: usize,
}

/// Expand a discovery glob such as `/glade/derecho/scratch/*/ADF` into candidate bases.
pub fn discover_adf_bases(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries =
        glob::glob(pattern).with_context(|| format!("invalid ADF discovery pattern {pattern}"))?;
    let mut bases = entries
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_dir())
        .collect::<Vec<_>>();
    bases.sort();
    Ok(bases)
}

pub fn inspect_adf_bases(bases: &[PathBuf]) -> Vec<AdfBaseStatus> {
    bases
        .iter()
        .map(|base| {
            let access = check_path_access(base);
            let case_directories = if access == BaseAccess::Readable {
                fs::read_dir(base)
                    .map(|entries| {
                        entries
                            .filter_map(|entry| entry.ok())
                            .filter(|entry| {
                                entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false)
                            })
                            .count()
                    })
                    .unwrap_or(0)
            } else {
                0
            };
            AdfBaseStatus {
                base: normalize_path(base),
                owner: base_owner(base),
                access,
                case_directories,
            }
        })
        .collect()
}

/// The directory above the base, e.g. `hannay` for `/glade/derecho/scratch/hannay/ADF`.
fn base_owner(base: &Path) -> Option<String> {
    base.parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().to_string())
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use tempfile::tempdir;

    use super::*;
    use crate::case_name::parse_case_name;

    const CASE: &str = "b.e30_alpha08b.B1850C_LTso.ne30_t232_wgx3.308";

    struct Fixture {
        _temp: tempfile::TempDir,
        root: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempdir().expect("tempdir");
            let root = temp.path().to_path_buf();
            Self { _temp: temp, root }
        }

        fn dir(&self, relative: &str) -> PathBuf {
            let path = self.root.join(relative);
            fs::create_dir_all(&path).expect("create dir");
            path
        }

        fn file(&self, relative: &str, content: &str) -> PathBuf {
            let path = self.root.join(relative);
            fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
            fs::write(&path, content).expect("write file");
            path
        }

        fn roots(&self) -> ResolverRoots {
            ResolverRoots {
                adf_output_bases: vec![self.root.join("adf_a"), self.root.join("adf_b")],
                climo_base: Some(self.root.join("climo")),
                scratch_base: Some(self.root.join("scratch")),
                case_runs_base: Some(self.root.join("runs")),
            }
        }
    }

    fn locate(fixture: &Fixture, hint: Option<&Path>, paths: &[PathBuf]) -> Option<LocatedDirectory> {
        DiagnosticsResolver::new(fixture.roots()).locate(&parse_case_name(CASE), hint, paths)
    }

    #[test]
    fn adf_base_wins_over_climatology_base() {
        let fixture = Fixture::new();
        fixture.file(&format!("climo/{CASE}/table.csv"), "variable\n");
        fixture.dir(&format!("adf_b/{CASE}"));

        let located = locate(&fixture, None, &[]).expect("located");
        assert_eq!(located.strategy, ResolutionStrategy::AdfOutputBase);
        assert_eq!(located.path, fixture.root.join("adf_b").join(CASE));
    }

    #[test]
    fn climatology_base_is_second() {
        let fixture = Fixture::new();
        fixture.dir(&format!("climo/{CASE}"));
        let located = locate(&fixture, None, &[]).expect("located");
        assert_eq!(located.strategy, ResolutionStrategy::ClimatologyBase);
    }

    #[test]
    fn case_subdirectories_follow_conventional_order() {
        let fixture = Fixture::new();
        let case_dir = fixture.dir("runs/mycase");
        fixture.dir("runs/mycase/postprocess");
        fixture.dir("runs/mycase/diag");

        let located = locate(&fixture, Some(&case_dir), &[]).expect("located");
        assert_eq!(located.strategy, ResolutionStrategy::CaseSubdirectory);
        assert_eq!(located.path, case_dir.join("diag"));
    }

    #[test]
    fn issue_paths_need_keyword_and_existence() {
        let fixture = Fixture::new();
        let plain = fixture.dir("work/plain_output");
        let missing = fixture.root.join("work/amwg_missing");
        let good = fixture.dir("work/amwg_tables");

        let located = locate(&fixture, None, &[plain, missing, good.clone()]).expect("located");
        assert_eq!(located.strategy, ResolutionStrategy::IssuePath);
        assert_eq!(located.path, good);
    }

    #[test]
    fn glob_patterns_are_last_resort() {
        let fixture = Fixture::new();
        let hit = fixture.dir(&format!("scratch/someone/diagnostics-output/atm/climo/{CASE}"));
        let located = locate(&fixture, None, &[]).expect("located");
        assert_eq!(located.strategy, ResolutionStrategy::GlobPattern);
        assert_eq!(located.path, hit);

        let fixture = Fixture::new();
        let prefixed = fixture.dir(&format!("climo/old_{CASE}_v2"));
        let located = locate(&fixture, None, &[]).expect("located");
        assert_eq!(located.path, prefixed);
    }

    #[test]
    fn nothing_found_is_absent() {
        let fixture = Fixture::new();
        let resolver = DiagnosticsResolver::new(fixture.roots());
        assert_eq!(resolver.resolve(&parse_case_name(CASE), None, &[]), None);
    }

    #[test]
    fn empty_directory_still_counts_as_found() {
        let fixture = Fixture::new();
        fixture.dir(&format!("adf_a/{CASE}"));
        fixture.file(&format!("climo/{CASE}/amwg_table.csv"), "variable\n");

        let resolver = DiagnosticsResolver::new(fixture.roots());
        let location = resolver
            .resolve(&parse_case_name(CASE), None, &[])
            .expect("location");
        assert!(location.exists);
        assert_eq!(location.kind, SourceKind::Filesystem);
        assert_eq!(location.file_or_table_count, 0);
        assert_eq!(location.last_modified, None);
    }

    #[test]
    fn scan_counts_nested_tables_only() {
        let fixture = Fixture::new();
        let dir = fixture.dir("diag");
        fixture.file("diag/amwg_table_case.csv", "a\n");
        fixture.file("diag/yrs_2_21/amwg_table_comp.csv", "a\n");
        fixture.file("diag/readme.txt", "notes");

        let location = scan_table_directory(&dir);
        assert!(location.exists);
        assert_eq!(location.file_or_table_count, 2);
        assert!(location.last_modified.is_some());
    }

    #[test]
    fn unsafe_case_names_are_rejected() {
        assert!(is_safe_case_name(CASE));
        assert!(!is_safe_case_name("../etc"));
        assert!(!is_safe_case_name("a/b"));
        assert!(!is_safe_case_name(""));
        assert!(!is_safe_case_name(".."));
    }

    #[test]
    fn default_case_directory_uses_runs_base() {
        let fixture = Fixture::new();
        let resolver = DiagnosticsResolver::new(fixture.roots());
        assert_eq!(resolver.default_case_directory(CASE), None);
        let dir = fixture.dir(&format!("runs/{CASE}"));
        assert_eq!(resolver.default_case_directory(CASE), Some(dir));
    }

    #[test]
    fn expanded_search_reports_every_match_with_owner() {
        let fixture = Fixture::new();
        let base_one = fixture.dir("scratch/hannay/ADF");
        let base_two = fixture.dir("scratch/islas/ADF");
        fixture.file(&format!("scratch/hannay/ADF/{CASE}/t.csv"), "a\n");
        fixture.file(&format!("scratch/islas/ADF/{CASE}_1995_2004_vs_obs/t.csv"), "a\n");
        fixture.file(&format!("scratch/islas/ADF/{CASE}_1995_2004_vs_obs/u.csv"), "a\n");
        fixture.dir("scratch/islas/ADF/unrelated");

        let matches = find_adf_diagnostics_expanded(CASE, &[base_one, base_two]);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].owner.as_deref(), Some("hannay"));
        assert_eq!(matches[0].match_kind, MatchKind::Exact);
        assert_eq!(matches[0].table_count, 1);
        assert_eq!(matches[1].owner.as_deref(), Some("islas"));
        assert_eq!(matches[1].match_kind, MatchKind::Substring);
        assert_eq!(matches[1].table_count, 2);
    }

    #[test]
    fn discovered_bases_are_inspected() {
        let fixture = Fixture::new();
        fixture.dir("scratch/alice/ADF/case_one");
        fixture.dir("scratch/bob/ADF");
        let pattern = format!("{}/scratch/*/ADF", fixture.root.display());

        let bases = discover_adf_bases(&pattern).expect("discover");
        assert_eq!(bases.len(), 2);
        let statuses = inspect_adf_bases(&bases);
        assert_eq!(statuses[0].owner.as_deref(), Some("alice"));
        assert_eq!(statuses[0].access, BaseAccess::Readable);
        assert_eq!(statuses[0].case_directories, 1);
        assert_eq!(statuses[1].case_directories, 0);
        assert_eq!(
            check_path_access(&fixture.root.join("nope")),
            BaseAccess::Missing
        );
    }
}
