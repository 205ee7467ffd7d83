use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_REPO_OWNER: &str = "NCAR";
pub const DEFAULT_REPO_NAME: &str = "cesm_dev";
pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_GITHUB_USER_AGENT: &str = "statboard/0.1";
pub const DEFAULT_WEB_USER_AGENT: &str = "cesm-dev-statboard/1.0 (diagnostics collector)";
pub const DEFAULT_CESM_RUNS_BASE: &str = "/glade/campaign/cesm/cesmdata/cseg/runs/cesm2_0";
pub const DEFAULT_AMWG_CLIMO_BASE: &str = "/glade/campaign/cgd/amp/amwg/climo";
pub const DEFAULT_SCRATCH_BASE: &str = "/glade/scratch";
pub const DEFAULT_ADF_OUTPUT_BASE: &str = "/glade/derecho/scratch/hannay/ADF";
pub const DEFAULT_ADF_DISCOVERY_PATTERN: &str = "/glade/derecho/scratch/*/ADF";
pub const DEFAULT_PATH_ROOT: &str = "/glade/";
pub const DEFAULT_DIAGNOSTICS_HOST: &str = "webext.cgd.ucar.edu";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BoardConfig {
    #[serde(default)]
    pub github: GithubSection,
    #[serde(default)]
    pub filesystem: FilesystemSection,
    #[serde(default)]
    pub web: WebSection,
    #[serde(default)]
    pub collection: CollectionSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubSection {
    pub repo_owner: String,
    pub repo_name: String,
    pub api_base: String,
    pub user_agent: String,
    pub token: Option<String>,
}

impl Default for GithubSection {
    fn default() -> Self {
        Self {
            repo_owner: DEFAULT_REPO_OWNER.to_string(),
            repo_name: DEFAULT_REPO_NAME.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            user_agent: DEFAULT_GITHUB_USER_AGENT.to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct FilesystemSection {
    pub cesm_runs_base: String,
    pub amwg_climo_base: String,
    pub scratch_base: String,
    pub adf_output_bases: Vec<String>,
    pub adf_discovery_pattern: String,
    pub path_roots: Vec<String>,
}

impl Default for FilesystemSection {
    fn default() -> Self {
        Self {
            cesm_runs_base: DEFAULT_CESM_RUNS_BASE.to_string(),
            amwg_climo_base: DEFAULT_AMWG_CLIMO_BASE.to_string(),
            scratch_base: DEFAULT_SCRATCH_BASE.to_string(),
            adf_output_bases: vec![DEFAULT_ADF_OUTPUT_BASE.to_string()],
            adf_discovery_pattern: DEFAULT_ADF_DISCOVERY_PATTERN.to_string(),
            path_roots: vec![DEFAULT_PATH_ROOT.to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct WebSection {
    pub allowed_hosts: Vec<String>,
    pub request_delay_ms: u64,
    pub timeout_ms: u64,
    pub max_depth: usize,
    pub user_agent: String,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            allowed_hosts: vec![DEFAULT_DIAGNOSTICS_HOST.to_string()],
            request_delay_ms: 500,
            timeout_ms: 30_000,
            max_depth: 4,
            user_agent: DEFAULT_WEB_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CollectionSection {
    pub test_limit: usize,
    pub incremental_days: u32,
}

impl Default for CollectionSection {
    fn default() -> Self {
        Self {
            test_limit: 10,
            incremental_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl BoardConfig {
    /// GitHub token: env GITHUB_TOKEN > config. Collection runs unauthenticated without one.
    pub fn github_token(&self) -> Option<String> {
        env_override("GITHUB_TOKEN").or_else(|| {
            self.github
                .token
                .as_deref()
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(ToString::to_string)
        })
    }

    pub fn repo_owner(&self) -> String {
        env_override("GITHUB_REPO_OWNER").unwrap_or_else(|| self.github.repo_owner.clone())
    }

    pub fn repo_name(&self) -> String {
        env_override("GITHUB_REPO_NAME").unwrap_or_else(|| self.github.repo_name.clone())
    }

    pub fn cesm_runs_base(&self) -> PathBuf {
        env_override("CESM_RUNS_BASE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&self.filesystem.cesm_runs_base))
    }

    pub fn amwg_climo_base(&self) -> PathBuf {
        env_override("AMWG_CLIMO_BASE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&self.filesystem.amwg_climo_base))
    }

    pub fn scratch_base(&self) -> PathBuf {
        env_override("SCRATCH_BASE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&self.filesystem.scratch_base))
    }

    /// ADF bases in search order. ADF_OUTPUT_BASES is colon-separated.
    pub fn adf_output_bases(&self) -> Vec<PathBuf> {
        match env_override("ADF_OUTPUT_BASES") {
            Some(value) => split_path_list(&value),
            None => self
                .filesystem
                .adf_output_bases
                .iter()
                .map(PathBuf::from)
                .collect(),
        }
    }

    pub fn log_level(&self) -> String {
        env_override("STATBOARD_LOG_LEVEL").unwrap_or_else(|| self.logging.level.clone())
    }

    pub fn web_user_agent(&self) -> String {
        let configured = self.web.user_agent.trim();
        if configured.is_empty() {
            DEFAULT_WEB_USER_AGENT.to_string()
        } else {
            configured.to_string()
        }
    }
}

/// Load a BoardConfig from TOML. A missing file yields defaults.
pub fn load_config(config_path: &Path) -> Result<BoardConfig> {
    if !config_path.exists() {
        return Ok(BoardConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: BoardConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn split_path_list(value: &str) -> Vec<PathBuf> {
    value
        .split(':')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect()
}

pub(crate) fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_point_at_cesm_dev_and_glade() {
        let config = BoardConfig::default();
        assert_eq!(config.github.repo_owner, "NCAR");
        assert_eq!(config.github.repo_name, "cesm_dev");
        assert_eq!(config.web.allowed_hosts, vec!["webext.cgd.ucar.edu"]);
        assert_eq!(config.web.max_depth, 4);
        assert_eq!(config.collection.test_limit, 10);
        assert_eq!(config.filesystem.path_roots, vec!["/glade/"]);
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, BoardConfig::default());
    }

    #[test]
    fn load_config_fills_missing_keys_with_defaults() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[filesystem]
adf_output_bases = ["/tmp/adf-a", "/tmp/adf-b"]

[web]
request_delay_ms = 0
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.filesystem.adf_output_bases, vec!["/tmp/adf-a", "/tmp/adf-b"]);
        assert_eq!(config.filesystem.scratch_base, DEFAULT_SCRATCH_BASE);
        assert_eq!(config.web.request_delay_ms, 0);
        assert_eq!(config.web.timeout_ms, 30_000);
        assert_eq!(config.github.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[github\nrepo_owner = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn path_lists_split_on_colons() {
        assert_eq!(
            split_path_list("/a/ADF: /b/ADF ::"),
            vec![PathBuf::from("/a/ADF"), PathBuf::from("/b/ADF")]
        );
    }

    #[test]
    fn blank_web_user_agent_falls_back() {
        let mut config = BoardConfig::default();
        config.web.user_agent = "  ".to_string();
        assert_eq!(config.web_user_agent(), DEFAULT_WEB_USER_AGENT);
    }

    #[test]
    fn configured_token_is_trimmed() {
        let mut config = BoardConfig::default();
        config.github.token = Some("   ".to_string());
        if env::var("GITHUB_TOKEN").is_err() {
            assert_eq!(config.github_token(), None);
        }
    }
}
