use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, LINK, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{BoardConfig, env_value_u64, env_value_usize};

const PER_PAGE: &str = "100";
const LOW_RATE_LIMIT_THRESHOLD: u64 = 5;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueState {
    Open,
    Closed,
    All,
}

impl IssueState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueRecord {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub state: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub labels: Vec<String>,
    pub html_url: Option<String>,
}

/// Where issues come from. The pipeline only ever talks to this seam.
pub trait IssueSource {
    fn fetch_all_issues(&mut self, state: IssueState) -> Result<Vec<IssueRecord>>;
    fn fetch_updated_issues(&mut self, since: DateTime<Utc>) -> Result<Vec<IssueRecord>>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct GithubClientConfig {
    pub api_base: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub user_agent: String,
    pub token: Option<String>,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl GithubClientConfig {
    pub fn from_config(config: &BoardConfig) -> Self {
        Self {
            api_base: config.github.api_base.trim_end_matches('/').to_string(),
            repo_owner: config.repo_owner(),
            repo_name: config.repo_name(),
            user_agent: config.github.user_agent.clone(),
            token: config.github_token(),
            timeout_ms: env_value_u64("STATBOARD_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: env_value_u64("STATBOARD_GITHUB_RATE_LIMIT_MS", 250),
            max_retries: env_value_usize("STATBOARD_HTTP_RETRIES", 3),
            retry_delay_ms: env_value_u64("STATBOARD_HTTP_RETRY_DELAY_MS", 1_000),
        }
    }

    pub fn issues_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/issues",
            self.api_base, self.repo_owner, self.repo_name
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_unix: Option<u64>,
}

pub struct GithubClient {
    client: Client,
    config: GithubClientConfig,
    last_request_at: Option<Instant>,
    rate_limit: RateLimitSnapshot,
    request_count: usize,
}

impl GithubClient {
    pub fn new(config: GithubClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build GitHub HTTP client")?;
        Ok(Self {
            client,
            config,
            last_request_at: None,
            rate_limit: RateLimitSnapshot::default(),
            request_count: 0,
        })
    }

    pub fn rate_limit(&self) -> RateLimitSnapshot {
        self.rate_limit
    }

    fn fetch_issue_pages(&mut self, params: Vec<(&'static str, String)>) -> Result<Vec<IssueRecord>> {
        let mut next_url = Some(
            Url::parse_with_params(&self.config.issues_url(), &params)
                .with_context(|| format!("invalid GitHub issues URL: {}", self.config.issues_url()))?,
        );
        let mut issues = Vec::new();
        let mut page = 1usize;

        while let Some(url) = next_url.take() {
            let response = self.request_page(&url)?;
            next_url = next_page_link(response.headers());
            let payload: Vec<GithubIssue> = response
                .json()
                .with_context(|| format!("failed to decode GitHub issues page {page}"))?;
            if payload.is_empty() {
                break;
            }
            let records = issue_records(payload);
            info!(page, fetched = records.len(), total = issues.len() + records.len(), "fetched issue page");
            issues.extend(records);
            page += 1;
        }
        Ok(issues)
    }

    fn request_page(&mut self, url: &Url) -> Result<Response> {
        for attempt in 0..=self.config.max_retries {
            self.wait_for_rate_limit_reset();
            self.apply_rate_limit();
            let mut request = self
                .client
                .get(url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .header("Accept", "application/vnd.github+json");
            if let Some(token) = &self.config.token {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }

            match request.send() {
                Ok(response) => {
                    self.record_rate_limit(response.headers());
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS && attempt < self.config.max_retries {
                        let wait = retry_after_secs(response.headers());
                        warn!(wait_secs = wait, "GitHub rate limit exceeded; waiting");
                        sleep(Duration::from_secs(wait));
                        continue;
                    }
                    if attempt < self.config.max_retries && is_retryable_status(status) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    bail!("GitHub API request failed with HTTP {status}");
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        warn!(attempt = attempt + 1, error = %error, "GitHub request failed; retrying");
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call GitHub API");
                }
            }
        }

        bail!("GitHub API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_for_rate_limit_reset(&mut self) {
        let (Some(remaining), Some(reset_unix)) = (self.rate_limit.remaining, self.rate_limit.reset_unix)
        else {
            return;
        };
        if remaining >= LOW_RATE_LIMIT_THRESHOLD {
            return;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or(reset_unix);
        if reset_unix > now {
            let wait = reset_unix - now + 1;
            warn!(remaining, wait_secs = wait, "GitHub rate limit low; waiting for reset");
            sleep(Duration::from_secs(wait));
        }
        self.rate_limit.remaining = self.rate_limit.limit;
    }

    fn record_rate_limit(&mut self, headers: &HeaderMap) {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
        };
        if let Some(limit) = read("x-ratelimit-limit") {
            self.rate_limit.limit = Some(limit);
        }
        if let Some(remaining) = read("x-ratelimit-remaining") {
            self.rate_limit.remaining = Some(remaining);
        }
        if let Some(reset) = read("x-ratelimit-reset") {
            self.rate_limit.reset_unix = Some(reset);
        }
        debug!(
            remaining = ?self.rate_limit.remaining,
            limit = ?self.rate_limit.limit,
            "GitHub rate limit"
        );
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl IssueSource for GithubClient {
    fn fetch_all_issues(&mut self, state: IssueState) -> Result<Vec<IssueRecord>> {
        info!(
            state = state.as_str(),
            repo = %format!("{}/{}", self.config.repo_owner, self.config.repo_name),
            "fetching issues"
        );
        self.fetch_issue_pages(vec![
            ("state", state.as_str().to_string()),
            ("per_page", PER_PAGE.to_string()),
            ("sort", "created".to_string()),
            ("direction", "desc".to_string()),
        ])
    }

    fn fetch_updated_issues(&mut self, since: DateTime<Utc>) -> Result<Vec<IssueRecord>> {
        let since = format_since(since);
        info!(since = %since, "fetching issues updated since");
        self.fetch_issue_pages(vec![
            ("state", IssueState::All.as_str().to_string()),
            ("per_page", PER_PAGE.to_string()),
            ("sort", "updated".to_string()),
            ("direction", "desc".to_string()),
            ("since", since),
        ])
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

pub fn format_since(since: DateTime<Utc>) -> String {
    since.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// The `rel="next"` target of a GitHub `Link` header.
pub fn next_page_link(headers: &HeaderMap) -> Option<Url> {
    let header = headers.get(LINK)?.to_str().ok()?;
    parse_next_link(header)
}

pub fn parse_next_link(header: &str) -> Option<Url> {
    header.split(',').find_map(|part| {
        let (target, rest) = part.split_once(';')?;
        let is_next = rest
            .split(';')
            .any(|param| param.trim().replace(' ', "") == "rel=\"next\"");
        if !is_next {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(target).ok()
    })
}

fn retry_after_secs(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

pub(crate) fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Drops pull requests, which the issues endpoint also returns.
pub fn issue_records(payload: Vec<GithubIssue>) -> Vec<IssueRecord> {
    payload
        .into_iter()
        .filter(|issue| issue.pull_request.is_none())
        .map(GithubIssue::into_record)
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct GithubIssue {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    user: Option<GithubUser>,
    #[serde(default)]
    labels: Vec<GithubLabel>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GithubLabel {
    name: String,
}

impl GithubIssue {
    fn into_record(self) -> IssueRecord {
        IssueRecord {
            number: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            state: self.state,
            created_at: self.created_at,
            updated_at: self.updated_at,
            closed_at: self.closed_at,
            author: self.user.map(|user| user.login),
            labels: self.labels.into_iter().map(|label| label.name).collect(),
            html_url: self.html_url,
        }
    }
}
