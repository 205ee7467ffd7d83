use std::collections::BTreeSet;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use reqwest::Url;
use reqwest::blocking::{Client, Response};
use reqwest::header::LAST_MODIFIED;
use reqwest::redirect::Policy;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::config::{BoardConfig, env_value_u64, env_value_usize};
use crate::github::{is_retryable_error, is_retryable_status};
use crate::period::{TemporalPeriod, period_from_url_path};
use crate::resolver::{DiagnosticsLocation, SourceKind};
use crate::stats::{RawTable, html_tables};

const TABLE_PAGE_PREFIX: &str = "amwg_table_";
const TABLE_PAGE_SUFFIX: &str = ".html";
const DIRECTORY_TOKENS: &[&str] = &["html_table", "atm"];
const CASE_PREFIX_CHARS: usize = 12;
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: Url,
    pub status: u16,
    pub body: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One GET per call. Non-2xx responses come back as pages; transport failures are errors.
pub trait PageFetcher {
    fn fetch(&mut self, url: &Url) -> Result<FetchedPage>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAllowList {
    hosts: BTreeSet<String>,
}

impl HostAllowList {
    pub fn new(hosts: &[String]) -> Self {
        Self {
            hosts: hosts
                .iter()
                .map(|host| host.trim().to_ascii_lowercase())
                .filter(|host| !host.is_empty())
                .collect(),
        }
    }

    pub fn permits(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && url
                .host_str()
                .map(|host| self.hosts.contains(&host.to_ascii_lowercase()))
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct RemoteTable {
    pub source_url: String,
    pub period: TemporalPeriod,
    pub table: RawTable,
}

#[derive(Debug, Clone)]
pub struct RemoteResult {
    pub location: DiagnosticsLocation,
    pub tables: Vec<RemoteTable>,
    pub source_url: String,
}

/// Walks a remote ADF output tree looking for statistics table pages.
pub struct RemoteResolver<F: PageFetcher> {
    fetcher: F,
    allow_list: HostAllowList,
    max_depth: usize,
}

impl<F: PageFetcher> RemoteResolver<F> {
    pub fn new(fetcher: F, allow_list: HostAllowList, max_depth: usize) -> Self {
        Self {
            fetcher,
            allow_list,
            max_depth,
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Try each candidate in order; the first one that yields a usable table wins.
    pub fn resolve(&mut self, candidate_urls: &[String], case_name: &str) -> Option<RemoteResult> {
        for candidate in candidate_urls {
            let table_urls = self.find_table_urls(candidate, case_name);
            if table_urls.is_empty() {
                debug!(url = %candidate, "no table pages under candidate url");
                continue;
            }

            let mut tables = Vec::new();
            let mut last_modified: Option<DateTime<Utc>> = None;
            for table_url in &table_urls {
                match self.fetch_tables(table_url) {
                    Ok((page_tables, modified)) => {
                        let period = period_from_url_path(table_url.path());
                        last_modified = last_modified.max(modified);
                        tables.extend(page_tables.into_iter().map(|table| RemoteTable {
                            source_url: table_url.to_string(),
                            period,
                            table,
                        }));
                    }
                    Err(error) => {
                        warn!(url = %table_url, error = %format!("{error:#}"), "failed to fetch table page");
                    }
                }
            }
            if tables.is_empty() {
                continue;
            }

            info!(
                case = case_name,
                url = %candidate,
                pages = table_urls.len(),
                tables = tables.len(),
                "found web-hosted diagnostics"
            );
            return Some(RemoteResult {
                location: DiagnosticsLocation {
                    path_or_url: candidate.clone(),
                    exists: true,
                    kind: SourceKind::Web,
                    file_or_table_count: table_urls.len(),
                    last_modified,
                },
                tables,
                source_url: candidate.clone(),
            });
        }
        None
    }

    /// Table page URLs reachable from `base_url`, or the URL itself when it already
    /// names a table page.
    pub fn find_table_urls(&mut self, base_url: &str, case_name: &str) -> Vec<Url> {
        let url = match Url::parse(base_url.trim()) {
            Ok(url) => url,
            Err(error) => {
                warn!(url = base_url, error = %error, "malformed diagnostics url");
                return Vec::new();
            }
        };
        if !self.allow_list.permits(&url) {
            warn!(url = %url, "diagnostics url host is not on the allow list");
            return Vec::new();
        }
        if is_table_page(&url) {
            return vec![url];
        }
        let case_prefix = case_name
            .trim()
            .to_lowercase()
            .chars()
            .take(CASE_PREFIX_CHARS)
            .collect::<String>();
        self.navigate(&url, &case_prefix, 0)
    }

    fn navigate(&mut self, url: &Url, case_prefix: &str, depth: usize) -> Vec<Url> {
        if depth > self.max_depth {
            return Vec::new();
        }
        let page = match self.fetcher.fetch(url) {
            Ok(page) if page.is_success() => page,
            Ok(page) => {
                debug!(url = %url, status = page.status, "directory page unavailable");
                return Vec::new();
            }
            Err(error) => {
                debug!(url = %url, error = %format!("{error:#}"), "failed to fetch directory page");
                return Vec::new();
            }
        };
        // Redirects may land elsewhere; links resolve against where the page actually came from.
        let base = &page.url;
        if !self.allow_list.permits(base) {
            warn!(url = %url, landed = %base, "directory page redirected off the allow list");
            return Vec::new();
        }

        let mut table_urls = Vec::new();
        let mut directories = Vec::new();
        for href in page_links(&page.body) {
            if href.starts_with('#') || href.starts_with('?') {
                continue;
            }
            let Ok(mut link) = base.join(&href) else {
                continue;
            };
            link.set_fragment(None);
            if !self.allow_list.permits(&link) {
                continue;
            }
            if is_table_page(&link) {
                if !table_urls.contains(&link) {
                    table_urls.push(link);
                }
            } else if is_directory_link(&link)
                && descends_from(base, &link)
                && is_navigable_directory(&link, case_prefix)
                && !directories.contains(&link)
            {
                directories.push(link);
            }
        }

        for directory in directories {
            if !table_urls.is_empty() {
                break;
            }
            table_urls.extend(self.navigate(&directory, case_prefix, depth + 1));
        }
        table_urls
    }

    /// Usable tables on one page, plus the page's Last-Modified time.
    pub fn fetch_tables(&mut self, url: &Url) -> Result<(Vec<RawTable>, Option<DateTime<Utc>>)> {
        if !self.allow_list.permits(url) {
            bail!("refusing to fetch {url}: host is not on the allow list");
        }
        let page = self.fetcher.fetch(url)?;
        if !self.allow_list.permits(&page.url) {
            bail!("refusing tables from {}: redirected off the allow list", page.url);
        }
        if !page.is_success() {
            bail!("HTTP {} while fetching {}", page.status, url);
        }
        let name = last_segment(url).unwrap_or_default();
        Ok((html_tables(&name, &page.body), page.last_modified))
    }
}

pub fn is_table_page(url: &Url) -> bool {
    last_segment(url)
        .map(|segment| segment.starts_with(TABLE_PAGE_PREFIX) && segment.ends_with(TABLE_PAGE_SUFFIX))
        .unwrap_or(false)
}

fn is_directory_link(url: &Url) -> bool {
    url.path().ends_with('/')
        || last_segment(url)
            .map(|segment| !segment.contains('.'))
            .unwrap_or(false)
}

fn is_navigable_directory(url: &Url, case_prefix: &str) -> bool {
    let Some(segment) = last_segment(url) else {
        return false;
    };
    let segment = segment.to_lowercase();
    DIRECTORY_TOKENS.iter().any(|token| segment.contains(token))
        || (!case_prefix.is_empty() && segment.contains(case_prefix))
}

/// Only links below the current page are followed; parent and sibling links are not.
fn descends_from(parent: &Url, child: &Url) -> bool {
    if parent.host_str() != child.host_str() {
        return false;
    }
    let parent_path = parent.path();
    let parent_dir = match parent_path.rfind('/') {
        Some(index) => &parent_path[..=index],
        None => "/",
    };
    let child_path = child.path();
    child_path.len() > parent_dir.len() && child_path.starts_with(parent_dir)
}

fn last_segment(url: &Url) -> Option<String> {
    url.path()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(ToString::to_string)
}

fn page_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("valid link selector");
    document
        .select(&selector)
        .filter_map(|anchor| anchor.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty())
        .collect()
}

#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub request_delay_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    /// Redirects are only followed onto these hosts.
    pub allowed_hosts: Vec<String>,
}

impl HttpFetcherConfig {
    pub fn from_config(config: &BoardConfig) -> Self {
        Self {
            user_agent: config.web_user_agent(),
            timeout_ms: env_value_u64("STATBOARD_HTTP_TIMEOUT_MS", config.web.timeout_ms),
            request_delay_ms: env_value_u64("STATBOARD_WEB_DELAY_MS", config.web.request_delay_ms),
            max_retries: env_value_usize("STATBOARD_HTTP_RETRIES", 3),
            retry_delay_ms: env_value_u64("STATBOARD_HTTP_RETRY_DELAY_MS", 1_000),
            allowed_hosts: config.web.allowed_hosts.clone(),
        }
    }
}

/// Blocking HTTP fetcher with a politeness delay, bounded retries with backoff,
/// and a redirect policy that never leaves the allow list.
pub struct HttpFetcher {
    client: Client,
    config: HttpFetcherConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(allow_listed_redirects(HostAllowList::new(
                &config.allowed_hosts,
            )))
            .build()
            .context("failed to build diagnostics HTTP client")?;
        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.request_delay_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let wait = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        sleep(Duration::from_millis(wait));
    }
}

/// Off-list redirect targets are not followed; the 3xx response itself comes back.
fn allow_listed_redirects(allow_list: HostAllowList) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if allow_list.permits(attempt.url()) {
            attempt.follow()
        } else {
            warn!(to = %attempt.url(), "not following redirect off the allow list");
            attempt.stop()
        }
    })
}

impl PageFetcher for HttpFetcher {
    fn fetch(&mut self, url: &Url) -> Result<FetchedPage> {
        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let sent = self
                .client
                .get(url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .header("Accept", "text/html, */*;q=0.1")
                .send();
            match sent {
                Ok(response) => {
                    let status = response.status();
                    if attempt < self.config.max_retries && is_retryable_status(status) {
                        warn!(url = %url, status = status.as_u16(), attempt = attempt + 1, "diagnostics page unavailable; retrying");
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return read_page(response, url);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        warn!(url = %url, attempt = attempt + 1, error = %error, "diagnostics request failed; retrying");
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).with_context(|| format!("failed to fetch {url}"));
                }
            }
        }
        bail!("fetching {url} exhausted its retry budget")
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn read_page(response: Response, url: &Url) -> Result<FetchedPage> {
    let status = response.status().as_u16();
    let last_modified = response
        .headers()
        .get(LAST_MODIFIED)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
        .map(|value| value.with_timezone(&Utc));
    let final_url = response.url().clone();
    let body = response
        .text()
        .with_context(|| format!("failed to read response body from {url}"))?;
    Ok(FetchedPage {
        url: final_url,
        status,
        body,
        last_modified,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use chrono::TimeZone;

    use super::*;

    const HOST: &str = "https://webext.cgd.ucar.edu";
    const CASE: &str = "b.e30_alpha08b.B1850C_LTso.ne30_t232_wgx3.308";
    const TABLE_HTML: &str = "<table><tr><th>variable</th><th>unit</th><th>test</th><th>control</th><th>diff</th></tr><tr><td>PRECT</td><td>mm/day</td><td>2.1</td><td>1.9</td><td>0.2</td></tr></table>";

    #[derive(Default)]
    struct MockFetcher {
        pages: BTreeMap<String, String>,
        modified: BTreeMap<String, DateTime<Utc>>,
        redirects: BTreeMap<String, String>,
        requested: Vec<String>,
    }

    impl MockFetcher {
        fn page(mut self, path: &str, body: &str) -> Self {
            self.pages.insert(format!("{HOST}{path}"), body.to_string());
            self
        }

        /// Serves `to` (any absolute URL) when `path` on the diagnostics host is requested.
        fn redirect(mut self, path: &str, to: &str, body: &str) -> Self {
            self.redirects.insert(format!("{HOST}{path}"), to.to_string());
            self.pages.insert(to.to_string(), body.to_string());
            self
        }
    }

    impl PageFetcher for MockFetcher {
        fn fetch(&mut self, url: &Url) -> anyhow::Result<FetchedPage> {
            self.requested.push(url.to_string());
            let landed = match self.redirects.get(url.as_str()) {
                Some(to) => Url::parse(to).expect("redirect target"),
                None => url.clone(),
            };
            let key = landed.to_string();
            Ok(match self.pages.get(&key) {
                Some(body) => FetchedPage {
                    url: landed.clone(),
                    status: 200,
                    body: body.clone(),
                    last_modified: self.modified.get(&key).copied(),
                },
                None => FetchedPage {
                    url: landed,
                    status: 404,
                    body: "not found".to_string(),
                    last_modified: None,
                },
            })
        }

        fn request_count(&self) -> usize {
            self.requested.len()
        }
    }

    fn listing(links: &[&str]) -> String {
        let anchors = links
            .iter()
            .map(|link| format!("<a href=\"{link}\">{link}</a>"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("<html><body>{anchors}</body></html>")
    }

    fn resolver(fetcher: MockFetcher) -> RemoteResolver<MockFetcher> {
        RemoteResolver::new(
            fetcher,
            HostAllowList::new(&["webext.cgd.ucar.edu".to_string()]),
            4,
        )
    }

    #[test]
    fn direct_table_url_is_used_as_is() {
        let fetcher = MockFetcher::default().page("/adf/amwg_table_case.html", TABLE_HTML);
        let mut resolver = resolver(fetcher);
        let url = format!("{HOST}/adf/amwg_table_case.html");

        let result = resolver
            .resolve(std::slice::from_ref(&url), CASE)
            .expect("result");
        assert_eq!(result.location.kind, SourceKind::Web);
        assert!(result.location.exists);
        assert_eq!(result.location.file_or_table_count, 1);
        assert_eq!(result.tables.len(), 1);
        assert_eq!(result.tables[0].period, TemporalPeriod::ANNUAL);
        assert_eq!(resolver.fetcher().request_count(), 1);
    }

    #[test]
    fn traversal_follows_case_and_keyword_directories() {
        let case_dir = "b.e30_alpha08b.B1850C_LTso_1_10_vs_obs/";
        let fetcher = MockFetcher::default()
            .page(
                "/adf/",
                &listing(&[
                    "../",
                    "?C=N;O=D",
                    "#top",
                    "https://evil.example.com/adf/html_table/",
                    "notes.txt",
                    "unrelated/",
                    case_dir,
                ]),
            )
            .page(
                &format!("/adf/{case_dir}"),
                &listing(&["html_table/", "../"]),
            )
            .page(
                &format!("/adf/{case_dir}html_table/"),
                &listing(&["amwg_table_case.html", "amwg_table_case.html#x", "JJA/"]),
            )
            .page(
                &format!("/adf/{case_dir}html_table/amwg_table_case.html"),
                TABLE_HTML,
            );
        let mut resolver = resolver(fetcher);

        let urls = resolver.find_table_urls(&format!("{HOST}/adf/"), CASE);
        assert_eq!(
            urls.iter().map(Url::to_string).collect::<Vec<_>>(),
            vec![format!("{HOST}/adf/{case_dir}html_table/amwg_table_case.html")]
        );
        let requested = &resolver.fetcher().requested;
        assert!(requested.iter().all(|url| url.starts_with(HOST)));
        assert!(!requested.iter().any(|url| url.contains("unrelated")));
    }

    #[test]
    fn traversal_stops_after_first_branch_with_tables() {
        let fetcher = MockFetcher::default()
            .page("/root/", &listing(&["atm_a/", "atm_b/"]))
            .page("/root/atm_a/", &listing(&["amwg_table_a.html"]))
            .page("/root/atm_b/", &listing(&["amwg_table_b.html"]));
        let mut resolver = resolver(fetcher);

        let urls = resolver.find_table_urls(&format!("{HOST}/root/"), CASE);
        assert_eq!(urls.len(), 1);
        assert!(urls[0].path().ends_with("amwg_table_a.html"));
        assert!(
            !resolver
                .fetcher()
                .requested
                .iter()
                .any(|url| url.contains("atm_b"))
        );
    }

    #[test]
    fn traversal_respects_depth_bound() {
        let mut fetcher = MockFetcher::default();
        let mut path = "/deep/".to_string();
        for _ in 0..8 {
            fetcher = fetcher.page(&path, &listing(&["atm/"]));
            path.push_str("atm/");
        }
        fetcher = fetcher.page(&path, &listing(&["amwg_table_x.html"]));
        let mut resolver = resolver(fetcher);

        assert!(resolver.find_table_urls(&format!("{HOST}/deep/"), CASE).is_empty());
        assert_eq!(resolver.fetcher().request_count(), 5);
    }

    #[test]
    fn off_allow_list_candidates_are_never_fetched() {
        let mut resolver = resolver(MockFetcher::default());
        let result = resolver.resolve(
            &[
                "https://evil.example.com/adf/amwg_table_case.html".to_string(),
                "ftp://webext.cgd.ucar.edu/adf/amwg_table_case.html".to_string(),
                "not a url".to_string(),
            ],
            CASE,
        );
        assert!(result.is_none());
        assert_eq!(resolver.fetcher().request_count(), 0);
    }

    #[test]
    fn missing_page_resolves_to_absent() {
        let mut resolver = resolver(MockFetcher::default());
        let result = resolver.resolve(&[format!("{HOST}/gone/")], CASE);
        assert!(result.is_none());
        assert_eq!(resolver.fetcher().request_count(), 1);
    }

    #[test]
    fn first_candidate_with_tables_wins() {
        let fetcher = MockFetcher::default()
            .page("/one/amwg_table_1.html", "<p>no tables here</p>")
            .page("/two/DJF/amwg_table_2.html", TABLE_HTML)
            .page("/three/amwg_table_3.html", TABLE_HTML);
        let mut resolver = resolver(fetcher);
        let candidates = vec![
            format!("{HOST}/one/amwg_table_1.html"),
            format!("{HOST}/two/DJF/amwg_table_2.html"),
            format!("{HOST}/three/amwg_table_3.html"),
        ];

        let result = resolver.resolve(&candidates, CASE).expect("result");
        assert_eq!(result.source_url, candidates[1]);
        assert_eq!(result.tables[0].period, TemporalPeriod::Named("DJF"));
        assert!(
            !resolver
                .fetcher()
                .requested
                .iter()
                .any(|url| url.contains("three"))
        );
    }

    #[test]
    fn last_modified_comes_from_table_pages() {
        let mut fetcher = MockFetcher::default().page("/adf/amwg_table_case.html", TABLE_HTML);
        let stamp = Utc
            .with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
            .single()
            .expect("timestamp");
        fetcher
            .modified
            .insert(format!("{HOST}/adf/amwg_table_case.html"), stamp);
        let mut resolver = resolver(fetcher);

        let result = resolver
            .resolve(&[format!("{HOST}/adf/amwg_table_case.html")], CASE)
            .expect("result");
        assert_eq!(result.location.last_modified, Some(stamp));
    }

    #[test]
    fn allow_list_is_case_insensitive_and_scheme_bound() {
        let allow = HostAllowList::new(&["WebExt.cgd.ucar.edu".to_string()]);
        assert!(allow.permits(&Url::parse("http://webext.cgd.ucar.edu/a").expect("url")));
        assert!(!allow.permits(&Url::parse("https://webext.cgd.ucar.edu.evil.com/a").expect("url")));
        assert!(!allow.permits(&Url::parse("file:///etc/passwd").expect("url")));
    }

    #[test]
    fn tables_behind_off_host_redirect_are_refused() {
        let fetcher = MockFetcher::default().redirect(
            "/adf/amwg_table_case.html",
            "https://evil.example.com/amwg_table_case.html",
            TABLE_HTML,
        );
        let mut resolver = resolver(fetcher);
        let url = Url::parse(&format!("{HOST}/adf/amwg_table_case.html")).expect("url");

        let error = resolver.fetch_tables(&url).expect_err("must fail");
        assert!(error.to_string().contains("allow list"));
        assert!(resolver.resolve(&[url.to_string()], CASE).is_none());
    }

    #[test]
    fn redirected_listing_links_resolve_against_landing_page() {
        let fetcher = MockFetcher::default()
            .redirect("/adf", &format!("{HOST}/moved/adf/"), &listing(&["atm/"]))
            .page("/moved/adf/atm/", &listing(&["amwg_table_case.html"]));
        let mut resolver = resolver(fetcher);

        let urls = resolver.find_table_urls(&format!("{HOST}/adf"), CASE);
        assert_eq!(
            urls.iter().map(Url::to_string).collect::<Vec<_>>(),
            vec![format!("{HOST}/moved/adf/atm/amwg_table_case.html")]
        );
    }

    #[test]
    fn off_host_directory_redirect_is_not_followed() {
        let fetcher = MockFetcher::default().redirect(
            "/adf/",
            "https://evil.example.com/adf/",
            &listing(&["amwg_table_case.html", "atm/"]),
        );
        let mut resolver = resolver(fetcher);

        assert!(resolver.find_table_urls(&format!("{HOST}/adf/"), CASE).is_empty());
        assert_eq!(resolver.fetcher().request_count(), 1);
    }

    /// Answers each accepted connection with the next canned response.
    fn serve(responses: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("local addr");
        thread::spawn(move || {
            for response in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let mut request = [0u8; 4096];
                let _ = stream.read(&mut request);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{address}")
    }

    fn http_response(status: &str, headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n{headers}\r\n{body}",
            body.len()
        )
    }

    fn local_fetcher(max_retries: usize) -> HttpFetcher {
        HttpFetcher::new(HttpFetcherConfig {
            user_agent: "statboard-test".to_string(),
            timeout_ms: 5_000,
            request_delay_ms: 0,
            max_retries,
            retry_delay_ms: 1,
            allowed_hosts: vec!["127.0.0.1".to_string()],
        })
        .expect("fetcher")
    }

    #[test]
    fn http_fetcher_stops_at_off_host_redirect() {
        let base = serve(vec![http_response(
            "302 Found",
            "Location: http://localhost:9/amwg_table_x.html\r\n",
            "",
        )]);
        let url = Url::parse(&format!("{base}/amwg_table_x.html")).expect("url");
        let mut fetcher = local_fetcher(0);

        let page = fetcher.fetch(&url).expect("fetch");
        assert_eq!(page.status, 302);
        assert_eq!(page.url.host_str(), Some("127.0.0.1"));
        assert!(!page.is_success());
    }

    #[test]
    fn http_fetcher_retries_unavailable_pages() {
        let base = serve(vec![
            http_response("503 Service Unavailable", "", "busy"),
            http_response("200 OK", "Content-Type: text/html\r\n", TABLE_HTML),
        ]);
        let url = Url::parse(&format!("{base}/amwg_table_x.html")).expect("url");
        let mut fetcher = local_fetcher(2);

        let page = fetcher.fetch(&url).expect("fetch");
        assert_eq!(page.status, 200);
        assert!(page.body.contains("PRECT"));
        assert_eq!(fetcher.request_count(), 2);
    }

    #[test]
    fn http_fetcher_returns_last_failure_when_retries_run_out() {
        let base = serve(vec![http_response("503 Service Unavailable", "", "busy")]);
        let url = Url::parse(&format!("{base}/index.html")).expect("url");
        let mut fetcher = local_fetcher(0);

        let page = fetcher.fetch(&url).expect("fetch");
        assert_eq!(page.status, 503);
        assert_eq!(fetcher.request_count(), 1);
    }
}
