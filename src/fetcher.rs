//! Remote Directory Fetcher
//!
//! Downloads the roster from a shared cloud-storage link (or any direct
//! HTTP(S) endpoint) and parses it into rows.
//!
//! ```text
//! 1drv.ms/...  ──HEAD──►  onedrive.live.com/view.aspx?...  ──rewrite──►  download.aspx  ──GET──►  CSV
//! ```
//!
//! The HTTP side lives behind [`HttpTransport`] so link handling and parsing
//! can run without a network.

use reqwest::Url;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{Config, RosterSource};
use crate::error::{CoreError, Result};

/// Hosts that only hand out redirects to the real share page
const SHORT_LINK_HOSTS: &[&str] = &["1drv.ms"];

/// Hosts whose share links need rewriting into download links
const CLOUD_STORAGE_HOSTS: &[&str] = &["onedrive.live.com", "1drv.ms", "sharepoint.com"];

const VIEW_MARKER: &str = "view.aspx";
const DOWNLOAD_MARKER: &str = "download.aspx";

/// Blocking HTTP operations needed by the fetcher
pub trait HttpTransport: Send {
    /// Follow redirects from `url` and return the final location
    fn resolve(&self, url: &str) -> Result<String>;

    /// GET `url` and return the body decoded with the charset the server
    /// declares (UTF-8 when it declares none); non-success status is an error
    fn get(&self, url: &str) -> Result<String>;
}

/// `reqwest` blocking client with a fixed timeout
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Use a preconfigured client (proxy, TLS or timeout settings)
    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    fn resolve(&self, url: &str) -> Result<String> {
        let response = self.client.head(url).send()?;
        Ok(response.url().to_string())
    }

    fn get(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Network(format!(
                "roster download from {} returned {}",
                host_label(url),
                status
            )));
        }
        response
            .text()
            .map_err(|e| CoreError::DataFetch(format!("undecodable roster body: {}", e)))
    }
}

/// One roster row: lower-cased column name -> trimmed raw value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterRow {
    fields: HashMap<String, String>,
}

impl RosterRow {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (normalize_column(k.as_ref()), v.into()))
                .collect(),
        }
    }

    /// Value of `column`, matched case-insensitively
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(&normalize_column(column)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn normalize_column(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Anything that can produce roster rows for the auth manager
pub trait DirectorySource: Send {
    /// Fetch rows from the location recorded in `source`. Implementations may
    /// update `source` (e.g. after resolving a short link).
    fn fetch(&self, source: &mut RosterSource) -> Result<Vec<RosterRow>>;
}

/// Fetches the roster over HTTP
pub struct RemoteDirectoryFetcher {
    transport: Box<dyn HttpTransport>,
    required_columns: Vec<String>,
}

impl RemoteDirectoryFetcher {
    /// Fetcher backed by a real HTTP client
    pub fn new(config: &Config) -> Result<Self> {
        let transport = ReqwestTransport::new(config.http_timeout)?;
        Ok(Self::with_transport(Box::new(transport), config))
    }

    pub fn with_transport(transport: Box<dyn HttpTransport>, config: &Config) -> Self {
        Self {
            transport,
            required_columns: vec![
                normalize_column(&config.name_column),
                normalize_column(&config.id_column),
            ],
        }
    }

    /// Expand a short link to its canonical form; other links pass through
    pub fn resolve_link(&self, url: &str) -> Result<String> {
        if !is_short_link(url) {
            return Ok(url.to_string());
        }
        let resolved = self.transport.resolve(url)?;
        debug!("Resolved short link to {}", host_label(&resolved));
        Ok(resolved)
    }

    /// Download and parse the roster at an already-canonical link
    pub fn download(&self, canonical: &str) -> Result<Vec<RosterRow>> {
        let download_url = to_download_url(canonical);
        let body = self.transport.get(&download_url)?;
        let required: Vec<&str> = self.required_columns.iter().map(String::as_str).collect();
        let rows = parse_roster(&body, &required)?;
        info!("Fetched {} roster rows from {}", rows.len(), host_label(&download_url));
        Ok(rows)
    }
}

impl DirectorySource for RemoteDirectoryFetcher {
    fn fetch(&self, source: &mut RosterSource) -> Result<Vec<RosterRow>> {
        let url = source
            .url()
            .map(str::to_string)
            .ok_or_else(|| CoreError::Configuration("roster URL not configured".to_string()))?;

        let canonical = self.resolve_link(&url)?;
        if canonical != url {
            source.set_url(&canonical)?;
        }

        self.download(&canonical)
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

fn host_in(url: &str, domains: &[&str]) -> bool {
    host_of(url)
        .map(|host| domains.iter().any(|d| host_matches(&host, d)))
        .unwrap_or(false)
}

/// Host only, for log lines; share links carry access tokens
fn host_label(url: &str) -> String {
    host_of(url).unwrap_or_else(|| "<unparsed url>".to_string())
}

pub fn is_short_link(url: &str) -> bool {
    host_in(url, SHORT_LINK_HOSTS)
}

pub fn is_cloud_storage_link(url: &str) -> bool {
    host_in(url, CLOUD_STORAGE_HOSTS)
}

/// Turn a cloud-storage share link into a direct download link.
/// Links on other hosts are returned unchanged.
pub fn to_download_url(url: &str) -> String {
    if !is_cloud_storage_link(url) {
        return url.to_string();
    }
    if url.contains(VIEW_MARKER) {
        return url.replace(VIEW_MARKER, DOWNLOAD_MARKER);
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}download=1", url, separator)
}

/// Parse comma-delimited text with a header row.
///
/// Header names are trimmed and lower-cased. Every column in `required` must
/// be present in the header, otherwise the whole payload is rejected.
pub fn parse_roster(body: &str, required: &[&str]) -> Result<Vec<RosterRow>> {
    let body = body.strip_prefix('\u{feff}').unwrap_or(body);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(normalize_column).collect();

    for column in required {
        let column = normalize_column(column);
        if !headers.contains(&column) {
            return Err(CoreError::DataFetch(format!(
                "roster is missing required column '{}' (found: {})",
                column,
                headers.join(", ")
            )));
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let fields = headers
            .iter()
            .cloned()
            .zip(record.iter().map(str::to_string))
            .collect();
        rows.push(RosterRow { fields });
    }
    Ok(rows)
}
