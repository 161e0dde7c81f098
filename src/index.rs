// src/index.rs

//! Remote release index
//!
//! The index is a small tree of JSON documents. The root document
//! (`<base>/index.json`) links to one document per component. The WordPress
//! core document names the source repository:
//!
//! ```json
//! { "wordpress": { "url": "core.json" } }
//! { "repository": "https://github.com/WordPress/WordPress/", "tags": "..." }
//! ```
//!
//! Only `repository` is read; tag listings come from the provider.
//!
//! Documents are decoded into typed schemas; anything structurally invalid is
//! rejected here instead of surfacing later as missing fields.

use crate::error::{Error, Result};
use regex::Regex;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for index requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Repository used when the index URL is not a recognizable GitHub URL
pub const DEFAULT_SLUG: &str = "WordPress/WordPress";

static GITHUB_REPO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?github\.com/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+?)(?:\.git)?/?$")
        .expect("repository pattern is valid")
});

/// Root index document
#[derive(Debug, Clone, Deserialize)]
pub struct RootIndex {
    pub wordpress: IndexLink,
}

/// Pointer from the root index to a component document
#[derive(Debug, Clone, Deserialize)]
pub struct IndexLink {
    pub url: String,
}

/// Where WordPress core releases come from
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoreSource {
    /// Source-control URL of the core repository
    pub repository: String,
}

impl CoreSource {
    /// "owner/name" of the repository
    pub fn slug(&self) -> String {
        repo_slug(&self.repository)
    }
}

/// Source of release metadata
pub trait ReleaseIndex {
    /// Locate the WordPress core repository
    fn core_source(&self) -> Result<CoreSource>;
}

/// Derive "owner/name" from a GitHub repository URL
///
/// Falls back to [`DEFAULT_SLUG`] when the URL has another shape.
pub fn repo_slug(repository: &str) -> String {
    match GITHUB_REPO.captures(repository.trim()) {
        Some(caps) => format!("{}/{}", &caps[1], &caps[2]),
        None => {
            warn!(
                "Unrecognized repository URL {:?}, using {}",
                repository, DEFAULT_SLUG
            );
            DEFAULT_SLUG.to_string()
        }
    }
}

/// Resolve a link from a document against the index base URL
fn resolve_link(base_url: &str, link: &str) -> String {
    if link.starts_with("http://") || link.starts_with("https://") {
        link.to_string()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            link.trim_start_matches('/')
        )
    }
}

fn parse_core_source(body: &str) -> Result<CoreSource> {
    let source: CoreSource = serde_json::from_str(body)
        .map_err(|e| Error::ParseError(format!("Invalid core index document: {}", e)))?;

    if source.repository.trim().is_empty() {
        return Err(Error::ParseError(
            "Core index document has an empty repository".to_string(),
        ));
    }
    Ok(source)
}

/// [`ReleaseIndex`] fetched over HTTP
pub struct HttpIndex {
    client: Client,
    base_url: String,
}

impl HttpIndex {
    /// Create an index client rooted at `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("gitpress/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    fn root_url(&self) -> String {
        resolve_link(&self.base_url, "index.json")
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        debug!("Fetching index document {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::DownloadError(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        response
            .text()
            .map_err(|e| Error::DownloadError(format!("Failed to read response: {}", e)))
    }

    fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.fetch_text(url)?;
        serde_json::from_str(&body)
            .map_err(|e| Error::ParseError(format!("Invalid index document {}: {}", url, e)))
    }
}

impl ReleaseIndex for HttpIndex {
    fn core_source(&self) -> Result<CoreSource> {
        let root: RootIndex = self.fetch_json(&self.root_url())?;
        let core_url = resolve_link(&self.base_url, &root.wordpress.url);

        let source = parse_core_source(&self.fetch_text(&core_url)?)?;
        info!("Core releases come from {}", source.repository);
        Ok(source)
    }
}
