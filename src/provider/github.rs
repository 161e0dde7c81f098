// src/provider/github.rs

//! GitHub source provider
//!
//! Latest release = first entry of the repository's tag listing, which
//! GitHub returns newest first. Listings that mix naming schemes fall back to
//! scheme preference. Archives come from the codeload redirect at
//! `github.com/<slug>/archive/refs/tags/<tag>.tar.gz`.

use super::{ReleaseTag, SourceProvider, latest_from_listing};
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Tags requested per listing
const TAGS_PER_PAGE: u32 = 30;

/// Timeout for GitHub API requests
const API_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_WEB_BASE: &str = "https://github.com";

/// One entry of `GET /repos/{owner}/{repo}/tags`
#[derive(Debug, Deserialize)]
struct GitHubTag {
    name: String,
}

pub struct GitHubProvider {
    client: Client,
    api_base: String,
    web_base: String,
}

impl GitHubProvider {
    /// Create a provider; `token` raises the API rate limit when present
    pub fn new(token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::InitError(format!("Invalid GitHub token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(API_TIMEOUT)
            .user_agent(concat!("gitpress/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            web_base: DEFAULT_WEB_BASE.to_string(),
        })
    }

    /// Point the provider at a GitHub Enterprise or mirror host
    pub fn with_bases(mut self, api_base: &str, web_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.web_base = web_base.trim_end_matches('/').to_string();
        self
    }

    fn tags_url(&self, slug: &str) -> String {
        format!(
            "{}/repos/{}/tags?per_page={}",
            self.api_base, slug, TAGS_PER_PAGE
        )
    }
}

/// Latest tag of a listing body
fn latest_tag(body: &str) -> Result<Option<ReleaseTag>> {
    let tags: Vec<GitHubTag> = serde_json::from_str(body)
        .map_err(|e| Error::ParseError(format!("Invalid tag listing: {}", e)))?;
    let names: Vec<&str> = tags.iter().map(|tag| tag.name.as_str()).collect();
    Ok(latest_from_listing(&names).map(ReleaseTag::new))
}

impl SourceProvider for GitHubProvider {
    fn name(&self) -> &str {
        "GitHub"
    }

    fn latest_version(&self, slug: &str) -> Result<Option<ReleaseTag>> {
        let url = self.tags_url(slug);
        debug!("Listing tags from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Error::DownloadError(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let body = response
            .text()
            .map_err(|e| Error::DownloadError(format!("Failed to read response: {}", e)))?;

        let tag = latest_tag(&body)?;
        match &tag {
            Some(tag) => info!("Latest tag of {} is {}", slug, tag.name),
            None => info!("{} has no tags", slug),
        }
        Ok(tag)
    }

    fn download_url(&self, slug: &str, tag: &ReleaseTag) -> String {
        format!(
            "{}/{}/archive/refs/tags/{}.tar.gz",
            self.web_base, slug, tag.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_tag_keeps_listing_order() {
        let body = r#"[
            {"name": "6.5.2", "zipball_url": "z", "tarball_url": "t", "commit": {"sha": "abc"}},
            {"name": "6.5.1"},
            {"name": "6.6"}
        ]"#;
        assert_eq!(latest_tag(body).unwrap(), Some(ReleaseTag::new("6.5.2")));
    }

    #[test]
    fn test_latest_tag_of_mixed_listing() {
        let body = r#"[{"name": "v2.7.7"}, {"name": "release-1"}, {"name": "9.4.5"}]"#;
        assert_eq!(latest_tag(body).unwrap(), Some(ReleaseTag::new("9.4.5")));
    }

    #[test]
    fn test_latest_tag_of_empty_listing() {
        assert_eq!(latest_tag("[]").unwrap(), None);
    }

    #[test]
    fn test_latest_tag_rejects_non_listing() {
        let result = latest_tag(r#"{"message": "Not Found"}"#);
        assert!(matches!(result, Err(Error::ParseError(_))));
    }

    #[test]
    fn test_urls() {
        let provider = GitHubProvider::new(None)
            .unwrap()
            .with_bases("https://ghe.example.com/api/v3/", "https://ghe.example.com/");

        assert_eq!(
            provider.tags_url("WordPress/WordPress"),
            "https://ghe.example.com/api/v3/repos/WordPress/WordPress/tags?per_page=30"
        );
        assert_eq!(
            provider.download_url("WordPress/WordPress", &ReleaseTag::new("v6.5.2")),
            "https://ghe.example.com/WordPress/WordPress/archive/refs/tags/v6.5.2.tar.gz"
        );
    }
}
