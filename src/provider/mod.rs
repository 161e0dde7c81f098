// src/provider/mod.rs

//! Source-control providers
//!
//! A provider answers two questions about a repository: which release is
//! the latest, and where its source archive can be downloaded. GitHub is the
//! only implementation; the orchestrator only sees [`SourceProvider`].

pub mod github;

pub use github::GitHubProvider;

use crate::error::Result;
use std::cmp::Ordering;

/// A release tag as named by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTag {
    pub name: String,
}

impl ReleaseTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The tag name without a leading "v"
    pub fn version(&self) -> &str {
        strip_v_prefix(&self.name)
    }
}

/// Source-control host capable of resolving releases
pub trait SourceProvider {
    /// Short provider name for log messages
    fn name(&self) -> &str;

    /// Latest release tag of `slug` ("owner/name"), or None if it has no tags
    fn latest_version(&self, slug: &str) -> Result<Option<ReleaseTag>>;

    /// URL of the source archive for `tag`
    fn download_url(&self, slug: &str, tag: &ReleaseTag) -> String;
}

fn strip_v_prefix(tag: &str) -> &str {
    tag.strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag)
}

/// Tag naming schemes, most preferred first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum TagScheme {
    /// "6.5.2"
    Numeric,
    /// "v6.5.2"
    Prefixed,
    /// "release-1", "6.5.2-beta"
    Other,
}

fn is_numeric(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .split('.')
            .all(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()))
}

fn classify(tag: &str) -> TagScheme {
    if is_numeric(tag) {
        TagScheme::Numeric
    } else if strip_v_prefix(tag) != tag && is_numeric(strip_v_prefix(tag)) {
        TagScheme::Prefixed
    } else {
        TagScheme::Other
    }
}

/// Compare two digit strings by value without overflowing
fn compare_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Per-segment numeric comparison; missing trailing segments count as zero
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (l, r) => {
                let ord = compare_digits(l.unwrap_or("0"), r.unwrap_or("0"));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn compare_other(a: &str, b: &str) -> Ordering {
    match (
        semver::Version::parse(strip_v_prefix(a)),
        semver::Version::parse(strip_v_prefix(b)),
    ) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}

/// Order two version strings
///
/// Numeric versions (optionally "v"-prefixed) compare segment by segment,
/// so "1.10" is newer than "1.9". Anything else compares as semver when both
/// sides parse, and lexically otherwise.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (sa, sb) = (strip_v_prefix(a), strip_v_prefix(b));
    if is_numeric(sa) && is_numeric(sb) {
        compare_numeric(sa, sb)
    } else {
        compare_other(a, b)
    }
}

/// Pick the newest tag from a listing that may mix naming schemes
///
/// Purely numeric tags win over "v"-prefixed ones, which win over anything
/// else; the newest tag is chosen from the most preferred scheme present.
pub fn newest_version_from_tags<S: AsRef<str>>(tags: &[S]) -> Option<&str> {
    let scheme = tags.iter().map(|t| classify(t.as_ref())).min()?;

    tags.iter()
        .map(|t| t.as_ref())
        .filter(|t| classify(t) == scheme)
        .max_by(|a, b| compare_versions(a, b))
}

/// Latest tag of a listing returned newest first
///
/// The first entry wins when every tag follows one naming scheme. When
/// schemes are mixed, listing order says nothing about versions and the
/// preferred-scheme ordering of [`newest_version_from_tags`] applies.
pub fn latest_from_listing<S: AsRef<str>>(tags: &[S]) -> Option<&str> {
    let first = tags.first()?.as_ref();
    let scheme = classify(first);
    if tags.iter().all(|t| classify(t.as_ref()) == scheme) {
        Some(first)
    } else {
        newest_version_from_tags(tags)
    }
}
