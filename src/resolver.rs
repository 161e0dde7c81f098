// src/resolver.rs

//! Latest-version resolution with a short-lived cache
//!
//! Provider lookups are rate limited, so answers are cached as transients
//! keyed by repository slug.

use crate::error::{Error, Result};
use crate::provider::{ReleaseTag, SourceProvider};
use crate::store::OptionStore;
use std::time::Duration;
use tracing::{debug, warn};

/// Prefix of every cached latest-version entry
pub const VERSION_CACHE_PREFIX: &str = "gitpress_version_";

pub struct VersionResolver<'a> {
    provider: &'a dyn SourceProvider,
    cache: &'a dyn OptionStore,
    ttl: Duration,
}

impl<'a> VersionResolver<'a> {
    pub fn new(provider: &'a dyn SourceProvider, cache: &'a dyn OptionStore, ttl: Duration) -> Self {
        Self {
            provider,
            cache,
            ttl,
        }
    }

    fn cache_key(slug: &str) -> String {
        format!("{}{}", VERSION_CACHE_PREFIX, slug)
    }

    /// Latest release of `slug`, from cache when fresh
    pub fn resolve(&self, slug: &str) -> Result<ReleaseTag> {
        let key = Self::cache_key(slug);

        match self.cache.get_transient(&key) {
            Ok(Some(name)) if !name.trim().is_empty() => {
                debug!("Using cached latest version {} for {}", name, slug);
                return Ok(ReleaseTag::new(name));
            }
            Ok(Some(_)) => {
                warn!("Discarding blank cached version for {}", slug);
                if let Err(e) = self.cache.delete_transient(&key) {
                    warn!("Failed to discard cached version for {}: {}", slug, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Version cache unavailable: {}", e),
        }

        let tag = match self.provider.latest_version(slug) {
            Ok(Some(tag)) => tag,
            Ok(None) => {
                return Err(Error::NotFoundError(format!(
                    "{} lists no tags for {}",
                    self.provider.name(),
                    slug
                )));
            }
            Err(e) => {
                return Err(Error::NotFoundError(format!(
                    "{} lookup for {} failed: {}",
                    self.provider.name(),
                    slug,
                    e
                )));
            }
        };

        if !self.ttl.is_zero() {
            if let Err(e) = self.cache.set_transient(&key, &tag.name, self.ttl) {
                warn!("Failed to cache latest version for {}: {}", slug, e);
            }
        }

        Ok(tag)
    }

    /// Drop every cached latest-version entry
    pub fn invalidate_all(cache: &dyn OptionStore) -> Result<usize> {
        cache.delete_transients_with_prefix(VERSION_CACHE_PREFIX)
    }
}
