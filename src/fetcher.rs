// src/fetcher.rs

//! Release archive download
//!
//! Archives are streamed into uniquely named files in the scratch directory.
//! A single attempt is made under a generous timeout; there is no resume.

use crate::error::{Error, Result};
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for a whole archive transfer (5 minutes)
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// A downloaded archive in scratch storage
///
/// The file is deleted when this value is dropped, whatever the outcome of
/// the run that downloaded it.
#[derive(Debug)]
pub struct DownloadedArchive {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

impl Drop for DownloadedArchive {
    fn drop(&mut self) {
        remove_scratch_file(&self.path);
    }
}

/// Best-effort removal of a scratch file
pub fn remove_scratch_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// Downloads release archives
pub trait ArchiveFetcher {
    fn download(&self, url: &str) -> Result<DownloadedArchive>;
}

/// [`ArchiveFetcher`] over HTTP(S)
pub struct HttpFetcher {
    client: Client,
    scratch_dir: PathBuf,
}

impl HttpFetcher {
    /// Create a fetcher that stores archives under `scratch_dir`
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .user_agent(concat!("gitpress/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            scratch_dir: scratch_dir.into(),
        })
    }
}

/// File suffix matching the archive format named in `url`
fn archive_suffix(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    [".tar.gz", ".tgz", ".tar.xz", ".tar.zst", ".tar"]
        .into_iter()
        .find(|suffix| path.ends_with(suffix))
        .unwrap_or(".archive")
}

/// SHA-256 of a file as lowercase hex
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        Error::IoError(format!("Failed to open {} for hashing: {}", path.display(), e))
    })?;

    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| {
        Error::IoError(format!("Failed to read {} for hashing: {}", path.display(), e))
    })?;

    Ok(format!("{:x}", hasher.finalize()))
}

impl ArchiveFetcher for HttpFetcher {
    fn download(&self, url: &str) -> Result<DownloadedArchive> {
        info!("Downloading {}", url);

        fs::create_dir_all(&self.scratch_dir).map_err(|e| {
            Error::IoError(format!(
                "Failed to create directory {}: {}",
                self.scratch_dir.display(),
                e
            ))
        })?;

        let mut response = self
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

        // Removed automatically if anything below fails
        let mut scratch = tempfile::Builder::new()
            .prefix("gitpress-")
            .suffix(archive_suffix(url))
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| Error::IoError(format!("Failed to create scratch file: {}", e)))?;

        let size = io::copy(&mut response, scratch.as_file_mut())
            .map_err(|e| Error::DownloadError(format!("Failed to write downloaded data: {}", e)))?;

        let sha256 = file_sha256(scratch.path())?;

        let (_, path) = scratch
            .keep()
            .map_err(|e| Error::IoError(format!("Failed to keep scratch file: {}", e)))?;

        info!("Downloaded {} bytes to {}", size, path.display());
        Ok(DownloadedArchive { path, size, sha256 })
    }
}
