// src/installer.rs

//! Release archive installation
//!
//! Source archives from GitHub wrap everything in one top-level directory
//! named after the ref. Installing one means:
//!
//! 1. unpack the tarball into a scratch directory
//! 2. take the single top-level directory as the payload root
//! 3. delete subtrees that must never overwrite site data (`wp-content`)
//! 4. copy every remaining file over the live installation
//! 5. remove the scratch directory and the archive
//!
//! The copy is an overlay: files are created or overwritten, never deleted.
//! It is not transactional, so a failure midway leaves a mix of old and new
//! files.

use crate::error::{Error, Result};
use crate::fetcher::remove_scratch_file;
use flate2::read::GzDecoder;
use regex::Regex;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tar::Archive;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use xz2::read::XzDecoder;

/// Payload entries that are removed before copying
pub const EXCLUDED_PATHS: &[&str] = &["wp-content"];

/// File holding the installed WordPress version
pub const VERSION_FILE: &str = "wp-includes/version.php";

static WP_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\$wp_version\s*=\s*['"]([^'"]+)['"]"#).expect("version pattern is valid")
});

/// Archive compression format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompressionFormat {
    Gzip,
    Xz,
    Zstd,
    None,
}

/// An unpacked archive ready to be copied
///
/// Owns the scratch directory it was unpacked into; the directory is removed
/// by [`UnpackedPackage::cleanup`] or when the value is dropped.
#[derive(Debug)]
pub struct UnpackedPackage {
    pub payload_root: PathBuf,
    scratch: Option<TempDir>,
}

impl UnpackedPackage {
    /// Package rooted at an existing directory not owned by the installer
    pub fn at(payload_root: impl Into<PathBuf>) -> Self {
        Self {
            payload_root: payload_root.into(),
            scratch: None,
        }
    }

    /// Remove the scratch directory
    pub fn cleanup(mut self) -> Result<()> {
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            scratch.close().map_err(|e| {
                Error::IoError(format!("Failed to remove {}: {}", path.display(), e))
            })?;
            debug!("Removed scratch directory {}", path.display());
        }
        Ok(())
    }
}

/// Totals from an overlay copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub files: usize,
    pub directories: usize,
}

/// Installs unpacked releases
pub trait ArchiveInstaller {
    /// Unpack `archive`, locate the payload root and strip excluded paths
    fn unpack(&self, archive: &Path) -> Result<UnpackedPackage>;

    /// Overlay the payload onto `target`
    fn install(&self, package: &UnpackedPackage, target: &Path) -> Result<CopyReport>;
}

/// [`ArchiveInstaller`] for gzip, xz or zstd compressed tarballs
pub struct TarballInstaller {
    scratch_dir: PathBuf,
}

impl TarballInstaller {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Run the whole pipeline for one archive, always removing the archive
    pub fn install_archive(&self, archive: &Path, target: &Path) -> Result<CopyReport> {
        let result = self.unpack(archive).and_then(|package| {
            let report = self.install(&package, target);
            if let Err(e) = package.cleanup() {
                warn!("{}", e);
            }
            report
        });
        remove_scratch_file(archive);
        result
    }

    /// Detect compression from magic bytes
    fn detect_compression(file: &mut File) -> Result<CompressionFormat> {
        let mut magic = [0u8; 6];
        let read = file
            .read(&mut magic)
            .map_err(|e| Error::ExtractError(format!("Failed to read archive header: {}", e)))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::ExtractError(format!("Failed to rewind archive: {}", e)))?;

        let magic = &magic[..read];
        let format = if magic.starts_with(&[0x1F, 0x8B]) {
            CompressionFormat::Gzip
        } else if magic.starts_with(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]) {
            CompressionFormat::Xz
        } else if magic.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]) {
            CompressionFormat::Zstd
        } else if read == 0 {
            return Err(Error::ExtractError("Archive is empty".to_string()));
        } else {
            CompressionFormat::None
        };

        debug!("Detected archive compression: {:?}", format);
        Ok(format)
    }

    /// Open and decompress the archive
    fn open_archive(path: &Path) -> Result<Archive<Box<dyn Read>>> {
        let mut file = File::open(path)
            .map_err(|e| Error::ExtractError(format!("Failed to open archive: {}", e)))?;

        let reader: Box<dyn Read> = match Self::detect_compression(&mut file)? {
            CompressionFormat::Gzip => Box::new(GzDecoder::new(file)),
            CompressionFormat::Xz => Box::new(XzDecoder::new(file)),
            CompressionFormat::Zstd => {
                let decoder = zstd::Decoder::new(file)
                    .map_err(|e| Error::ExtractError(format!("Failed to create zstd decoder: {}", e)))?;
                Box::new(decoder)
            }
            CompressionFormat::None => Box::new(file),
        };

        Ok(Archive::new(reader))
    }

    /// Remove excluded entries from the payload root
    fn strip_excluded(payload_root: &Path) -> Result<()> {
        for name in EXCLUDED_PATHS {
            let path = payload_root.join(name);
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else if path.exists() {
                fs::remove_file(&path)
            } else {
                continue;
            };
            removed.map_err(|e| {
                Error::ExtractError(format!("Failed to remove {}: {}", path.display(), e))
            })?;
            debug!("Excluded {} from payload", name);
        }
        Ok(())
    }
}

/// The single top-level directory inside an extraction directory
///
/// Extra top-level directories are ignored (first by name wins); loose files
/// such as `pax_global_header` are skipped.
pub fn find_payload_root(extracted: &Path) -> Result<PathBuf> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(extracted)
        .map_err(|e| {
            Error::StructureError(format!("Failed to read {}: {}", extracted.display(), e))
        })?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    dirs.sort();

    if dirs.len() > 1 {
        warn!(
            "Archive has {} top-level directories, using {}",
            dirs.len(),
            dirs[0].display()
        );
    }

    dirs.into_iter().next().ok_or_else(|| {
        Error::StructureError("Archive does not contain a top-level directory".to_string())
    })
}

/// Copy every file under `source` onto `target`, keeping relative paths
pub fn overlay_copy(source: &Path, target: &Path) -> Result<CopyReport> {
    let mut report = CopyReport::default();

    fs::create_dir_all(target).map_err(|e| {
        Error::CopyError(format!("Failed to create {}: {}", target.display(), e))
    })?;

    for entry in WalkDir::new(source).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|e| Error::CopyError(format!("Failed to walk payload: {}", e)))?;

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::CopyError(format!("Unexpected payload path: {}", e)))?;
        let dest = target.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            if !dest.is_dir() {
                fs::create_dir_all(&dest).map_err(|e| {
                    Error::CopyError(format!("Failed to create {}: {}", dest.display(), e))
                })?;
                report.directories += 1;
            }
        } else if file_type.is_file() {
            fs::copy(entry.path(), &dest).map_err(|e| {
                Error::CopyError(format!("Failed to copy {}: {}", relative.display(), e))
            })?;
            report.files += 1;
        } else {
            debug!("Skipping non-regular file {}", relative.display());
        }
    }

    Ok(report)
}

/// Installed WordPress version read from `wp-includes/version.php`
pub fn installed_version(root: &Path) -> Result<Option<String>> {
    let path = root.join(VERSION_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::IoError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )));
        }
    };

    Ok(WP_VERSION
        .captures(&content)
        .map(|caps| caps[1].to_string()))
}

impl ArchiveInstaller for TarballInstaller {
    fn unpack(&self, archive: &Path) -> Result<UnpackedPackage> {
        fs::create_dir_all(&self.scratch_dir).map_err(|e| {
            Error::ExtractError(format!(
                "Failed to create directory {}: {}",
                self.scratch_dir.display(),
                e
            ))
        })?;

        let scratch = tempfile::Builder::new()
            .prefix("gitpress-extract-")
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| Error::ExtractError(format!("Failed to create scratch directory: {}", e)))?;

        debug!("Unpacking {} into {}", archive.display(), scratch.path().display());
        Self::open_archive(archive)?
            .unpack(scratch.path())
            .map_err(|e| Error::ExtractError(format!("Failed to unpack archive: {}", e)))?;

        let payload_root = find_payload_root(scratch.path())?;
        Self::strip_excluded(&payload_root)?;

        info!("Unpacked payload root {}", payload_root.display());
        Ok(UnpackedPackage {
            payload_root,
            scratch: Some(scratch),
        })
    }

    fn install(&self, package: &UnpackedPackage, target: &Path) -> Result<CopyReport> {
        info!(
            "Copying {} over {}",
            package.payload_root.display(),
            target.display()
        );

        let report = overlay_copy(&package.payload_root, target)?;

        info!(
            "Copied {} files ({} new directories)",
            report.files, report.directories
        );
        Ok(report)
    }
}
