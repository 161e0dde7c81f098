// src/updater.rs

//! Update orchestration
//!
//! One run walks the states
//! `Idle → Locked → ResolvingVersion → Downloading → Extracting →
//! Installing → CleaningUp → Unlocked`, writing progress to the update log.
//!
//! Every failure is caught here and becomes a log line plus a boolean; none
//! propagate to the caller. The lock is taken once and released exactly
//! once on every path, before the native updater is tried as a fallback.
//! Scratch files are owned by guards and disappear however the run ends.

use crate::config::Config;
use crate::error::Error;
use crate::fetcher::ArchiveFetcher;
use crate::index::ReleaseIndex;
use crate::installer::{ArchiveInstaller, installed_version};
use crate::lock::UpdateLock;
use crate::log::UpdateLog;
use crate::fallback::FallbackUpdater;
use crate::provider::{ReleaseTag, SourceProvider, compare_versions};
use crate::resolver::VersionResolver;
use crate::store::OptionStore;
use std::cell::Cell;
use std::cmp::Ordering;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, warn};

/// The update type served by the GitHub index
pub const CORE: &str = "core";

/// Log line written when another run holds the lock
pub const IN_PROGRESS_MESSAGE: &str = "An update is already in progress.";

/// Failure points that tests can force
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The latest version cannot be determined
    VersionResolution,
    /// The archive download fails
    Download,
    /// The elapsed-time budget is exhausted at the first check
    Timeout,
}

/// Why a run did not complete through the primary pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Another run holds the lock
    Contention,
    /// The index or provider returned nothing usable
    Resolution,
    /// Download, extraction or copy failed
    Transport,
    /// The archive has no top-level directory
    Structure,
    /// The elapsed-time budget ran out between phases
    Timeout,
    /// The native updater failed or is unavailable
    Fallback,
}

/// Result of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The release was installed from the index
    Success,
    /// Another run was in progress; nothing was touched
    Contention,
    /// The primary pipeline failed and the native updater completed
    FellBack { cause: FailureKind },
    /// The run ended without an update
    Failed(FailureKind),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Locked,
    ResolvingVersion,
    Downloading,
    Extracting,
    Installing,
    CleaningUp,
    Unlocked,
}

/// Collaborators of an update run
pub struct Components<'a> {
    pub lock: &'a dyn UpdateLock,
    pub log: &'a dyn UpdateLog,
    pub index: &'a dyn ReleaseIndex,
    pub provider: &'a dyn SourceProvider,
    pub cache: &'a dyn OptionStore,
    pub fetcher: &'a dyn ArchiveFetcher,
    pub installer: &'a dyn ArchiveInstaller,
    pub fallback: &'a dyn FallbackUpdater,
}

/// Installed and available core versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCheck {
    pub slug: String,
    pub installed: Option<String>,
    pub latest: ReleaseTag,
}

impl VersionCheck {
    pub fn update_available(&self) -> bool {
        match &self.installed {
            Some(installed) => compare_versions(self.latest.version(), installed) == Ordering::Greater,
            None => true,
        }
    }
}

struct Failure {
    kind: FailureKind,
    message: String,
}

impl Failure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Releases the update lock when dropped
struct LockGuard<'l> {
    lock: &'l dyn UpdateLock,
}

impl<'l> LockGuard<'l> {
    fn acquire(lock: &'l dyn UpdateLock) -> Self {
        lock.lock();
        Self { lock }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

pub struct Updater<'a> {
    parts: Components<'a>,
    config: Config,
    target: PathBuf,
    faults: Vec<Fault>,
    state: Cell<State>,
}

impl<'a> Updater<'a> {
    /// Create an updater for the installation at `target`
    pub fn new(parts: Components<'a>, config: Config, target: impl Into<PathBuf>) -> Self {
        Self {
            parts,
            config,
            target: target.into(),
            faults: Vec::new(),
            state: Cell::new(State::Idle),
        }
    }

    /// Force a failure point on every run of this updater
    pub fn with_fault(mut self, fault: Fault) -> Self {
        if !self.faults.contains(&fault) {
            self.faults.push(fault);
        }
        self
    }

    /// State reached by the most recent run
    pub fn state(&self) -> State {
        self.state.get()
    }

    /// Run an update; true only when the primary pipeline installed a release
    pub fn update(&self, kind: &str) -> bool {
        self.run(kind).is_success()
    }

    /// Run an update and report how it ended
    pub fn run(&self, kind: &str) -> Outcome {
        let log = self.parts.log;
        self.enter(State::Idle);
        log.clear();

        if self.parts.lock.is_locked() {
            log.status(IN_PROGRESS_MESSAGE);
            log.finish(false);
            return Outcome::Contention;
        }

        let guard = LockGuard::acquire(self.parts.lock);
        self.enter(State::Locked);
        let result = self.primary(kind);
        drop(guard);
        self.enter(State::Unlocked);

        match result {
            Ok(tag) => {
                log.status(&format!("WordPress {} installed.", tag.version()));
                log.finish(true);
                Outcome::Success
            }
            Err(failure) => {
                log.status(&failure.message);
                self.recover(kind, failure.kind)
            }
        }
    }

    /// Resolve the latest core release and compare it with the installed one
    pub fn check(&self) -> crate::Result<VersionCheck> {
        let (slug, latest) = self.latest_core_release()?;
        Ok(VersionCheck {
            slug,
            installed: installed_version(&self.target)?,
            latest,
        })
    }

    fn enter(&self, state: State) {
        debug!("Update state: {:?} -> {:?}", self.state.get(), state);
        self.state.set(state);
    }

    fn faulted(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }

    fn latest_core_release(&self) -> crate::Result<(String, ReleaseTag)> {
        let source = self.parts.index.core_source()?;
        let slug = source.slug();
        let resolver =
            VersionResolver::new(self.parts.provider, self.parts.cache, self.config.cache_ttl);
        let tag = resolver.resolve(&slug)?;
        Ok((slug, tag))
    }

    fn check_budget(&self, started: Instant) -> Result<(), Failure> {
        let elapsed = started.elapsed();
        if self.faulted(Fault::Timeout) || elapsed > self.config.time_budget {
            return Err(Failure::new(
                FailureKind::Timeout,
                format!(
                    "Update took longer than {}s ({}s elapsed).",
                    self.config.time_budget.as_secs(),
                    elapsed.as_secs()
                ),
            ));
        }
        Ok(())
    }

    /// The GitHub pipeline, from version lookup to cleanup
    fn primary(&self, kind: &str) -> Result<ReleaseTag, Failure> {
        let log = self.parts.log;
        let started = Instant::now();

        self.enter(State::ResolvingVersion);
        if kind != CORE {
            return Err(Failure::new(
                FailureKind::Resolution,
                format!("No GitHub source is configured for '{}' updates.", kind),
            ));
        }
        log.status("Looking up the latest WordPress release...");
        if self.faulted(Fault::VersionResolution) {
            return Err(Failure::new(
                FailureKind::Resolution,
                "Could not determine the latest WordPress version.",
            ));
        }
        let (slug, tag) = self.latest_core_release().map_err(|e| {
            Failure::new(
                FailureKind::Resolution,
                format!("Could not determine the latest WordPress version: {}", e),
            )
        })?;
        log.status(&format!("Latest version is {} ({}).", tag.version(), slug));
        self.check_budget(started)?;

        self.enter(State::Downloading);
        let url = self.parts.provider.download_url(&slug, &tag);
        log.status(&format!("Downloading {}...", url));
        if self.faulted(Fault::Download) {
            return Err(Failure::new(
                FailureKind::Transport,
                "Download failed: simulated network failure.",
            ));
        }
        let archive = self.parts.fetcher.download(&url).map_err(|e| {
            Failure::new(FailureKind::Transport, format!("Download failed: {}", e))
        })?;
        self.check_budget(started)?;

        if !archive.path.is_file() {
            return Err(Failure::new(
                FailureKind::Transport,
                format!("Downloaded archive {} is missing.", archive.path.display()),
            ));
        }
        log.status(&format!(
            "Downloaded {} bytes (sha256 {}).",
            archive.size, archive.sha256
        ));
        self.check_budget(started)?;

        self.enter(State::Extracting);
        log.status("Extracting archive...");
        let package = self.parts.installer.unpack(&archive.path).map_err(|e| {
            let kind = match e {
                Error::StructureError(_) => FailureKind::Structure,
                _ => FailureKind::Transport,
            };
            Failure::new(kind, format!("Extraction failed: {}", e))
        })?;

        self.enter(State::Installing);
        log.status(&format!("Installing into {}...", self.target.display()));
        let report = self
            .parts
            .installer
            .install(&package, &self.target)
            .map_err(|e| Failure::new(FailureKind::Transport, format!("Install failed: {}", e)))?;
        log.status(&format!("Copied {} files.", report.files));

        self.enter(State::CleaningUp);
        if let Err(e) = package.cleanup() {
            warn!("{}", e);
        }
        drop(archive);
        match VersionResolver::invalidate_all(self.parts.cache) {
            Ok(count) => debug!("Dropped {} cached version lookups", count),
            Err(e) => warn!("Failed to clear version cache: {}", e),
        }

        Ok(tag)
    }

    /// Hand the update to the native updater, unless disabled
    fn recover(&self, kind: &str, cause: FailureKind) -> Outcome {
        let log = self.parts.log;

        if self.config.disable_fallback {
            log.status("Fallback to the built-in updater is disabled.");
            log.finish(false);
            return Outcome::Failed(cause);
        }

        log.status("Falling back to the built-in WordPress updater...");
        match self.parts.fallback.update(kind, log) {
            Ok(()) => {
                log.status("The built-in updater finished.");
                log.finish(true);
                Outcome::FellBack { cause }
            }
            Err(e) => {
                log.status(&e.to_string());
                log.finish(false);
                Outcome::Failed(FailureKind::Fallback)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::DownloadedArchive;
    use crate::index::CoreSource;
    use crate::installer::{CopyReport, UnpackedPackage};
    use crate::log::{FileLog, LogEntry};
    use crate::store::MemoryStore;
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;
    use tempfile::{TempDir, tempdir};

    #[derive(Default)]
    struct RecordingLock {
        held: Cell<bool>,
        lock_calls: Cell<u32>,
        unlock_calls: Cell<u32>,
    }

    impl UpdateLock for RecordingLock {
        fn lock(&self) {
            self.lock_calls.set(self.lock_calls.get() + 1);
            self.held.set(true);
        }

        fn is_locked(&self) -> bool {
            self.held.get()
        }

        fn unlock(&self) {
            self.unlock_calls.set(self.unlock_calls.get() + 1);
            self.held.set(false);
        }

        fn release_if_expired(&self) -> bool {
            false
        }
    }

    struct StaticIndex(Option<&'static str>);

    impl ReleaseIndex for StaticIndex {
        fn core_source(&self) -> crate::Result<CoreSource> {
            match self.0 {
                Some(repository) => Ok(CoreSource {
                    repository: repository.to_string(),
                }),
                None => Err(Error::DownloadError("index unreachable".to_string())),
            }
        }
    }

    struct FakeProvider {
        tag: Option<&'static str>,
        requested: RefCell<Vec<(String, String)>>,
    }

    impl SourceProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        fn latest_version(&self, _slug: &str) -> crate::Result<Option<ReleaseTag>> {
            Ok(self.tag.map(ReleaseTag::new))
        }

        fn download_url(&self, slug: &str, tag: &ReleaseTag) -> String {
            self.requested
                .borrow_mut()
                .push((slug.to_string(), tag.version().to_string()));
            format!("https://example.com/{}/{}.tar.gz", slug, tag.name)
        }
    }

    struct FakeFetcher {
        dir: PathBuf,
        fail: bool,
        calls: Cell<u32>,
    }

    impl ArchiveFetcher for FakeFetcher {
        fn download(&self, _url: &str) -> crate::Result<DownloadedArchive> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(Error::DownloadError("connection reset".to_string()));
            }
            let path = self.dir.join("gitpress-test.tar.gz");
            fs::write(&path, b"archive").unwrap();
            Ok(DownloadedArchive {
                path,
                size: 7,
                sha256: "abc".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct FakeInstaller {
        structure_error: bool,
        unpack_calls: Cell<u32>,
        install_calls: Cell<u32>,
    }

    impl ArchiveInstaller for FakeInstaller {
        fn unpack(&self, archive: &Path) -> crate::Result<UnpackedPackage> {
            self.unpack_calls.set(self.unpack_calls.get() + 1);
            assert!(archive.exists());
            if self.structure_error {
                return Err(Error::StructureError("no top-level directory".to_string()));
            }
            Ok(UnpackedPackage::at(archive.parent().unwrap()))
        }

        fn install(&self, _package: &UnpackedPackage, _target: &Path) -> crate::Result<CopyReport> {
            self.install_calls.set(self.install_calls.get() + 1);
            Ok(CopyReport {
                files: 3,
                directories: 1,
            })
        }
    }

    struct FakeFallback {
        succeed: bool,
        calls: RefCell<Vec<String>>,
    }

    impl FallbackUpdater for FakeFallback {
        fn update(&self, kind: &str, log: &dyn UpdateLog) -> crate::Result<()> {
            self.calls.borrow_mut().push(kind.to_string());
            log.status("native updater ran");
            if self.succeed {
                Ok(())
            } else {
                Err(Error::FallbackError("no filesystem access".to_string()))
            }
        }
    }

    struct Harness {
        dir: TempDir,
        lock: RecordingLock,
        log: FileLog,
        index: StaticIndex,
        provider: FakeProvider,
        cache: MemoryStore,
        fetcher: FakeFetcher,
        installer: FakeInstaller,
        fallback: FakeFallback,
        config: Config,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let log = FileLog::new(dir.path().join("update.log"));
            let fetcher = FakeFetcher {
                dir: dir.path().to_path_buf(),
                fail: false,
                calls: Cell::new(0),
            };
            Self {
                lock: RecordingLock::default(),
                log,
                index: StaticIndex(Some("https://github.com/WordPress/WordPress/")),
                provider: FakeProvider {
                    tag: Some("6.5.2"),
                    requested: RefCell::new(Vec::new()),
                },
                cache: MemoryStore::new(),
                fetcher,
                installer: FakeInstaller::default(),
                fallback: FakeFallback {
                    succeed: true,
                    calls: RefCell::new(Vec::new()),
                },
                config: Config::default(),
                dir,
            }
        }

        fn updater(&self) -> Updater<'_> {
            Updater::new(
                Components {
                    lock: &self.lock,
                    log: &self.log,
                    index: &self.index,
                    provider: &self.provider,
                    cache: &self.cache,
                    fetcher: &self.fetcher,
                    installer: &self.installer,
                    fallback: &self.fallback,
                },
                self.config.clone(),
                self.dir.path().join("site"),
            )
        }

        fn messages(&self) -> Vec<String> {
            self.log
                .entries()
                .unwrap()
                .iter()
                .map(|entry| entry.message().to_string())
                .collect()
        }

        fn last_entry(&self) -> LogEntry {
            self.log.entries().unwrap().pop().unwrap()
        }

        fn assert_released_once(&self) {
            assert_eq!(self.lock.lock_calls.get(), 1);
            assert_eq!(self.lock.unlock_calls.get(), 1);
            assert!(!self.lock.held.get());
        }
    }

    #[test]
    fn test_successful_run() {
        let h = Harness::new();
        let updater = h.updater();

        assert!(updater.update(CORE));

        assert_eq!(
            *h.provider.requested.borrow(),
            vec![("WordPress/WordPress".to_string(), "6.5.2".to_string())]
        );
        assert_eq!(h.installer.install_calls.get(), 1);
        assert_eq!(h.last_entry(), LogEntry::Success);
        assert!(h.fallback.calls.borrow().is_empty());
        assert_eq!(updater.state(), State::Unlocked);
        h.assert_released_once();

        // Scratch archive and version cache are gone
        assert!(!h.dir.path().join("gitpress-test.tar.gz").exists());
        assert!(
            h.cache
                .get_transient("gitpress_version_WordPress/WordPress")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_contention_touches_nothing() {
        let h = Harness::new();
        h.lock.held.set(true);

        let outcome = h.updater().run(CORE);

        assert_eq!(outcome, Outcome::Contention);
        assert_eq!(h.messages(), vec![IN_PROGRESS_MESSAGE, crate::log::FAILURE_GLYPH]);
        assert_eq!(h.lock.lock_calls.get(), 0);
        assert_eq!(h.lock.unlock_calls.get(), 0);
        assert!(h.lock.held.get());
        assert_eq!(h.fetcher.calls.get(), 0);
    }

    #[test]
    fn test_download_failure_falls_back() {
        let mut h = Harness::new();
        h.fetcher.fail = true;

        let outcome = h.updater().run(CORE);

        assert_eq!(
            outcome,
            Outcome::FellBack {
                cause: FailureKind::Transport
            }
        );
        assert_eq!(h.installer.unpack_calls.get(), 0);
        assert!(h.messages().iter().any(|m| m.starts_with("Download failed")));
        assert_eq!(*h.fallback.calls.borrow(), vec!["core"]);
        assert_eq!(h.last_entry(), LogEntry::Success);
        h.assert_released_once();
    }

    #[test]
    fn test_download_failure_without_fallback_fails() {
        let mut h = Harness::new();
        h.fetcher.fail = true;
        h.config.disable_fallback = true;

        let updater = h.updater();
        assert!(!updater.update(CORE));

        assert_eq!(h.installer.unpack_calls.get(), 0);
        assert!(h.fallback.calls.borrow().is_empty());
        assert_eq!(h.last_entry(), LogEntry::Failure);
        h.assert_released_once();
    }

    #[test]
    fn test_structure_failure_falls_back() {
        let mut h = Harness::new();
        h.installer.structure_error = true;

        let outcome = h.updater().run(CORE);

        assert_eq!(
            outcome,
            Outcome::FellBack {
                cause: FailureKind::Structure
            }
        );
        assert_eq!(h.installer.install_calls.get(), 0);
        assert!(!h.dir.path().join("gitpress-test.tar.gz").exists());
        h.assert_released_once();
    }

    #[test]
    fn test_fallback_failure_is_failure() {
        let mut h = Harness::new();
        h.fetcher.fail = true;
        h.fallback.succeed = false;

        let updater = h.updater();
        assert_eq!(updater.run(CORE), Outcome::Failed(FailureKind::Fallback));
        assert!(!updater.update(CORE));

        let messages = h.messages();
        assert!(messages.contains(&"native updater ran".to_string()));
        assert!(messages.iter().any(|m| m.contains("no filesystem access")));
        assert_eq!(h.last_entry(), LogEntry::Failure);
        assert_eq!(h.lock.lock_calls.get(), h.lock.unlock_calls.get());
    }

    #[test]
    fn test_fault_version_resolution() {
        let h = Harness::new();
        let updater = h.updater().with_fault(Fault::VersionResolution);

        assert_eq!(
            updater.run(CORE),
            Outcome::FellBack {
                cause: FailureKind::Resolution
            }
        );
        assert!(h.provider.requested.borrow().is_empty());
        assert_eq!(h.fetcher.calls.get(), 0);
        h.assert_released_once();
    }

    #[test]
    fn test_fault_download() {
        let h = Harness::new();
        let updater = h.updater().with_fault(Fault::Download);

        assert_eq!(
            updater.run(CORE),
            Outcome::FellBack {
                cause: FailureKind::Transport
            }
        );
        assert_eq!(h.fetcher.calls.get(), 0);
        assert_eq!(h.installer.unpack_calls.get(), 0);
        h.assert_released_once();
    }

    #[test]
    fn test_fault_timeout() {
        let mut h = Harness::new();
        h.config.disable_fallback = true;
        let updater = h.updater().with_fault(Fault::Timeout);

        assert_eq!(updater.run(CORE), Outcome::Failed(FailureKind::Timeout));
        assert_eq!(h.fetcher.calls.get(), 0);
        assert!(h.messages().iter().any(|m| m.starts_with("Update took longer")));
        h.assert_released_once();
    }

    #[test]
    fn test_empty_tag_listing_is_resolution_failure() {
        let mut h = Harness::new();
        h.provider.tag = None;

        assert_eq!(
            h.updater().run(CORE),
            Outcome::FellBack {
                cause: FailureKind::Resolution
            }
        );
        h.assert_released_once();
    }

    #[test]
    fn test_unreachable_index_is_resolution_failure() {
        let mut h = Harness::new();
        h.index = StaticIndex(None);
        h.config.disable_fallback = true;

        assert_eq!(h.updater().run(CORE), Outcome::Failed(FailureKind::Resolution));
        assert!(h.messages().iter().any(|m| m.contains("index unreachable")));
    }

    #[test]
    fn test_other_types_go_to_fallback() {
        let h = Harness::new();

        assert_eq!(
            h.updater().run("plugins"),
            Outcome::FellBack {
                cause: FailureKind::Resolution
            }
        );
        assert_eq!(*h.fallback.calls.borrow(), vec!["plugins"]);
        assert_eq!(h.fetcher.calls.get(), 0);
    }

    #[test]
    fn test_log_is_cleared_between_runs() {
        let h = Harness::new();
        let updater = h.updater();
        updater.run(CORE);
        updater.run(CORE);

        let terminal = h
            .log
            .entries()
            .unwrap()
            .iter()
            .filter(|entry| entry.is_terminal())
            .count();
        assert_eq!(terminal, 1);
    }

    #[test]
    fn test_check_reports_available_update() {
        let h = Harness::new();
        let site = h.dir.path().join("site/wp-includes");
        fs::create_dir_all(&site).unwrap();
        fs::write(site.join("version.php"), "<?php $wp_version = '6.4.3';").unwrap();

        let check = h.updater().check().unwrap();
        assert_eq!(check.slug, "WordPress/WordPress");
        assert_eq!(check.installed.as_deref(), Some("6.4.3"));
        assert!(check.update_available());
    }

    #[test]
    fn test_version_check_up_to_date() {
        let check = VersionCheck {
            slug: "WordPress/WordPress".to_string(),
            installed: Some("6.5.2".to_string()),
            latest: ReleaseTag::new("v6.5.2"),
        };
        assert!(!check.update_available());
    }
}
