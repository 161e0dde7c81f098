// src/log.rs

//! Update progress log
//!
//! A flat text file that the updater writes and a separate client polls.
//! Status lines are prefixed with an RFC 3339 UTC timestamp. A run ends with
//! one of two bare sentinel lines, [`SUCCESS_GLYPH`] or [`FAILURE_GLYPH`];
//! pollers stop on either and treat every other line as progress.
//!
//! The log is truncated when a run starts and only appended to afterwards.
//! Write failures are reported through `tracing` and otherwise ignored so a
//! broken log never aborts an update.

use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Final line of a run whose update completed
pub const SUCCESS_GLYPH: &str = "✅";

/// Final line of a run that ended in failure
pub const FAILURE_GLYPH: &str = "❌";

/// Sink for update progress
pub trait UpdateLog {
    /// Discard everything written by earlier runs
    fn clear(&self);

    /// Append one raw line
    fn write_line(&self, line: &str);

    /// Append a timestamped status message
    fn status(&self, message: &str) {
        info!("{}", message);
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        self.write_line(&format!("{} {}", stamp, message));
    }

    /// Append the sentinel that ends a run
    fn finish(&self, success: bool) {
        self.write_line(if success { SUCCESS_GLYPH } else { FAILURE_GLYPH });
    }
}

/// One parsed log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Status {
        timestamp: Option<DateTime<Utc>>,
        message: String,
    },
    Success,
    Failure,
}

impl LogEntry {
    pub fn parse(line: &str) -> Self {
        match line.trim_end() {
            SUCCESS_GLYPH => return LogEntry::Success,
            FAILURE_GLYPH => return LogEntry::Failure,
            _ => {}
        }

        if let Some((stamp, message)) = line.split_once(' ') {
            if let Ok(timestamp) = DateTime::parse_from_rfc3339(stamp) {
                return LogEntry::Status {
                    timestamp: Some(timestamp.with_timezone(&Utc)),
                    message: message.to_string(),
                };
            }
        }

        LogEntry::Status {
            timestamp: None,
            message: line.to_string(),
        }
    }

    /// Whether this line ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, LogEntry::Success | LogEntry::Failure)
    }

    /// The human-readable text of this line
    pub fn message(&self) -> &str {
        match self {
            LogEntry::Status { message, .. } => message,
            LogEntry::Success => SUCCESS_GLYPH,
            LogEntry::Failure => FAILURE_GLYPH,
        }
    }
}

/// [`UpdateLog`] backed by a world-readable file
#[derive(Debug, Clone)]
pub struct FileLog {
    path: PathBuf,
}

impl FileLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse every line currently in the log
    pub fn entries(&self) -> Result<Vec<LogEntry>> {
        read_entries(&self.path)
    }

    fn truncate(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        File::create(&self.path)?;
        make_world_readable(&self.path)?;
        Ok(())
    }

    fn append(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

impl UpdateLog for FileLog {
    fn clear(&self) {
        if let Err(e) = self.truncate() {
            warn!("Failed to clear update log {}: {}", self.path.display(), e);
        }
    }

    fn write_line(&self, line: &str) {
        if let Err(e) = self.append(line) {
            warn!("Failed to write update log {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(unix)]
fn make_world_readable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_world_readable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Parse the log file at `path`; a missing file reads as empty
pub fn read_entries(path: &Path) -> Result<Vec<LogEntry>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.lines().map(LogEntry::parse).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(Error::IoError(format!(
            "Failed to read update log {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Poll the log until a sentinel line appears
///
/// Calls `on_entry` once for every new line. If the log shrinks, a new run
/// has cleared it and reading starts over from the top. Returns whether the
/// run succeeded.
pub fn follow(
    path: &Path,
    interval: Duration,
    mut on_entry: impl FnMut(&LogEntry),
) -> Result<bool> {
    let mut cursor = LogCursor::default();
    loop {
        let entries = read_entries(path)?;
        for entry in cursor.advance(&entries) {
            on_entry(entry);
            if entry.is_terminal() {
                return Ok(*entry == LogEntry::Success);
            }
        }

        std::thread::sleep(interval);
    }
}

/// Position of a reader in a log that may be cleared between reads
#[derive(Debug, Default)]
struct LogCursor {
    seen: usize,
    first: Option<LogEntry>,
}

impl LogCursor {
    /// Entries not yet returned; restarts when the log belongs to a new run
    fn advance<'e>(&mut self, entries: &'e [LogEntry]) -> &'e [LogEntry] {
        let restarted = entries.len() < self.seen || entries.first() != self.first.as_ref();
        if restarted && self.seen > 0 {
            debug!("Update log was restarted");
            self.seen = 0;
        }
        self.first = entries.first().cloned();

        let start = self.seen.min(entries.len());
        self.seen = entries.len();
        &entries[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_status_lines_are_timestamped() {
        let dir = tempdir().unwrap();
        let log = FileLog::new(dir.path().join("update.log"));
        log.clear();
        log.status("Downloading WordPress 6.5.2");

        let raw = fs::read_to_string(log.path()).unwrap();
        let (stamp, message) = raw.trim_end().split_once(' ').unwrap();
        assert!(DateTime::parse_from_rfc3339(stamp).is_ok());
        assert_eq!(message, "Downloading WordPress 6.5.2");
    }

    #[test]
    fn test_sentinels_are_bare_lines() {
        let dir = tempdir().unwrap();
        let log = FileLog::new(dir.path().join("update.log"));
        log.clear();
        log.status("working");
        log.finish(true);

        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().last(), Some(SUCCESS_GLYPH));
        assert_eq!(log.entries().unwrap().last(), Some(&LogEntry::Success));
    }

    #[test]
    fn test_clear_discards_previous_run() {
        let dir = tempdir().unwrap();
        let log = FileLog::new(dir.path().join("nested/update.log"));
        log.clear();
        log.status("old run");
        log.finish(false);

        log.clear();
        assert!(log.entries().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_log_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let log = FileLog::new(dir.path().join("update.log"));
        log.clear();

        let mode = fs::metadata(log.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_parse_untimestamped_line() {
        let entry = LogEntry::parse("plain text line");
        assert_eq!(
            entry,
            LogEntry::Status {
                timestamp: None,
                message: "plain text line".to_string()
            }
        );
        assert!(!entry.is_terminal());
    }

    #[test]
    fn test_missing_log_reads_empty() {
        let dir = tempdir().unwrap();
        assert!(read_entries(&dir.path().join("absent.log")).unwrap().is_empty());
    }

    fn status(message: &str) -> LogEntry {
        LogEntry::parse(&format!("2026-10-19T10:00:00+00:00 {}", message))
    }

    #[test]
    fn test_cursor_returns_only_new_lines() {
        let mut cursor = LogCursor::default();
        let run = vec![status("one"), status("two")];
        assert_eq!(cursor.advance(&run[..1]).len(), 1);
        assert_eq!(cursor.advance(&run), &run[1..]);
        assert!(cursor.advance(&run).is_empty());
    }

    #[test]
    fn test_cursor_restarts_on_longer_new_run() {
        let mut cursor = LogCursor::default();
        let first_run = vec![status("old one"), status("old two")];
        cursor.advance(&first_run);

        let second_run = vec![status("new one"), status("new two"), status("new three")];
        assert_eq!(cursor.advance(&second_run), &second_run[..]);
    }

    #[test]
    fn test_cursor_restarts_on_shorter_new_run() {
        let mut cursor = LogCursor::default();
        cursor.advance(&[status("old one"), status("old two")]);

        let second_run = vec![status("new one")];
        assert_eq!(cursor.advance(&second_run), &second_run[..]);
        assert!(cursor.advance(&[]).is_empty());
    }

    #[test]
    fn test_follow_stops_on_failure() {
        let dir = tempdir().unwrap();
        let log = FileLog::new(dir.path().join("update.log"));
        log.clear();
        log.status("one");
        log.status("two");
        log.finish(false);

        let mut messages = Vec::new();
        let succeeded = follow(log.path(), Duration::from_millis(10), |entry| {
            messages.push(entry.message().to_string())
        })
        .unwrap();

        assert!(!succeeded);
        assert_eq!(messages, vec!["one", "two", FAILURE_GLYPH]);
    }
}
