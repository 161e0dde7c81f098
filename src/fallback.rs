// src/fallback.rs

//! Native updater fallback
//!
//! When the GitHub pipeline cannot finish, the update is handed to WordPress's
//! own updater through WP-CLI. Its output goes to the same update log line by
//! line while it runs; stderr follows once the process exits.

use crate::error::{Error, Result};
use crate::log::UpdateLog;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Runs the host platform's built-in updater
pub trait FallbackUpdater {
    fn update(&self, kind: &str, log: &dyn UpdateLog) -> Result<()>;
}

/// [`FallbackUpdater`] that shells out to `wp`
pub struct WpCliFallback {
    binary: String,
    root: PathBuf,
}

impl WpCliFallback {
    /// `binary` is the WP-CLI executable, `root` the WordPress installation
    pub fn new(binary: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            root: root.into(),
        }
    }

    /// WP-CLI arguments for an update type
    fn args_for(&self, kind: &str) -> Result<Vec<String>> {
        let args: &[&str] = match kind {
            "core" => &["core", "update"],
            "plugin" | "plugins" => &["plugin", "update", "--all"],
            "theme" | "themes" => &["theme", "update", "--all"],
            _ => {
                return Err(Error::FallbackError(format!(
                    "The built-in updater cannot update '{}'",
                    kind
                )));
            }
        };

        let mut args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        args.push(format!("--path={}", self.root.display()));
        Ok(args)
    }
}

impl FallbackUpdater for WpCliFallback {
    fn update(&self, kind: &str, log: &dyn UpdateLog) -> Result<()> {
        let args = self.args_for(kind)?;
        info!("Running {} {}", self.binary, args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::FallbackError(format!(
                    "The built-in updater is unavailable ({}): {}",
                    self.binary, e
                ))
            })?;

        // Drained on its own thread so a full stderr pipe cannot stall stdout
        let stderr = child.stderr.take().map(|stderr| {
            std::thread::spawn(move || {
                BufReader::new(stderr)
                    .lines()
                    .map_while(io::Result::ok)
                    .collect::<Vec<_>>()
            })
        });

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(io::Result::ok) {
                forward(log, &line);
            }
        }

        let status = child.wait()?;

        if let Some(handle) = stderr {
            for line in handle.join().unwrap_or_default() {
                forward(log, &line);
            }
        }

        if !status.success() {
            return Err(Error::FallbackError(format!(
                "The built-in updater exited with {}",
                status
            )));
        }

        debug!("Built-in updater finished");
        Ok(())
    }
}

fn forward(log: &dyn UpdateLog, line: &str) {
    let line = line.trim();
    if !line.is_empty() {
        log.status(line);
    }
}
