// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use gitpress::config::{self, DEFAULT_DB_PATH};
use gitpress::db::SqliteStore;
use gitpress::fallback::WpCliFallback;
use gitpress::fetcher::HttpFetcher;
use gitpress::index::HttpIndex;
use gitpress::installer::TarballInstaller;
use gitpress::lock::{OptionLock, UpdateLock};
use gitpress::log::{self as update_log, FileLog, LogEntry};
use gitpress::provider::GitHubProvider;
use gitpress::updater::{CORE, Components, Outcome, Updater};
use gitpress::{Config, OptionStore};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "gitpress")]
#[command(author, version, about = "Update WordPress core from GitHub releases", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the Gitpress database
    Init {
        /// Database path (default: /var/lib/gitpress/gitpress.db)
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Update a WordPress installation
    Update {
        /// What to update: core, plugins or themes
        #[arg(default_value = CORE)]
        kind: String,
        /// WordPress installation root
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
        /// Database path (default: /var/lib/gitpress/gitpress.db)
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
        /// Update log path (default: <root>/wp-content/uploads/gitpress-update.log)
        #[arg(short, long)]
        log_path: Option<PathBuf>,
        /// Do not fall back to the built-in updater
        #[arg(long)]
        no_fallback: bool,
        /// Release index URL for this run
        #[arg(long)]
        index_url: Option<String>,
    },
    /// Compare the installed core version with the latest release
    Check {
        /// WordPress installation root
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
        /// Database path (default: /var/lib/gitpress/gitpress.db)
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
        /// Release index URL for this run
        #[arg(long)]
        index_url: Option<String>,
    },
    /// Show the update log
    Log {
        /// WordPress installation root
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
        /// Update log path (default: <root>/wp-content/uploads/gitpress-update.log)
        #[arg(short, long)]
        log_path: Option<PathBuf>,
        /// Keep reading until the run finishes
        #[arg(short, long)]
        follow: bool,
    },
    /// Inspect or clear the update lock
    Lock {
        #[command(subcommand)]
        action: LockAction,
        /// Database path (default: /var/lib/gitpress/gitpress.db)
        #[arg(short, long, default_value = DEFAULT_DB_PATH, global = true)]
        db_path: String,
    },
    /// Clear an abandoned lock and expired cache entries
    Sweep {
        /// Database path (default: /var/lib/gitpress/gitpress.db)
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
        /// Repeat every N seconds instead of running once
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Manage stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
        /// Database path (default: /var/lib/gitpress/gitpress.db)
        #[arg(short, long, default_value = DEFAULT_DB_PATH, global = true)]
        db_path: String,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum LockAction {
    /// Show whether an update holds the lock
    Status,
    /// Release the lock unconditionally
    Release,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective value of a setting
    Get { key: String },
    /// Store a setting
    Set { key: String, value: String },
    /// Remove a stored setting
    Unset { key: String },
    /// Print every setting
    List,
}

/// Stored settings with per-invocation overrides applied
fn load_config(store: &dyn OptionStore, index_url: Option<&str>, no_fallback: bool) -> Result<Config> {
    let mut config = Config::load(store)?;
    if let Some(url) = index_url {
        config.apply("index_url", url)?;
    }
    if no_fallback {
        config.disable_fallback = true;
    }
    Ok(config)
}

fn log_path_for(root: &Path, log_path: Option<PathBuf>) -> PathBuf {
    log_path.unwrap_or_else(|| config::default_log_path(root))
}

fn print_entry(entry: &LogEntry) {
    match entry {
        LogEntry::Status {
            timestamp: Some(ts),
            message,
        } => println!("[{}] {}", ts.format("%Y-%m-%d %H:%M:%S"), message),
        other => println!("{}", other.message()),
    }
}

fn github_token() -> Option<String> {
    std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty())
}

fn sweep_once(store: &SqliteStore) -> Result<()> {
    let lock = OptionLock::new(store);
    if lock.release_if_expired() {
        println!("Released an abandoned update lock.");
    }
    let purged = store.purge_expired_transients()?;
    if purged > 0 {
        println!("Purged {} expired cache entries.", purged);
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { db_path }) => {
            info!("Initializing Gitpress database at: {}", db_path);
            gitpress::db::init(&db_path)?;
            println!("Database initialized successfully at: {}", db_path);
            Ok(())
        }
        Some(Commands::Update {
            kind,
            root,
            db_path,
            log_path,
            no_fallback,
            index_url,
        }) => {
            let store = SqliteStore::open(&db_path)?;
            let config = load_config(&store, index_url.as_deref(), no_fallback)?;
            let log_path = log_path_for(&root, log_path);
            info!("Updating {} in {}", kind, root.display());

            let lock = OptionLock::new(&store);
            let log = FileLog::new(&log_path);
            let index = HttpIndex::new(&config.index_url)?;
            let provider = GitHubProvider::new(github_token().as_deref())?;
            let scratch = config.scratch_dir.clone();
            let fetcher = HttpFetcher::new(&scratch)?;
            let installer = TarballInstaller::new(&scratch);
            let fallback = WpCliFallback::new(&config.wp_cli, &root);

            let updater = Updater::new(
                Components {
                    lock: &lock,
                    log: &log,
                    index: &index,
                    provider: &provider,
                    cache: &store,
                    fetcher: &fetcher,
                    installer: &installer,
                    fallback: &fallback,
                },
                config,
                &root,
            );

            match updater.run(&kind) {
                Outcome::Success => {
                    println!("Update complete. Log: {}", log_path.display());
                    Ok(())
                }
                Outcome::FellBack { cause } => {
                    println!(
                        "GitHub update failed ({:?}); the built-in updater completed it.",
                        cause
                    );
                    println!("Log: {}", log_path.display());
                    Ok(())
                }
                Outcome::Contention => Err(anyhow::anyhow!("An update is already in progress")),
                Outcome::Failed(kind) => Err(anyhow::anyhow!(
                    "Update failed ({:?}); see {}",
                    kind,
                    log_path.display()
                )),
            }
        }
        Some(Commands::Check {
            root,
            db_path,
            index_url,
        }) => {
            let store = SqliteStore::open(&db_path)?;
            let config = load_config(&store, index_url.as_deref(), false)?;

            let lock = OptionLock::new(&store);
            let log = FileLog::new(log_path_for(&root, None));
            let index = HttpIndex::new(&config.index_url)?;
            let provider = GitHubProvider::new(github_token().as_deref())?;
            let scratch = config.scratch_dir.clone();
            let fetcher = HttpFetcher::new(&scratch)?;
            let installer = TarballInstaller::new(&scratch);
            let fallback = WpCliFallback::new(&config.wp_cli, &root);

            let updater = Updater::new(
                Components {
                    lock: &lock,
                    log: &log,
                    index: &index,
                    provider: &provider,
                    cache: &store,
                    fetcher: &fetcher,
                    installer: &installer,
                    fallback: &fallback,
                },
                config,
                &root,
            );

            let check = updater.check()?;
            println!("Repository: {}", check.slug);
            println!(
                "Installed:  {}",
                check.installed.as_deref().unwrap_or("unknown")
            );
            println!("Latest:     {}", check.latest.version());
            if check.update_available() {
                println!("An update is available.");
            } else {
                println!("WordPress is up to date.");
            }
            Ok(())
        }
        Some(Commands::Log {
            root,
            log_path,
            follow,
        }) => {
            let path = log_path_for(&root, log_path);
            if follow {
                let succeeded = update_log::follow(&path, Duration::from_secs(1), print_entry)?;
                if !succeeded {
                    return Err(anyhow::anyhow!("The update failed"));
                }
            } else {
                let entries = update_log::read_entries(&path)?;
                if entries.is_empty() {
                    println!("The update log is empty.");
                }
                entries.iter().for_each(print_entry);
            }
            Ok(())
        }
        Some(Commands::Lock { action, db_path }) => {
            let store = SqliteStore::open(&db_path)?;
            let lock = OptionLock::new(&store);
            match action {
                LockAction::Status => {
                    if lock.is_locked() {
                        match lock.acquired_at() {
                            Some(at) => println!("Locked since {}", at.to_rfc3339()),
                            None => println!("Locked"),
                        }
                    } else {
                        println!("Unlocked");
                    }
                }
                LockAction::Release => {
                    lock.unlock();
                    println!("Update lock released.");
                }
            }
            Ok(())
        }
        Some(Commands::Sweep { db_path, interval }) => {
            let store = SqliteStore::open(&db_path)?;
            match interval {
                None => sweep_once(&store),
                Some(secs) => {
                    info!("Sweeping every {}s", secs);
                    loop {
                        sweep_once(&store)?;
                        std::thread::sleep(Duration::from_secs(secs.max(1)));
                    }
                }
            }
        }
        Some(Commands::Config { action, db_path }) => {
            let store = SqliteStore::open(&db_path)?;
            match action {
                ConfigAction::Get { key } => {
                    let config = Config::load(&store)?;
                    let value = config
                        .get(&key)
                        .ok_or_else(|| anyhow::anyhow!("Unknown setting '{}'", key))?;
                    println!("{}", value);
                }
                ConfigAction::Set { key, value } => {
                    Config::set(&store, &key, &value)?;
                    println!("{} = {}", key, value);
                }
                ConfigAction::Unset { key } => {
                    Config::unset(&store, &key)?;
                    println!("{} reset to its default", key);
                }
                ConfigAction::List => {
                    let config = Config::load(&store)?;
                    for key in config::KEYS {
                        println!("{} = {}", key, config.get(key).unwrap_or_default());
                    }
                }
            }
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "gitpress", &mut std::io::stdout());
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("Gitpress v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'gitpress --help' for usage information");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitpress::store::MemoryStore;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_update_defaults_to_core() {
        let cli = Cli::try_parse_from(["gitpress", "update"]).unwrap();
        match cli.command {
            Some(Commands::Update {
                kind,
                db_path,
                no_fallback,
                ..
            }) => {
                assert_eq!(kind, "core");
                assert_eq!(db_path, DEFAULT_DB_PATH);
                assert!(!no_fallback);
            }
            _ => panic!("expected update command"),
        }
    }

    #[test]
    fn test_lock_accepts_db_path_after_action() {
        let cli =
            Cli::try_parse_from(["gitpress", "lock", "release", "--db-path", "/tmp/x.db"]).unwrap();
        match cli.command {
            Some(Commands::Lock {
                action: LockAction::Release,
                db_path,
            }) => assert_eq!(db_path, "/tmp/x.db"),
            _ => panic!("expected lock release"),
        }
    }

    #[test]
    fn test_load_config_overrides() {
        let store = MemoryStore::new();
        Config::set(&store, "index_url", "https://stored.example.com").unwrap();

        let config = load_config(&store, Some("https://flag.example.com/"), true).unwrap();
        assert_eq!(config.index_url, "https://flag.example.com");
        assert!(config.disable_fallback);

        let config = load_config(&store, None, false).unwrap();
        assert_eq!(config.index_url, "https://stored.example.com");
        assert!(!config.disable_fallback);
    }

    #[test]
    fn test_load_config_rejects_bad_url_flag() {
        let store = MemoryStore::new();
        assert!(load_config(&store, Some("not-a-url"), false).is_err());
    }

    #[test]
    fn test_log_path_default() {
        assert_eq!(
            log_path_for(Path::new("/srv/www"), None),
            PathBuf::from("/srv/www/wp-content/uploads/gitpress-update.log")
        );
        assert_eq!(
            log_path_for(Path::new("/srv/www"), Some(PathBuf::from("/tmp/u.log"))),
            PathBuf::from("/tmp/u.log")
        );
    }
}
