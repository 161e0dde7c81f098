// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

const DB_PATH: &str = "/var/lib/gitpress/gitpress.db";

fn db_path_arg() -> Arg {
    Arg::new("db_path")
        .short('d')
        .long("db-path")
        .value_name("PATH")
        .default_value(DB_PATH)
        .help("Database path")
}

fn root_arg() -> Arg {
    Arg::new("root")
        .short('r')
        .long("root")
        .default_value(".")
        .help("WordPress installation root")
}

fn log_path_arg() -> Arg {
    Arg::new("log_path")
        .short('l')
        .long("log-path")
        .value_name("PATH")
        .help("Update log path (default: <root>/wp-content/uploads/gitpress-update.log)")
}

fn index_url_arg() -> Arg {
    Arg::new("index_url")
        .long("index-url")
        .value_name("URL")
        .help("Release index URL for this run")
}

fn build_cli() -> Command {
    Command::new("gitpress")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gitpress Contributors")
        .about("Update WordPress core from GitHub releases")
        .subcommand_required(false)
        .subcommand(
            Command::new("init")
                .about("Initialize the Gitpress database")
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("update")
                .about("Update a WordPress installation")
                .arg(
                    Arg::new("kind")
                        .default_value("core")
                        .help("What to update: core, plugins or themes"),
                )
                .arg(root_arg())
                .arg(db_path_arg())
                .arg(log_path_arg())
                .arg(
                    Arg::new("no_fallback")
                        .long("no-fallback")
                        .action(ArgAction::SetTrue)
                        .help("Do not fall back to the built-in updater"),
                )
                .arg(index_url_arg()),
        )
        .subcommand(
            Command::new("check")
                .about("Compare the installed core version with the latest release")
                .arg(root_arg())
                .arg(db_path_arg())
                .arg(index_url_arg()),
        )
        .subcommand(
            Command::new("log")
                .about("Show the update log")
                .arg(root_arg())
                .arg(log_path_arg())
                .arg(
                    Arg::new("follow")
                        .short('f')
                        .long("follow")
                        .action(ArgAction::SetTrue)
                        .help("Keep reading until the run finishes"),
                ),
        )
        .subcommand(
            Command::new("lock")
                .about("Inspect or clear the update lock")
                .arg(db_path_arg().global(true))
                .subcommand(Command::new("status").about("Show whether an update holds the lock"))
                .subcommand(Command::new("release").about("Release the lock unconditionally")),
        )
        .subcommand(
            Command::new("sweep")
                .about("Clear an abandoned lock and expired cache entries")
                .arg(db_path_arg())
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("SECS")
                        .help("Repeat every N seconds instead of running once"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Manage stored settings")
                .arg(db_path_arg().global(true))
                .subcommand(
                    Command::new("get")
                        .about("Print the effective value of a setting")
                        .arg(Arg::new("key").required(true)),
                )
                .subcommand(
                    Command::new("set")
                        .about("Store a setting")
                        .arg(Arg::new("key").required(true))
                        .arg(Arg::new("value").required(true)),
                )
                .subcommand(
                    Command::new("unset")
                        .about("Remove a stored setting")
                        .arg(Arg::new("key").required(true)),
                )
                .subcommand(Command::new("list").about("Print every setting")),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("gitpress.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
