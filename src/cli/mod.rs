pub mod daemon_path;
pub mod process;
pub mod summary;

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use process::{daemon_executable, kill_previous_servers, restart_server};
use summary::{process_today_command, TodayCommand};
use tracing::level_filters::LevelFilter;

use crate::{
    daemon::{
        capture::arena::{purge_expired, ScreenshotArena, SCREENSHOTS_DIR_NAME},
        config::TrackerConfig,
        start_daemon,
        storage::activity_store::{SqliteActivityStore, DB_FILE_NAME},
    },
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX, DAEMON_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "worktrace", version, long_about = None)]
#[command(about = "Tracks which project you are working on", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default $WORKTRACE_DIR, $XDG_STATE_HOME/worktrace or $HOME/.local/state/worktrace"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts a daemon for the application, replacing running ones")]
    Init {},
    #[command(
        about = "Run the tracker directly in current console. Used for debugging and service managers"
    )]
    Serve {},
    #[command(about = "Stop currently running daemon.")]
    Stop {},
    #[command(about = "Summary of tracked time for a day")]
    Today {
        #[command(flatten)]
        command: TodayCommand,
    },
    #[command(about = "Delete screenshots older than the retention window")]
    Purge {
        #[arg(long, help = "Retention in days. Defaults to retention_days from config.json")]
        days: Option<u32>,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();
    let dir = args.dir.map_or_else(create_application_default_path, Ok)?;

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    let prefix = match args.commands {
        Commands::Serve {} => DAEMON_PREFIX,
        _ => CLI_PREFIX,
    };
    enable_logging(prefix, &dir.join("logs"), logging_level, args.log)?;

    match args.commands {
        Commands::Init {} => restart_server(Some(dir.as_path())),
        Commands::Stop {} => {
            let stopped = kill_previous_servers(&daemon_executable()?)?;
            println!("Stopped {stopped} daemons");
            Ok(())
        }
        Commands::Serve {} => start_daemon(dir).await,
        Commands::Today { command } => process_today_command(command, &dir),
        Commands::Purge { days } => purge(&dir, days),
    }
}

fn purge(dir: &std::path::Path, days: Option<u32>) -> Result<()> {
    let retention_days = match days {
        Some(days) => days,
        None => TrackerConfig::load(dir)?.retention_days,
    };
    let mut store = SqliteActivityStore::open(&dir.join(DB_FILE_NAME))?;
    let arena = ScreenshotArena::new(dir.join(SCREENSHOTS_DIR_NAME));
    let report = purge_expired(&arena, &mut store, retention_days, Utc::now());
    println!(
        "Removed {} screenshot days and {} screenshot rows",
        report.removed_dirs, report.removed_rows
    );
    Ok(())
}
