use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::App;
use crate::config::{ConfigLoader, PathOverrides};
use crate::repository::Backend;

pub mod commands;

use self::commands::{AnalyzeArgs, AttachAnalysisArgs, CalendarArgs, ListArgs, NewArgs};

const LOG_FILE_NAME: &str = "nurturenote.log";

#[derive(Parser, Debug)]
#[command(
    name = "nurturenote",
    version,
    about = "Caregiver diary with asynchronous entry analysis"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over NURTURENOTE_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over NURTURENOTE_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Base URL of the diary server, overriding `server.base_url`
    #[arg(long)]
    pub server: Option<String>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive TUI (default)
    Tui,
    /// Write a new diary entry
    New(NewArgs),
    /// Print recent entries with their analysis status
    List(ListArgs),
    /// Print a month calendar of entries and the year's progress
    Calendar(CalendarArgs),
    /// Ask the server to analyse the last few days of entries
    Analyze(AnalyzeArgs),
    /// Store an analysis JSON document for an entry (local backend)
    AttachAnalysis(AttachAnalysisArgs),
    /// Submit a canned demo entry
    Demo,
    /// Check that the backend is reachable
    Health,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let overrides = PathOverrides {
        config: cli.config.clone(),
        data_dir: cli.data_dir.clone(),
    };
    let loader = ConfigLoader::discover(&overrides)?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();

    let command = cli.command.unwrap_or(Commands::Tui);
    let sink = match command {
        Commands::Tui => LogSink::File(paths.log_dir.join(LOG_FILE_NAME)),
        _ => LogSink::Stderr,
    };
    init_tracing(&cli.log_level, &sink)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;

    let mut config = loader.load_or_init()?;
    if let Some(url) = cli.server {
        tracing::debug!(%url, "server overridden on the command line");
        config.server.base_url = url;
    }
    let config = Arc::new(config);
    let backend = Backend::open(&config)?;

    match command {
        Commands::Tui => {
            let mut app = App::new(config.clone(), backend)?;
            commands::run_tui(&mut app)
        }
        Commands::New(args) => commands::new_entry(config, &backend, args),
        Commands::List(args) => commands::list_entries(config, &backend, args),
        Commands::Calendar(args) => commands::show_calendar(config, &backend, args),
        Commands::Analyze(args) => commands::analyze_entries(config, &backend, args),
        Commands::AttachAnalysis(args) => commands::attach_analysis(&backend, args),
        Commands::Demo => commands::send_demo_entry(&backend),
        Commands::Health => commands::check_health(&backend),
    }
}

enum LogSink {
    Stderr,
    /// The TUI owns the terminal, so its logs go to a file.
    File(PathBuf),
}

fn init_tracing(level: &str, sink: &LogSink) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match sink {
            LogSink::Stderr => {
                fmt()
                    .with_env_filter(env_filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
            LogSink::File(path) => {
                let file = open_log_file(path)?;
                fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
            }
        }
        Ok(())
    })
    .map(|_| ())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))
}
