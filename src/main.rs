//! # nbtables CLI (`nbt`)
//!
//! The `nbt` binary converts Jupyter notebooks into SQLite tables.
//!
//! ## Usage
//!
//! ```bash
//! nbt --config ./config/nbt.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nbt init` | Create the SQLite database and the provenance table |
//! | `nbt file <PATH>...` | Convert notebook files (directories are walked) |
//! | `nbt url <URL>` | Fetch and convert a notebook over HTTP(S) |
//! | `nbt stats` | Summarize converted sources and tables |
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | at least one source converted |
//! | 1 | no loader for the input format |
//! | 2 | conversion failed |
//! | 3 | HTTP request failed |
//! | 4 | no input found |
//! | 103 | proxy rejected or unreachable |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use nbtables::report::ReportMode;
use nbtables::{config, ingest, migrate, stats};

/// nbtables CLI: convert Jupyter notebooks into SQLite tables.
#[derive(Parser)]
#[command(
    name = "nbt",
    about = "nbtables: convert Jupyter notebooks into SQLite tables",
    version,
    long_about = "nbtables walks notebook cells, outputs, and metadata and writes them into a \
    fixed family of relational tables, creating each table on first use and appending to it \
    for every further notebook converted into the same database."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/nbt.toml`. Built-in defaults are used when the
    /// file does not exist.
    #[arg(long, global = true, default_value = "./config/nbt.toml")]
    config: PathBuf,

    /// Output database path. Overrides `[db].path`.
    #[arg(long, short = 'o', global = true)]
    db: Option<PathBuf>,

    /// Result reporting: `human`, `json`, or `off`.
    /// Defaults to `human` when stderr is a terminal, otherwise `off`.
    #[arg(long, global = true, value_enum)]
    report: Option<ReportMode>,

    /// Enable debug logging.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database.
    ///
    /// Creates the SQLite database file and the `_source_info_` table.
    /// Running it multiple times is safe.
    Init,

    /// Convert local notebook files.
    ///
    /// Each path may be a file or a directory; directories are searched
    /// recursively for `*.ipynb` files.
    File {
        /// Files or directories to convert.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Force the input format instead of detecting it from the extension.
        #[arg(long)]
        format: Option<String>,
    },

    /// Fetch a notebook over HTTP(S) and convert it.
    Url {
        /// Notebook URL.
        url: String,

        /// Force the input format instead of detecting it from the URL path.
        #[arg(long)]
        format: Option<String>,

        /// Proxy for the request (overrides `[fetch].proxy`).
        #[arg(long)]
        proxy: Option<String>,
    },

    /// Summarize converted sources and tables.
    Stats,
}

fn init_tracing(level: &str, verbose: bool) {
    let default_level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut cfg = config::load_or_default(&cli.config)?;
    if let Some(db) = cli.db {
        cfg.db.path = db;
    }
    config::validate(&cfg)?;
    init_tracing(&cfg.log.level, cli.verbose);

    let reporter = cli
        .report
        .unwrap_or_else(ReportMode::default_for_tty)
        .reporter();

    let code = match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
            ingest::exit_code::SUCCESS
        }
        Commands::File { paths, format } => {
            ingest::run_file(&cfg, &paths, format.as_deref(), reporter.as_ref())
                .await?
                .exit_code()
        }
        Commands::Url { url, format, proxy } => ingest::run_url(
            &cfg,
            &url,
            format.as_deref(),
            proxy.as_deref(),
            reporter.as_ref(),
        )
        .await?
        .exit_code(),
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
            ingest::exit_code::SUCCESS
        }
    };

    Ok(ExitCode::from(code))
}
