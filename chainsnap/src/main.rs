//! chainsnap - Main entry point

use anyhow::{Context, Result};
use chainsnap::config::{Config, ConfigLayout, Settings};
use chainsnap::executor::{self, ReportFormat};
use chainsnap::utils;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration directory (default: $XDG_CONFIG_HOME/chainsnap)
    #[arg(long, value_name = "DIR", global = true)]
    config_dir: Option<PathBuf>,

    /// Log external commands without running them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the next snapshot
    Back,

    /// Verify the latest snapshot against the source
    Check {
        /// Only check this subdirectory
        subdir: Option<PathBuf>,
    },

    /// Attribute storage growth to snapshots from a size report
    Sz {
        /// Report file (`.gz` and `.zst` are decompressed)
        report: PathBuf,

        /// List the files each snapshot introduced
        #[arg(short, long)]
        verbose: bool,

        /// Print totals as JSON
        #[arg(long, conflicts_with = "verbose")]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Sz {
            report,
            verbose,
            json,
        } => {
            utils::logger::init(args.log_level.as_deref().unwrap_or("info"))?;
            let format = if json {
                ReportFormat::Json
            } else {
                ReportFormat::Text { verbose }
            };
            let mut stdout = std::io::stdout().lock();
            executor::run_size_report(&report, format, &mut stdout)
                .with_context(|| format!("sz {}", report.display()))?;
        }
        Command::Back => {
            let config = load_config(&args.config_dir, args.dry_run, &args.log_level)?;
            executor::run_backup(&config).await.context("back")?;
        }
        Command::Check { subdir } => {
            let config = load_config(&args.config_dir, args.dry_run, &args.log_level)?;
            executor::run_check(&config, subdir).await.context("check")?;
        }
    }

    Ok(())
}

/// Resolve the configuration directory, load settings and start logging.
fn load_config(
    config_dir: &Option<PathBuf>,
    dry_run: bool,
    log_level: &Option<String>,
) -> Result<Config> {
    let layout = ConfigLayout::from_env(config_dir.clone())?;
    let mut settings = Settings::load_or_default(&layout.settings)
        .with_context(|| format!("loading {}", layout.settings.display()))?;
    if dry_run {
        settings.dry_run = true;
    }

    // Initialize logging
    let level = log_level.as_deref().unwrap_or(&settings.log_level);
    utils::logger::init(level)?;

    tracing::info!(
        "Starting chainsnap v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        layout.base_dir.display()
    );

    Config::load(layout, settings).context("configuration")
}
