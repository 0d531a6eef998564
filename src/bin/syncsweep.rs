//! # Syncsweep CLI
//!
//! Operator interface for scheduled incremental transfers and source cleanup.
//!
//! ## Usage
//! ```bash
//! # Write a config file for a source/destination pair
//! syncsweep --source /data/outgoing --dest /mnt/archive/outgoing init
//!
//! # Validate config, endpoints and state
//! syncsweep check
//!
//! # Transfer everything new or modified (e.g. hourly from cron)
//! syncsweep run-transfer
//!
//! # Remove transferred files from the source (e.g. nightly)
//! syncsweep run-delete
//!
//! # Exclude old data from consideration
//! syncsweep set-time --path /data/outgoing/2019 "2030-01-01 00:00"
//! ```

use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use syncsweep::config::DEFAULT_CONFIG_FILE;
use syncsweep::{
    format_bytes, parse_time, ProgressInfo, Result, SweepConfig, SweepError, Sweeper,
    SweeperBuilder,
};
use tracing_subscriber::EnvFilter;

/// Syncsweep CLI - incremental transfer and cleanup of a source tree
#[derive(Parser)]
#[command(name = "syncsweep")]
#[command(version)]
#[command(about = "Transfer new and modified files, then sweep them from the source")]
#[command(long_about = None)]
struct Cli {
    /// Config file (defaults to ./syncsweep.json when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Source root, overriding the config file
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    /// Destination root, overriding the config file
    #[arg(long, global = true)]
    dest: Option<PathBuf>,

    /// State snapshot, overriding the config file
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Show a progress spinner
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file from --source/--dest
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,

        /// Ignore patterns (glob syntax)
        #[arg(short, long)]
        ignore: Vec<String>,
    },

    /// Scan, transfer new or modified paths and confirm them
    #[command(alias = "transfer")]
    RunTransfer,

    /// Delete confirmed paths from the source and prune empty directories
    #[command(alias = "delete")]
    RunDelete,

    /// Override the recorded transfer time
    SetTime {
        /// File or directory (recursive) to override; defaults to the whole tree
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// RFC 3339 or local "YYYY-mm-dd HH:MM[:SS]"
        time: String,
    },

    /// Forget all transfer history
    ResetState {
        /// Confirm that every path will be transferred again
        #[arg(long)]
        yes: bool,
    },

    /// Show tracked and pending counts
    Status,

    /// List tracked paths
    #[command(alias = "ls")]
    List {
        /// List what the next run would transfer instead
        #[arg(long)]
        pending: bool,
    },

    /// Validate configuration, endpoints and state
    Check,
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { force, ref ignore } = cli.command {
        return cmd_init(&cli, force, ignore);
    }

    let config = resolve_config(&cli)?;
    let spinner = cli.progress.then(new_spinner);
    let mut builder = SweeperBuilder::new();
    if matches!(cli.command, Commands::ResetState { .. } | Commands::Check) {
        builder = builder.unvalidated();
    }
    if let Some(ref pb) = spinner {
        let pb = pb.clone();
        builder = builder.progress(Arc::new(move |info: ProgressInfo| {
            pb.set_message(format!(
                "{} {}/{} {}",
                info.operation,
                info.processed,
                info.total.unwrap_or(0),
                info.current_item.unwrap_or_default()
            ));
        }));
    }
    let sweeper = builder.build(config)?;

    let result = match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::RunTransfer => cmd_run_transfer(&sweeper, spinner.as_ref()),
        Commands::RunDelete => cmd_run_delete(&sweeper, spinner.as_ref()),
        Commands::SetTime { path, time } => cmd_set_time(&sweeper, path.as_deref(), &time),
        Commands::ResetState { yes } => cmd_reset_state(&sweeper, yes),
        Commands::Status => cmd_status(&sweeper),
        Commands::List { pending } => cmd_list(&sweeper, pending),
        Commands::Check => cmd_check(&sweeper),
    };
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    result
}

/// Load the config file (explicit, or the default one when present) and
/// apply command line overrides
fn resolve_config(cli: &Cli) -> Result<SweepConfig> {
    let default_file = PathBuf::from(DEFAULT_CONFIG_FILE);
    let file = match &cli.config {
        Some(path) => Some(path.clone()),
        None if default_file.exists() => Some(default_file),
        None => None,
    };

    let mut config = match file {
        Some(path) => SweepConfig::load(&path)?,
        None => {
            let (Some(source), Some(dest)) = (&cli.source, &cli.dest) else {
                return Err(SweepError::InvalidConfiguration(format!(
                    "no {} found; pass --config or both --source and --dest",
                    DEFAULT_CONFIG_FILE
                )));
            };
            SweepConfig::new(absolute(source)?, absolute(dest)?)
        }
    };

    if let Some(ref source) = cli.source {
        config.source_root = absolute(source)?;
    }
    if let Some(ref dest) = cli.dest {
        config.destination_root = absolute(dest)?;
    }
    if let Some(ref state) = cli.state {
        config.state_path = Some(absolute(state)?);
    }
    if config.state_path.is_none() {
        config.state_path = Some(absolute(&config.state_path())?);
    }
    Ok(config)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn new_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("Scanning...");
    pb
}

/// Write a config file for the given roots
fn cmd_init(cli: &Cli, force: bool, ignore: &[String]) -> Result<()> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if path.exists() && !force {
        return Err(SweepError::InvalidConfiguration(format!(
            "{} already exists. Use --force to overwrite.",
            path.display()
        )));
    }
    let (Some(source), Some(dest)) = (&cli.source, &cli.dest) else {
        return Err(SweepError::InvalidConfiguration(
            "init needs both --source and --dest".to_string(),
        ));
    };

    let mut config = SweepConfig::new(absolute(source)?, absolute(dest)?);
    config.ignore_patterns = ignore.to_vec();
    if let Some(ref state) = cli.state {
        config.state_path = Some(absolute(state)?);
    }
    config.save(&path)?;

    println!("{} Wrote {}", "✓".green().bold(), path.display().to_string().cyan());
    println!("  Source:      {}", config.source_root.display().to_string().cyan());
    println!("  Destination: {}", config.destination_root.display().to_string().cyan());
    println!("\nNext steps:");
    println!("  - Validate the setup: {}", "syncsweep check".yellow());
    println!("  - First transfer: {}", "syncsweep run-transfer".yellow());
    Ok(())
}

/// Scan, transfer and confirm
fn cmd_run_transfer(sweeper: &Sweeper, spinner: Option<&ProgressBar>) -> Result<()> {
    println!("{}", "Running transfer...".blue().bold());
    let report = sweeper.run_transfer()?;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let duration = format_duration(Duration::from_millis(report.duration_ms));
    if report.selected == 0 {
        println!(
            "{} Nothing to transfer ({} unchanged) in {}",
            "✓".green().bold(),
            report.stats.unchanged,
            duration
        );
        return Ok(());
    }

    println!(
        "{} {} confirmed {} of {} paths ({}) in {}",
        "✓".green().bold(),
        report.label.yellow(),
        report.confirmed.len().to_string().green(),
        report.selected,
        format_bytes(report.bytes_transferred),
        duration
    );
    println!(
        "  {} new, {} modified, {} unchanged",
        report.stats.new, report.stats.modified, report.stats.unchanged
    );
    if !report.failed.is_empty() {
        println!(
            "{} {} paths failed and will be retried next run:",
            "!".yellow().bold(),
            report.failed.len()
        );
        for failure in &report.failed {
            println!("  {} {}", failure.path.display().to_string().red(), failure.reason.dimmed());
        }
    }
    Ok(())
}

/// Delete confirmed paths from the source
fn cmd_run_delete(sweeper: &Sweeper, spinner: Option<&ProgressBar>) -> Result<()> {
    println!("{}", "Running delete pass...".blue().bold());
    let report = sweeper.run_delete()?;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    println!(
        "{} Removed {} files and {} directories, pruned {} empty directories in {}",
        "✓".green().bold(),
        report.files_deleted,
        report.directories_deleted,
        report.directories_pruned,
        format_duration(Duration::from_millis(report.duration_ms))
    );
    if report.forgotten > 0 {
        println!("  Forgot {} paths no longer in the source", report.forgotten);
    }
    for skipped in &report.skipped {
        println!("  {} kept non-empty {}", "!".yellow(), skipped.display());
    }
    for error in &report.errors {
        println!("  {} {} {}", "✗".red(), error.path.display(), error.reason.dimmed());
    }
    Ok(())
}

/// Override recorded transfer times
fn cmd_set_time(sweeper: &Sweeper, path: Option<&Path>, time: &str) -> Result<()> {
    let time = parse_time(time)?;
    let stamped = sweeper.set_time(path, time)?;
    let target = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| sweeper.config().source_root.display().to_string());
    println!(
        "{} Set last transfer time of {} paths under {} to {}",
        "✓".green().bold(),
        stamped,
        target.cyan(),
        time.to_rfc3339().yellow()
    );
    Ok(())
}

/// Delete the state snapshot
fn cmd_reset_state(sweeper: &Sweeper, yes: bool) -> Result<()> {
    if !yes {
        return Err(SweepError::InvalidConfiguration(
            "reset-state forgets all history and every path will be transferred again; \
             pass --yes to confirm"
                .to_string(),
        ));
    }
    if sweeper.reset_state()? {
        println!("{} Removed {}", "✓".green().bold(), sweeper.store().path().display());
    } else {
        println!("No state at {}", sweeper.store().path().display());
    }
    Ok(())
}

/// Show counts
fn cmd_status(sweeper: &Sweeper) -> Result<()> {
    let status = sweeper.status()?;
    let pending = sweeper.pending_stats()?;

    println!("{}", "Syncsweep Status".bold().underline());
    println!("  Source:      {}", sweeper.config().source_root.display().to_string().cyan());
    println!("  Destination: {}", sweeper.config().destination_root.display().to_string().cyan());
    println!("  State:       {}", status.state_path.display().to_string().cyan());
    match status.saved_at {
        Some(saved_at) => println!("  Last saved:  {}", saved_at.to_rfc3339()),
        None => println!("  Last saved:  {}", "never".dimmed()),
    }
    println!(
        "  Tracked:     {} ({} transferred, {} pending)",
        status.tracked,
        status.transferred.to_string().green(),
        status.pending.to_string().yellow()
    );
    println!(
        "  Next run:    {} new, {} modified, {} unchanged",
        pending.new, pending.modified, pending.unchanged
    );
    Ok(())
}

/// List tracked or pending paths
fn cmd_list(sweeper: &Sweeper, pending: bool) -> Result<()> {
    if pending {
        let outcome = sweeper.pending()?;
        if outcome.record.is_empty() {
            println!("{}", "Nothing to transfer".yellow());
        }
        for item in &outcome.record.items {
            println!("{} {}", item.kind.to_string().dimmed(), item.relative_path.display());
        }
        return Ok(());
    }

    let tracked = sweeper.tracked()?;
    if tracked.is_empty() {
        println!("{}", "No tracked paths".yellow());
    }
    for entry in tracked {
        let stamp = match entry.last_transferred {
            Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string().green(),
            None => "pending".yellow(),
        };
        println!("{:<19} {}", stamp, entry.path.display());
    }
    Ok(())
}

/// Validate everything a run depends on
fn cmd_check(sweeper: &Sweeper) -> Result<()> {
    let tracked = sweeper.check()?;
    println!("{} Configuration is valid", "✓".green().bold());
    println!("{} Endpoints are ready", "✓".green().bold());
    println!(
        "{} State snapshot is readable ({} tracked paths)",
        "✓".green().bold(),
        tracked
    );
    Ok(())
}
