//! Burrow - browse local files and archive contents from the command line

mod cli;
mod commands;

use anyhow::{Context, Result};
use burrow_fs::{FileFactory, SortOrder, VfsConfig};
use burrow_log::LogOptions;
use clap::Parser;
use cli::{Args, Commands};
use std::io::Write;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => VfsConfig::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => VfsConfig::load().unwrap_or_default(),
    };
    if args.no_archives {
        config.archives.enabled = false;
    }
    if let Some(encoding) = args.encoding {
        config.archives.encoding_hint = encoding.into();
    }

    let log_options = LogOptions {
        level: if args.verbose {
            "debug".to_string()
        } else {
            config.logging.level.clone()
        },
        file_dir: config.logging.file.then(burrow_log::log_dir),
    };
    let _log_guard = burrow_log::init(&log_options)?;

    // Clean up old logs (7 days)
    if config.logging.file {
        if let Err(e) = burrow_log::cleanup_old_logs(7) {
            tracing::warn!("Failed to cleanup old logs: {}", e);
        }
    }

    tracing::debug!("burrow {} starting", env!("CARGO_PKG_VERSION"));
    let factory = FileFactory::new(&config);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match args.command {
        Commands::Ls {
            location,
            all,
            long,
            sort,
            reverse,
        } => {
            let order = if reverse {
                SortOrder::Descending
            } else {
                SortOrder::Ascending
            };
            commands::ls(&factory, &location, all, long, sort.into(), order, &mut out)?;
        }
        Commands::Tree {
            location,
            depth,
            all,
            no_enter,
        } => commands::tree(&factory, &location, depth, all, !no_enter, &mut out)?,
        Commands::Cat { location } => commands::cat(&factory, &location, &mut out)?,
        Commands::Stat { location } => commands::stat(&factory, &location, &mut out)?,
        Commands::Mkdir { location } => commands::mkdir(&factory, &location)?,
        Commands::Rm { location } => commands::rm(&factory, &location)?,
        Commands::Mv {
            source,
            destination,
        } => commands::mv(&factory, &source, &destination)?,
    }

    out.flush()?;
    Ok(())
}
