//! # sharekit
//!
//! Local front end for the share data copy engine.
//!
//! - `sharekit copy <src> <dst>`      - copy a tree with periodic progress logs
//! - `sharekit check-config <file>`   - validate a migration service config file

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use sharekit_io_fs::{
    CopyTask, EnumCopyFileConflictStrategy, EnumCopyOutcome, EnumCopyPatternMode, SpecCopyOptions,
};
use sharekit_log::{EnumLogFormat, init_logging};
use sharekit_migration::SpecMigrationConf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sharekit")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log level or filter directives (overridden by RUST_LOG)
    #[arg(long, global = true, env = "SHAREKIT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log line format (text, json)
    #[arg(long, global = true, default_value_t = EnumLogFormat::Text)]
    log_format: EnumLogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a directory tree, preserving metadata
    Copy {
        src: PathBuf,
        dst: PathBuf,

        /// Base name to leave out (repeatable)
        #[arg(long = "ignore", value_name = "NAME")]
        names_ignore: Vec<String>,

        /// How --ignore values are matched
        #[arg(long, value_enum, default_value_t = ArgPatternMode::Literal)]
        pattern_mode: ArgPatternMode,

        /// Keep destination files whose size and mtime already match
        #[arg(long)]
        resume: bool,

        /// Fail instead of overwriting existing destination files
        #[arg(long, conflicts_with = "resume")]
        no_clobber: bool,

        /// Progress log period in milliseconds
        #[arg(long, default_value_t = 1000)]
        progress_interval_ms: u64,
    },

    /// Parse and validate a migration config file
    CheckConfig { file: PathBuf },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ArgPatternMode {
    Literal,
    Glob,
    Regex,
}

impl From<ArgPatternMode> for EnumCopyPatternMode {
    fn from(value: ArgPatternMode) -> Self {
        match value {
            ArgPatternMode::Literal => Self::Literal,
            ArgPatternMode::Glob => Self::Glob,
            ArgPatternMode::Regex => Self::Regex,
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Copy {
            src,
            dst,
            names_ignore,
            pattern_mode,
            resume,
            no_clobber,
            progress_interval_ms,
        } => {
            let rule_conflict_file = if resume {
                EnumCopyFileConflictStrategy::SkipIdentical
            } else if no_clobber {
                EnumCopyFileConflictStrategy::Error
            } else {
                EnumCopyFileConflictStrategy::Overwrite
            };
            let spec_cp_options = SpecCopyOptions {
                names_ignore,
                rule_pattern: pattern_mode.into(),
                rule_conflict_file,
                ..SpecCopyOptions::default()
            };
            run_copy(src, dst, spec_cp_options, Duration::from_millis(progress_interval_ms))
        }
        Commands::CheckConfig { file } => check_config(file),
    }
}

fn run_copy(
    src: PathBuf,
    dst: PathBuf,
    spec_cp_options: SpecCopyOptions,
    duration_interval: Duration,
) -> Result<ExitCode> {
    let task = Arc::new(CopyTask::new(&src, &dst, spec_cp_options));
    let task_worker = Arc::clone(&task);
    let thread_main = thread::current();
    let handle = thread::Builder::new()
        .name("sharekit-copy".to_string())
        .spawn(move || {
            let outcome = task_worker.run();
            thread_main.unpark();
            outcome
        })
        .context("Failed to spawn copy worker")?;

    while !handle.is_finished() {
        thread::park_timeout(duration_interval);
        if handle.is_finished() {
            break;
        }
        let progress = task.get_progress();
        info!(
            state = %task.state(),
            progress = %serde_json::to_string(&progress).unwrap_or_default(),
            "copy progress"
        );
    }

    let outcome = match handle.join() {
        Ok(outcome) => outcome,
        Err(_) => bail!("Copy worker panicked"),
    };
    match outcome {
        EnumCopyOutcome::Completed(report) => {
            println!("{report}");
            for c_warning in &report.warnings {
                warn!("{c_warning}");
            }
            Ok(ExitCode::SUCCESS)
        }
        EnumCopyOutcome::Cancelled => {
            warn!(src = %src.display(), "copy cancelled");
            Ok(ExitCode::from(130))
        }
        EnumCopyOutcome::Failed(e) => Err(e)
            .with_context(|| format!("Copy {} -> {} failed", src.display(), dst.display())),
    }
}

fn check_config(file: PathBuf) -> Result<ExitCode> {
    let cfg = SpecMigrationConf::from_file(&file)
        .with_context(|| format!("Invalid configuration {}", file.display()))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&cfg).context("Failed to render configuration")?
    );
    info!(file = %file.display(), "configuration is valid");
    Ok(ExitCode::SUCCESS)
}
