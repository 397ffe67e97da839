//! FeatLab CLI: batch materialization commands.
//!
//! Commands:
//! - `run`: execute a batch run from a TOML config file
//! - `merge`: rebuild the combined features table from per-ticker files
//! - `status`: print progress and last-run summary from the status files

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use featlab_core::store::{merge_all_tickers, DataLayout, MergeOutcome};
use featlab_runner::{
    run_batch, ProgressSnapshot, RunConfig, RunLedger, SyntheticAssembler, ThreadSleeper,
};

#[derive(Parser)]
#[command(
    name = "featlab",
    about = "Batch feature materialization pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a batch run from a TOML config file.
    Run {
        /// Path to a TOML run config.
        #[arg(long)]
        config: PathBuf,

        /// Use the deterministic synthetic row source.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Exit non-zero when any snapshot hard-failed.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Rebuild the combined features table from per-ticker files.
    Merge {
        /// Data root directory.
        #[arg(long, default_value = "features_data")]
        data_dir: PathBuf,

        /// Rebuild even when the combined table is fresh.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Print progress and last-run summary from the status files.
    Status {
        /// Data root directory.
        #[arg(long, default_value = "features_data")]
        data_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            synthetic,
            strict,
        } => cmd_run(&config, synthetic, strict),
        Commands::Merge { data_dir, force } => cmd_merge(&data_dir, force),
        Commands::Status { data_dir } => cmd_status(&data_dir),
    }
}

fn cmd_run(config_path: &PathBuf, synthetic: bool, strict: bool) -> Result<()> {
    let mut config = RunConfig::from_file(config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    if strict {
        config.strict = true;
    }

    if !synthetic {
        bail!("no live row source is wired in this build; pass --synthetic");
    }

    let mut assembler = SyntheticAssembler;
    let mut sleeper = ThreadSleeper;
    let report = run_batch(&config, &mut assembler, &mut sleeper)?;

    if config.strict && report.hard_failed() {
        eprintln!(
            "run finished with {} hard-failed snapshot(s)",
            report.stats.failed
        );
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_merge(data_dir: &PathBuf, force: bool) -> Result<()> {
    let layout = DataLayout::new(data_dir);
    match merge_all_tickers(&layout, force)? {
        MergeOutcome::Merged { tickers, rows } => {
            println!("merged {tickers} tickers, {rows} rows -> {}", layout.combined_path().display());
        }
        MergeOutcome::SkippedFresh => {
            println!("combined table is fresh; use --force to rebuild");
        }
        MergeOutcome::NoSources => {
            println!("no per-ticker history files under {}", layout.history_dir().display());
        }
    }
    Ok(())
}

fn cmd_status(data_dir: &PathBuf) -> Result<()> {
    let layout = DataLayout::new(data_dir);

    match std::fs::read_to_string(layout.progress_path()) {
        Ok(content) => {
            let p: ProgressSnapshot = serde_json::from_str(&content)?;
            let eta = p
                .eta_seconds
                .map(|s| format!("{s}s"))
                .unwrap_or_else(|| "n/a".to_string());
            println!(
                "progress: {}/{} tasks ({:.1}%), processed {}, flagged {}, failed {}, eta {eta}, started {}",
                p.done, p.total, p.percent, p.processed, p.flagged, p.failed, p.started_at
            );
        }
        Err(_) => println!("no progress file"),
    }

    match std::fs::read_to_string(layout.last_run_path()) {
        Ok(content) => {
            let ledger: RunLedger = serde_json::from_str(&content)?;
            println!(
                "last run: years {}-{}, mode {}, {}",
                ledger.start_year,
                ledger.end_year,
                ledger.overwrite_mode,
                ledger.stats.summary_line()
            );
            let with_output = ledger.tickers.values().filter(|present| **present).count();
            println!("  outputs: {}/{} tickers", with_output, ledger.tickers.len());
            for reason in &ledger.stop_reasons {
                println!("  stopped early: {reason}");
            }
            println!("  merge: {}", ledger.merge);
        }
        Err(_) => println!("no last-run ledger"),
    }
    Ok(())
}
