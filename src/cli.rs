//! Command line definition using clap derive.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "headcount", about = "Occupancy estimates from two camera feeds", version)]
pub struct Cli {
    /// Settings file (JSON). Missing means defaults.
    #[arg(long, short = 'c', global = true, env = "HEADCOUNT_CONFIG", default_value = "headcount.json")]
    pub config: PathBuf,

    /// SQLite database, overrides `database.path`
    #[arg(long, global = true, env = "HEADCOUNT_DB")]
    pub db: Option<PathBuf>,

    /// Also append per-item results to this CSV file
    #[arg(long, global = true, env = "HEADCOUNT_RESULTS_CSV")]
    pub results_csv: Option<PathBuf>,

    /// Also append finished runs to this CSV file
    #[arg(long, global = true, env = "HEADCOUNT_RUNS_CSV")]
    pub runs_csv: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the detector over a labelled data set
    Batch(BatchOpts),
    /// Watch the two drop directories until interrupted
    Live(LiveOpts),
    /// Pair recent observations into occupancy estimates
    Pair(PairOpts),
    /// Print the estimate summary of the last hours (JSON)
    Summary(SummaryOpts),
    /// Print a run with its stored items (JSON)
    ShowRun(ShowRunOpts),
    /// Write the effective settings to the settings file
    InitConfig(InitConfigOpts),
}

#[derive(Args)]
pub struct BatchOpts {
    /// Data set root; each subdirectory is a classification
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Process at most this many images
    #[arg(long)]
    pub max_items: Option<usize>,

    /// Keep catalog order instead of shuffling
    #[arg(long)]
    pub no_shuffle: bool,

    /// Only these classifications (repeatable)
    #[arg(long = "classification")]
    pub classifications: Vec<String>,

    /// List the planned items and exit
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct LiveOpts {
    #[arg(long)]
    pub dir_x: Option<PathBuf>,

    #[arg(long)]
    pub dir_y: Option<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,
}

#[derive(Args)]
pub struct PairOpts {
    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Seconds between cycles
    #[arg(long)]
    pub interval: Option<u64>,
}

#[derive(Args)]
pub struct SummaryOpts {
    #[arg(long, default_value = "1")]
    pub hours: u32,

    /// Also list this many of the newest estimates
    #[arg(long, default_value = "0")]
    pub recent: usize,
}

#[derive(Args)]
pub struct ShowRunOpts {
    pub run_id: String,
}

#[derive(Args)]
pub struct InitConfigOpts {
    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}
