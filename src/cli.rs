use clap::{Args, Parser, Subcommand};
use gimpfetch::dates::{self, DateError, DateRange};
use std::num::{NonZeroU64, NonZeroUsize};
use std::path::PathBuf;
use time::Date;

#[derive(Parser, Debug)]
#[command(name = "gimpfetch", version)]
#[command(about = "Download GIMP glacier products and Sentinel-1 orbit files", long_about = None)]
pub struct Cli {
    /// Configuration file (default: $GIMPFETCH_CONFIG, then config/gimpfetch.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// More log output (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List a product's directories, then offer to download them
    List(ListArgs),
    /// Download every file in a product's matching directories
    Pull(PullArgs),
    /// Fetch orbit files newer than those already in a directory
    Orbits(OrbitArgs),
    /// Print the effective configuration as TOML
    Config,
}

/// Which directories of which product
#[derive(Args, Debug)]
pub struct Selection {
    /// Product id from the catalog, e.g. 0481
    #[arg(short, long)]
    pub product: String,

    /// Glacier region box, e.g. W61.1N
    #[arg(short, long)]
    pub region: Option<String>,

    /// First acquisition date (YYYY-MM-DD)
    #[arg(long = "first-date", visible_alias = "fd", value_parser = dates::parse_date)]
    pub first_date: Option<Date>,

    /// Last acquisition date (YYYY-MM-DD, default: first date)
    #[arg(long = "last-date", visible_alias = "ld", value_parser = dates::parse_date, requires = "first_date")]
    pub last_date: Option<Date>,
}

impl Selection {
    pub fn range(&self) -> Result<Option<DateRange>, DateError> {
        self.first_date
            .map(|first| DateRange::new(first, self.last_date))
            .transpose()
    }
}

/// How a download run behaves
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Re-download files that are already complete locally
    #[arg(long)]
    pub overwrite: bool,

    /// Stop the whole run at the first failed file
    #[arg(long)]
    pub strict: bool,

    /// Maximum simultaneous downloads
    #[arg(short = 'j', long)]
    pub concurrency: Option<NonZeroUsize>,

    /// Give up on a single file after this many seconds
    #[arg(long = "task-timeout", value_name = "SECS")]
    pub task_timeout: Option<NonZeroU64>,

    /// Do not ask before downloading
    #[arg(long = "no-prompt", visible_alias = "np")]
    pub no_prompt: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub selection: Selection,

    /// Directory for downloaded files
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,

    /// Download the listed directories without asking
    #[arg(short, long, conflicts_with = "no_prompt")]
    pub yes: bool,

    // --no-prompt prints the listing without downloading
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug)]
pub struct PullArgs {
    #[command(flatten)]
    pub selection: Selection,

    /// Directory for downloaded files
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug)]
pub struct OrbitArgs {
    /// Directory holding the orbit files (default: download.outdir)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    #[command(flatten)]
    pub run: RunArgs,
}
