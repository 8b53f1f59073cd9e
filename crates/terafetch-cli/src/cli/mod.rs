use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;

/// Top-level CLI for the terafetch downloader.
#[derive(Debug, Parser)]
#[command(name = "terafetch")]
#[command(about = "Segmented downloader for Terabox-style share links", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

/// Flags shared by `download` and `resume`.
#[derive(Debug, Args)]
pub struct TransferOpts {
    /// Number of download threads (1-32).
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Bandwidth cap, e.g. 5M, 500K, or a byte count. 0 = unlimited.
    #[arg(short = 'r', long = "limit-rate")]
    pub limit_rate: Option<String>,

    /// Netscape-format cookie file for authenticated shares.
    #[arg(short, long)]
    pub cookies: Option<PathBuf>,

    /// Proxy URL (http://, https:// or socks5://).
    #[arg(long)]
    pub proxy: Option<String>,

    /// Suppress the progress bar.
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download a file from a direct or share URL.
    Download {
        /// URL to download.
        url: String,

        /// Output path; defaults to the resolved filename in the current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        opts: TransferOpts,
    },

    /// Resume an interrupted download from its .part file.
    Resume {
        /// Path to the .part file (or the final output path).
        part_path: PathBuf,

        #[command(flatten)]
        opts: TransferOpts,
    },
}

pub fn run_from_args() -> Result<()> {
    let cli = Cli::parse();
    let cfg = crate::config_file::load_or_init()?;
    tracing::debug!("loaded config: {:?}", cfg);

    match cli.command {
        CliCommand::Download { url, output, opts } => commands::download::run(&url, output, &opts, &cfg),
        CliCommand::Resume { part_path, opts } => commands::resume::run(&part_path, &opts, &cfg),
    }
}
