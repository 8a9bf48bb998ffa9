use std::path::PathBuf;

use clap::Parser;

/// Mount a primary-replica user-space filesystem rooted at `BACKING_STORE`.
#[derive(Debug, Parser)]
#[command(name = "replicafs", version, about)]
pub struct Cli {
    /// Directory that holds the master and slave backing subdirectories.
    pub backing_store: PathBuf,

    /// Run the filesystem host library in the foreground.
    #[arg(short, long, default_value_t = false)]
    pub foreground: bool,

    /// Number of read-only slave mounts to maintain.
    #[arg(short = 'n', long = "nbr-slaves", default_value_t = 1)]
    pub nbr_slaves: i64,
}
