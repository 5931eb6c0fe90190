use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// dfs image file
    #[arg(long, short)]
    pub image: PathBuf,

    /// Mount options, e.g. `cache=64`
    #[arg(long, short, default_value = "")]
    pub options: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the image and format it
    Format {
        /// Image size in MiB
        #[arg(long, short, default_value_t = 64)]
        size: u64,
    },
    /// Format a fresh image and copy a host directory into its root
    Pack {
        /// Host directory to copy
        #[arg(long, short)]
        source: PathBuf,

        /// Image size in MiB
        #[arg(long, default_value_t = 64)]
        size: u64,
    },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a file to stdout
    Cat { path: String },
    /// Show usage and capacity
    Statfs,
}
