use std::path::PathBuf;

use clap::{Parser, Subcommand};
use flat_fs::config::DEFAULT_INODES;

#[derive(Parser)]
#[command(version, about = "Build and inspect flat-fs volume images")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Format a new image and copy every regular file of a directory into it
    Pack {
        /// Source directory
        #[arg(long, short)]
        source: PathBuf,

        /// Output image
        #[arg(long, short)]
        image: PathBuf,

        /// Image size in 512-byte blocks
        #[arg(long, short, default_value_t = 4096)]
        blocks: u32,

        /// Maximum number of files, root directory included
        #[arg(long, short = 'n', default_value_t = DEFAULT_INODES)]
        inodes: u32,
    },

    /// List the files of an image
    Ls {
        #[arg(long, short)]
        image: PathBuf,
    },

    /// Print a file of an image to stdout
    Cat {
        #[arg(long, short)]
        image: PathBuf,

        name: String,
    },
}
