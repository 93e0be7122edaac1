use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON configuration file; without it the environment is used
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify an image, or every image in a directory
    Classify {
        /// Image file or directory of images
        #[arg(short, long)]
        path: PathBuf,

        /// Model ID; the default model is used when omitted
        #[arg(short, long)]
        model: Option<String>,

        /// Run the images as one batch instead of one upload at a time
        #[arg(short, long, default_value_t = false)]
        batch: bool,

        /// Print results as JSON
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Abort an image that takes longer than this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// List the loaded models
    Models,
    /// Print per-model health and service statistics
    Health,
}
