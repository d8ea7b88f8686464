//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a build plan
    Validate {
        /// Path to build plan file
        #[arg(default_value = "plan.yaml")]
        path: PathBuf,
    },

    /// Run a build plan against an in-process scheduler
    Simulate {
        /// Path to build plan file
        #[arg(default_value = "plan.yaml")]
        path: PathBuf,

        /// Scheduler configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Give up if the build has not finished after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },
}
