use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dowser", version, about = "Pointer-structure discovery from console memory snapshots")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Analyze snapshot CSVs and emit condition expressions
    Analyze {
        /// System id (see `dowser systems`)
        #[arg(long, short)]
        system: String,

        /// Snapshot CSV files, one per captured game state, oldest first
        #[arg(required = true)]
        batches: Vec<PathBuf>,

        /// Comma-separated hex addresses to path-find (e.g. 0x80200004,0x80200044)
        #[arg(long, short)]
        targets: Option<String>,

        /// Write conditions here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// JSON file with scan settings
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// List supported systems and their scan ranges
    Systems,
}
