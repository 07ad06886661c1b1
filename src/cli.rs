use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "multiwriter")]
#[command(about = "Append to many files through a bounded set of writers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Split `path<TAB>payload` lines from stdin into files under a directory
    Split(SplitArgs),
}

#[derive(clap::Args, Debug)]
pub struct SplitArgs {
    /// Root directory for the output files
    #[arg(long)]
    pub out_dir: PathBuf,

    /// Configuration file (defaults to $MULTIWRITER_CONFIG or config/multiwriter.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Gzip every output file regardless of configuration
    #[arg(long)]
    pub gzip: bool,
}
