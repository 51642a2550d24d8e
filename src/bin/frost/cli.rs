//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Frost - freeze Python applications into standalone executables
#[derive(Parser)]
#[command(name = "frost")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the bundle described by Frost.toml
    Build(BuildArgs),

    /// List or extract the entries of a built archive or executable
    Inspect(InspectArgs),

    /// Show discovered hooks and excluded imports
    Hooks(HooksArgs),

    /// Remove build artifacts
    Clean(CleanArgs),
}

#[derive(Args)]
pub struct BuildArgs {
    /// Path to the bundle description (defaults to the nearest Frost.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Remove cached build state before building
    #[arg(long)]
    pub clean: bool,

    /// Directory for intermediate files
    #[arg(long, env = "FROST_WORKPATH")]
    pub workpath: Option<PathBuf>,

    /// Directory for the finished bundle
    #[arg(long, env = "FROST_DISTPATH")]
    pub distpath: Option<PathBuf>,

    /// Number of parallel jobs
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Args)]
pub struct InspectArgs {
    /// Archive or executable to read
    pub archive: PathBuf,

    /// Name of the entry to extract
    #[arg(long, value_name = "NAME")]
    pub extract: Option<String>,

    /// Where to write the extracted entry (defaults to its file name)
    #[arg(long, short, value_name = "PATH", requires = "extract")]
    pub output: Option<PathBuf>,

    /// Passphrase of an encrypted object archive
    #[arg(long, env = "FROST_KEY")]
    pub key: Option<String>,
}

#[derive(Args)]
pub struct HooksArgs {
    /// Additional hook directories
    #[arg(long = "dir", value_name = "DIR")]
    pub dirs: Vec<PathBuf>,
}

#[derive(Args)]
pub struct CleanArgs {
    /// Path to the bundle description (defaults to the nearest Frost.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}
