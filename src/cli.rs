// src/cli.rs
//! CLI definitions for formulary
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "formulary")]
#[command(author = "Formulary Contributors")]
#[command(version)]
#[command(about = "Resolve, verify, patch, build, install and test packages from formulas", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory of <name>.toml formulas
    #[arg(long, global = true)]
    pub formula_dir: Option<PathBuf>,

    /// Cellar root; kegs are installed to <prefix>/<name>/<version>
    #[arg(long, global = true)]
    pub prefix: Option<PathBuf>,

    /// Receipt database path
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Source cache directory
    #[arg(long, global = true)]
    pub cache: Option<PathBuf>,

    /// Per-command timeout in seconds (0 disables)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Parallel jobs passed to build tools
    #[arg(short, long, global = true)]
    pub jobs: Option<usize>,

    /// Keep scratch directories for inspection
    #[arg(long, global = true)]
    pub keep_scratch: bool,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install a formula and its requirements
    Install {
        /// Formula name
        formula: String,
    },

    /// Run the test stage of an installed formula
    Test {
        /// Formula name
        formula: String,

        /// Print the captured test output
        #[arg(long)]
        show_log: bool,
    },

    /// Check upstream for a newer version
    Livecheck {
        /// Formula names
        #[arg(required = true)]
        formulas: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download and verify sources into the cache without building
    Fetch {
        /// Formula name
        formula: String,
    },

    /// Show the resolved requirement order
    Deps {
        /// Formula name
        formula: String,

        /// Include test requirements
        #[arg(long)]
        test: bool,
    },

    /// Show formula details
    Info {
        /// Formula name
        formula: String,
    },

    /// List known formulas and their install state
    List {
        /// Only show installed formulas
        #[arg(long)]
        installed: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
