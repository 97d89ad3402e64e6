//! Command-line interface definition.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// com-census: inventory COM servers by export table and by registration
#[derive(Parser, Debug)]
#[command(name = "com-census")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Use this configuration file instead of the default one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine processing
    Json,
}

/// Overrides for the module pipeline.
#[derive(Args, Debug, Clone, Default)]
pub struct ModuleArgs {
    /// Directory (or file) to scan; may be repeated
    #[arg(short, long = "root")]
    pub roots: Vec<PathBuf>,

    /// Write the match listing here
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of inspection workers
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Do not keep an incremental journal of matches
    #[arg(long)]
    pub no_journal: bool,
}

/// Overrides for the class pipeline.
#[derive(Args, Debug, Clone, Default)]
pub struct ClassArgs {
    /// Also print each class's name and server path
    #[arg(short, long)]
    pub describe: bool,

    /// Registry hive holding the class registrations (HKCR, HKLM, HKCU)
    #[arg(long)]
    pub hive: Option<String>,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Find DLLs that export DllGetClassObject
    Modules {
        #[command(flatten)]
        args: ModuleArgs,
    },

    /// Enumerate registered CLSIDs and try to activate each
    Classes {
        #[command(flatten)]
        args: ClassArgs,
    },

    /// Run the module and class pipelines concurrently
    All {
        #[command(flatten)]
        modules: ModuleArgs,

        #[command(flatten)]
        classes: ClassArgs,
    },

    /// Inspect specific image files
    Inspect {
        /// Files to inspect
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// List every exported name
        #[arg(short, long)]
        exports: bool,
    },

    /// Activate a single class
    Probe {
        /// CLSID in braced form, e.g. {00021401-0000-0000-C000-000000000046}
        clsid: String,
    },

    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show application information
    Info,
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Reset configuration to defaults
    Reset,

    /// Print configuration file location
    Path,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
