//! Command-line argument parsing
//!
//! Defines the CLI structure using clap derive macros. The CLI only
//! assembles configuration and wires signals; all pipeline behavior lives in
//! the library.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// GeoNames fetcher - curate the GeoNames public dataset per country
#[derive(Parser, Debug)]
#[command(
    name = "geonames_fetcher",
    version,
    about = "Download and curate GeoNames country files",
    long_about = "Concurrently downloads the GeoNames public dataset, one archive per country, \
and curates each into a compact populated-place table with resolved administrative names."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Trace-level logging
    #[arg(long, global = true)]
    pub trace: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest and curate the selected countries
    Run(RunArgs),

    /// Write a starter configuration file
    InitConfig(InitConfigArgs),
}

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Directory holding the per-country file sets
    #[arg(long, value_name = "DIR")]
    pub target_dir: Option<PathBuf>,

    /// Restrict the run to these ISO2 country codes
    #[arg(short, long = "country", value_name = "CC")]
    pub countries: Vec<String>,

    /// GeoNames dump base URL
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// HTTP proxy host
    #[arg(long, value_name = "HOST", requires = "proxy_port")]
    pub proxy_host: Option<String>,

    /// HTTP proxy port
    #[arg(long, value_name = "PORT", requires = "proxy_host")]
    pub proxy_port: Option<u16>,

    /// Minimum population for curated populated places
    #[arg(long, value_name = "N")]
    pub min_population: Option<u64>,

    /// Seconds before a cached country grows stale
    #[arg(long, value_name = "SECS")]
    pub stale_after: Option<u64>,

    /// Concurrent country imports
    #[arg(long, value_name = "N")]
    pub max_concurrent_imports: Option<usize>,
}

/// Arguments for the init-config command
#[derive(Args, Debug)]
pub struct InitConfigArgs {
    /// Where to write the file (defaults to the user config directory)
    #[arg(long, value_name = "FILE")]
    pub path: Option<PathBuf>,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Log level derived from the verbosity flags
    pub fn log_level(&self) -> &'static str {
        if self.global.trace {
            "trace"
        } else if self.global.verbose {
            "debug"
        } else if self.global.quiet {
            "warn"
        } else {
            "info"
        }
    }
}
