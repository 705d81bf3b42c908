//! GeoNames fetcher CLI application
//!
//! Command-line interface for downloading and curating GeoNames country
//! files. Features concurrent per-country imports, conditional downloads and
//! progress reporting.

use std::process;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use geonames_fetcher::cli::{handle_init_config, handle_run, Cli, Commands};
use geonames_fetcher::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();
    init_logging(&cli);

    info!("GeoNames fetcher v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run(args) => handle_run(cli.global, args).await,
        Commands::InitConfig(args) => handle_init_config(cli.global, args).await,
    }
}

/// Initialize logging based on CLI verbosity settings
fn init_logging(cli: &Cli) {
    let filter = EnvFilter::from_default_env().add_directive(
        format!("geonames_fetcher={}", cli.log_level())
            .parse()
            .unwrap(),
    );

    fmt().with_env_filter(filter).with_target(false).init();
}
