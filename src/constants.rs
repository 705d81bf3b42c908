//! Application constants for the GeoNames fetcher
//!
//! Centralizes all constants used throughout the application, organized by
//! functional domain.

use std::time::Duration;

/// GeoNames dump endpoints and file naming
pub mod geonames {
    /// GeoNames public dump base URL
    pub const BASE_URL: &str = "https://download.geonames.org/export/dump/";

    /// Basename of the master country index
    pub const MASTER_INDEX: &str = "countryInfo";

    /// Extension of plain text dump files
    pub const TXT_EXTENSION: &str = ".txt";

    /// Extension of per-country archives
    pub const ZIP_EXTENSION: &str = ".zip";

    /// Name of the cache validator marker inside a country directory
    pub const ETAG_FILE: &str = "etag";

    /// Suffix of the curated populated-place file, appended to the country code
    pub const FCP_SUFFIX: &str = "_fcp.txt";
}

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = "geonames-fetcher/0.1.0 (Geographic Lookup Tool)";

    /// Default HTTP request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
}

/// Staleness, retry and curation limits
pub mod limits {
    use super::Duration;

    /// An etag older than this is considered stale
    pub const STALE_AFTER: Duration = Duration::from_secs(86_400);

    /// Wait between failed fetch rounds, never before the first attempt
    pub const RETRY_WAIT: Duration = Duration::from_millis(5_000);

    /// Maximum fetch attempts per target
    pub const RETRY_LIMIT: u32 = 3;

    /// Populated places below this population are not curated
    pub const MIN_POPULATION: u64 = 500;

    /// Fraction of the country file consumed per progress pulse
    pub const PROGRESS_FRACTION: f64 = 0.01;

    /// How many country imports may run their pipeline at once
    pub const MAX_CONCURRENT_IMPORTS: usize = 8;

    /// How long the manager waits for worker shutdown acknowledgments
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

    /// Manager restarts tolerated by the root supervisor
    pub const MAX_RESTARTS: u32 = 1;

    /// Window in which manager restarts are counted
    pub const RESTART_PERIOD: Duration = Duration::from_secs(5);
}

/// Feature-code sets used by the record filter
pub mod filter {
    /// Class-A feature codes kept for the admin hierarchy
    pub const ADMIN_CODES: [&str; 11] = [
        "ADM1", "ADM2", "ADM3", "ADM4", "ADM5", "ADMD", "PCL", "PCLD", "PCLF", "PCLI", "PCLS",
    ];

    /// Class-P feature codes kept for the curated populated-place list
    pub const POPULATED_CODES: [&str; 9] = [
        "PPL", "PPLA", "PPLA2", "PPLA3", "PPLA4", "PPLC", "PPLG", "PPLS", "PPLX",
    ];
}

/// Channel capacities
pub mod channels {
    /// Worker progress event buffer
    pub const PROGRESS_BUFFER: usize = 256;

    /// Manager command buffer
    pub const COMMAND_BUFFER: usize = 8;
}
