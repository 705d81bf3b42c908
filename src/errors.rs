//! Error types for the GeoNames fetcher
//!
//! Each pipeline component has its own error enum so failures stay local to
//! the country they belong to. A refresh that dies for one country must never
//! take a sibling country down with it; the worker converts component errors
//! into a terminal `WorkerError` and reports it upward instead of panicking.

use std::path::PathBuf;

use thiserror::Error;

use crate::app::client::FetchTarget;

/// HTTP client construction errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// The configured base URL does not parse
    #[error("invalid base URL {url}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The underlying HTTP client could not be built
    #[error("HTTP client construction failed")]
    Build(#[from] reqwest::Error),
}

/// Staging errors: moving fetched files into the country directory
#[derive(Error, Debug)]
pub enum StageError {
    /// I/O error while creating directories or moving files
    #[error("staging I/O error")]
    Io(#[from] std::io::Error),

    /// The downloaded archive could not be opened or read
    #[error("archive is unusable: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// The archive did not contain the expected text entry
    #[error("archive {archive} has no entry named {entry}")]
    MissingEntry { archive: PathBuf, entry: String },

    /// A file type the staging store has no handler for
    #[error("no staging handler for extension {extension}")]
    UnsupportedExtension { extension: String },
}

/// Fetch coordination errors
#[derive(Error, Debug)]
pub enum FetchError {
    /// Every retry round still left failed targets behind
    #[error("fetch retries exhausted for {} target(s)", remaining.len())]
    RetriesExhausted { remaining: Vec<FetchTarget> },

    /// A freshly fetched file could not be staged
    #[error("failed to stage fetched file")]
    Stage(#[from] StageError),
}

/// TSV parse errors
///
/// Malformed individual rows are dropped, not surfaced; these errors cover
/// the cases where the country file itself cannot be consulted.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The extracted country file could not be opened
    #[error("cannot open country file {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error while reading lines
    #[error("I/O error while reading country file")]
    Io(#[from] std::io::Error),

    /// Shutdown was requested mid-parse
    #[error("parse cancelled by shutdown request")]
    Cancelled,
}

/// Errors reading or writing the curated FCP file
#[derive(Error, Debug)]
pub enum PersistError {
    /// I/O error on the FCP file or its temp sibling
    #[error("FCP file I/O error")]
    Io(#[from] std::io::Error),

    /// The record list could not be encoded or decoded
    #[error("FCP codec error")]
    Codec(#[from] serde_json::Error),

    /// The file is missing its terminator byte, so it was cut short
    #[error("FCP file {path} is truncated")]
    Truncated { path: PathBuf },

    /// The atomic rename publishing the new FCP file failed
    #[error("could not rename {temp_path} to {final_path}")]
    AtomicRename {
        temp_path: PathBuf,
        final_path: PathBuf,
    },
}

/// Terminal outcome of a failed country worker
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The fetch coordinator gave up after its retry budget
    #[error("download retries exhausted")]
    RetryExhausted,

    /// The country archive could not be extracted
    #[error("archive extraction failed")]
    Archive(#[source] StageError),

    /// The country text file could not be parsed
    #[error("country file parse failed")]
    Parse(#[from] ParseError),

    /// The curated list could not be written
    #[error("persisting curated records failed")]
    Persist(#[source] PersistError),

    /// A fresh etag promised a curated file that could not be read back
    #[error("loading curated records failed")]
    Load(#[source] PersistError),
}

/// Country manager errors
#[derive(Error, Debug)]
pub enum ManagerError {
    /// The master country index could not be fetched
    #[error("bootstrap fetch of the master index failed")]
    Bootstrap(#[from] FetchError),

    /// The master country index could not be read after staging
    #[error("cannot read master index {path}")]
    Index {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configured allow-list matched no known country
    #[error("no countries selected: allow-list matched nothing in the master index")]
    EmptySelection,
}

/// Root supervisor errors
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The manager crashed more often than the restart policy allows
    #[error("manager restarted {restarts} time(s) within {period_secs}s, giving up")]
    RestartBudgetExhausted { restarts: u32, period_secs: u64 },

    /// Shutdown handshake produced something other than a goodbye
    #[error("unexpected reply during shutdown: {detail}")]
    UnexpectedReply { detail: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Configuration file could not be read
    #[error("cannot read configuration file")]
    Io(#[from] std::io::Error),

    /// Invalid TOML
    #[error("invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Settings could not be rendered to TOML
    #[error("cannot render configuration")]
    Render(#[from] toml::ser::Error),

    /// A value that passed parsing but fails validation
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Top-level application error
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("{message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Staging result type alias
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Fetch result type alias
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Parse result type alias
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Persistence result type alias
pub type PersistResult<T> = std::result::Result<T, PersistError>;
