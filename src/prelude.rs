//! Prelude module
//!
//! Re-exports the items needed for typical embedding: build a client,
//! start the supervisor, observe worker events.

// Core result types
pub use crate::errors::{AppError, Result};

// Pipeline components
pub use crate::app::{
    CountryInfo, CountryManager, FetchCoordinator, GeonameRecord, GeonamesClient, RootSupervisor,
    WorkerEvent, WorkerPhase,
};

// Configuration
pub use crate::config::{CountrySelection, ProxySettings, Settings};

// Standard library re-exports that are commonly needed
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;
