//! GeoNames Fetcher Library
//!
//! A Rust library for ingesting the GeoNames public dataset: one compressed
//! per-country TSV plus a master country index, curated into a compact
//! in-memory table of administrative and populated-place records per
//! country.
//!
//! # Key Features
//!
//! - **Conditional downloads** driven by an on-disk ETag cache with a
//!   staleness window, so unchanged countries cost a single 304
//! - **Bounded retry** with concurrent fan-out and failure aggregation
//! - **Streaming curation** of the country TSV: class-A/class-P partition,
//!   population filter and admin-name enrichment
//! - **Atomic persistence** of the curated list, written fully or not at all
//! - **Supervised lifecycle** across a manager, per-country workers and an
//!   ephemeral per-country hierarchy service, with orderly shutdown
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use geonames_fetcher::prelude::*;
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = Arc::new(Settings::default());
//!     let client = Arc::new(GeonamesClient::new(&settings)?);
//!
//!     // Send ManagerCommand::Shutdown on `control` for an orderly stop;
//!     // cancelling the token kills the manager outright.
//!     let (_control, control_rx) = mpsc::channel(4);
//!     let supervisor = RootSupervisor::new(settings, client, None);
//!     supervisor.run(CancellationToken::new(), control_rx).await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;
