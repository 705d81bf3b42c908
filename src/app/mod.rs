//! Core application logic for the GeoNames fetcher
//!
//! The pipeline, leaves first: the conditional [`client`] fetches dump
//! files, [`staging`] lands them in the per-country layout, [`fetch`]
//! coordinates staleness and retries, [`parser`] curates the TSV rows,
//! [`hierarchy`] and [`enrich`] resolve administrative names, and
//! [`worker`] sequences it all per country. [`manager`] owns the worker
//! fleet; [`supervisor`] owns the manager.

pub mod client;
pub mod enrich;
pub mod fetch;
pub mod hierarchy;
pub mod manager;
pub mod models;
pub mod parser;
pub mod staging;
pub mod supervisor;
pub mod worker;

// Re-export main public API
pub use client::{Fetch, FetchOutcome, FetchTarget, GeonamesClient, TransportKind};
pub use fetch::{CountryFetch, FetchCoordinator};
pub use hierarchy::{HierarchyHandle, HierarchyIndex};
pub use manager::{CountryManager, ManagerCommand, ManagerReply};
pub use models::{CountryInfo, GeonameRecord};
pub use parser::{keep_geoname_record, ParsedCountry, RecordClass};
pub use supervisor::RootSupervisor;
pub use worker::{
    CountryWorker, ImportProgress, WorkerEvent, WorkerEventKind, WorkerOutcome, WorkerPhase,
};
