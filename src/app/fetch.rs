//! Fetch coordination: staleness, parallel fan-out and bounded retry
//!
//! The coordinator owns the conditional-fetch protocol. It decides whether a
//! country's cached copy is still fresh, dispatches fetches for a set of
//! targets concurrently, collects exactly that many outcomes and drives the
//! retry rounds. The wait happens between attempts rather than before the
//! first one: first-attempt latency is the common case, the wait only exists
//! to rate-limit the upstream after a failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::app::client::{Fetch, FetchOutcome, FetchTarget};
use crate::app::staging;
use crate::config::Settings;
use crate::constants::geonames;
use crate::errors::{FetchError, FetchResult};

/// Result of a conditional country fetch
#[derive(Debug)]
pub enum CountryFetch {
    /// A new archive body was downloaded to `temp_path`
    Fresh {
        etag: Option<String>,
        temp_path: PathBuf,
    },
    /// The server answered 304; the cached curation is still current
    NotModified,
}

/// Drives conditional fetches with retry for a fixed settings snapshot
#[derive(Debug)]
pub struct FetchCoordinator<F> {
    fetcher: Arc<F>,
    settings: Arc<Settings>,
}

impl<F: Fetch> FetchCoordinator<F> {
    pub fn new(fetcher: Arc<F>, settings: Arc<Settings>) -> Self {
        Self { fetcher, settings }
    }

    /// Whether the country's etag marker is too old to trust
    ///
    /// An absent marker counts as written at the epoch, so it is always
    /// stale.
    pub async fn is_stale(&self, name: &str) -> bool {
        let path = staging::etag_path(&self.settings.target_dir, name);
        let mtime = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(_) => return true,
        };
        match SystemTime::now().duration_since(mtime) {
            Ok(age) => age > self.settings.stale_after,
            // Clock skew put the marker in the future; treat it as fresh
            Err(_) => false,
        }
    }

    /// Conditionally fetch one country archive
    ///
    /// The stored etag, if any, rides along as `If-None-Match`. The caller
    /// stages the returned temp file; a 304 means the existing curation can
    /// be loaded as-is.
    pub async fn fetch_country(&self, cc: &str) -> FetchResult<CountryFetch> {
        let etag_path = staging::etag_path(&self.settings.target_dir, cc);
        let prior_etag = tokio::fs::read_to_string(&etag_path).await.ok();

        let target = FetchTarget::new(cc, geonames::ZIP_EXTENSION);
        let mut outcomes = self.run_round(vec![(target, prior_etag)]).await?;
        match outcomes.pop() {
            Some(FetchOutcome::Fresh {
                etag, temp_path, ..
            }) => Ok(CountryFetch::Fresh { etag, temp_path }),
            _ => Ok(CountryFetch::NotModified),
        }
    }

    /// Fetch and stage the master country index
    ///
    /// Runs unconditionally through the same retry pipeline at process start.
    pub async fn load_master_index(&self) -> FetchResult<()> {
        let target = FetchTarget::new(geonames::MASTER_INDEX, geonames::TXT_EXTENSION);
        let outcomes = self.run_round(vec![(target, None)]).await?;
        for outcome in outcomes {
            if let FetchOutcome::Fresh {
                target,
                etag,
                temp_path,
            } = outcome
            {
                staging::stage(
                    &self.settings.target_dir,
                    &target,
                    etag.as_deref(),
                    &temp_path,
                )
                .await?;
            }
        }
        info!("Master country index is in place");
        Ok(())
    }

    /// One coordinator call: concurrent fan-out plus bounded retry rounds
    ///
    /// Dispatches every pending target at once, collects exactly that many
    /// outcomes, and re-dispatches the failed subset after `retry_wait` until
    /// it drains or `retry_limit` is reached.
    async fn run_round(
        &self,
        requests: Vec<(FetchTarget, Option<String>)>,
    ) -> FetchResult<Vec<FetchOutcome>> {
        let mut pending = requests;
        let mut collected = Vec::new();
        let mut attempt: u32 = 1;

        loop {
            let in_flight = pending.iter().map(|(target, etag)| {
                self.fetcher
                    .fetch(&target.filename, &target.extension, etag.as_deref())
            });
            let outcomes = futures::future::join_all(in_flight).await;

            let mut retry: Vec<FetchTarget> = Vec::new();
            for outcome in outcomes {
                if outcome.is_success() {
                    collected.push(outcome);
                    continue;
                }
                match &outcome {
                    FetchOutcome::HttpError {
                        target,
                        status,
                        description,
                    } => warn!("Attempt {attempt}: HTTP {status} ({description}) for {target}"),
                    FetchOutcome::TransportError { target, kind } => {
                        warn!("Attempt {attempt}: transport failure for {target}: {kind:?}")
                    }
                    _ => {}
                }
                retry.push(outcome.target().clone());
            }

            if retry.is_empty() {
                return Ok(collected);
            }
            if attempt >= self.settings.retry_limit {
                return Err(FetchError::RetriesExhausted { remaining: retry });
            }

            pending.retain(|(target, _)| retry.contains(target));
            attempt += 1;
            debug!(
                "Waiting {:?} before attempt {attempt} for {} target(s)",
                self.settings.retry_wait,
                pending.len()
            );
            tokio::time::sleep(self.settings.retry_wait).await;
        }
    }
}
