//! Per-country import worker
//!
//! One worker owns the full flow for its country: staleness check,
//! conditional fetch, archive staging, parse, hierarchy build, enrichment
//! and atomic persistence. After a successful import it keeps the curated
//! record list as its serving state and idles until shutdown.
//!
//! Failures stay inside the worker. A country whose refresh dies reports a
//! terminal failure to the manager and leaves any previously curated file
//! untouched; sibling countries never notice.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::app::client::{Fetch, FetchTarget};
use crate::app::fetch::{CountryFetch, FetchCoordinator};
use crate::app::models::GeonameRecord;
use crate::app::{enrich, hierarchy, models, parser, staging};
use crate::config::Settings;
use crate::constants::geonames;
use crate::errors::{FetchError, ParseError, WorkerError};

/// Lifecycle phase of a country worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    CheckingForUpdate,
    Fetching,
    Extracting,
    Parsing,
    BuildingHierarchy,
    Enriching,
    Persisting,
    LoadingFcp,
    Ready,
    Failed,
    Stopped,
}

impl std::fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CheckingForUpdate => "checking_for_update",
            Self::Fetching => "fetching",
            Self::Extracting => "extracting",
            Self::Parsing => "parsing",
            Self::BuildingHierarchy => "building_hierarchy",
            Self::Enriching => "enriching",
            Self::Persisting => "persisting",
            Self::LoadingFcp => "loading_fcp",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// File-import progress: percent pulses followed by a completion sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportProgress {
    Percent(u8),
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerEventKind {
    Phase(WorkerPhase),
    Progress(ImportProgress),
}

/// One progress message from a worker to the manager's sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEvent {
    pub country: String,
    pub kind: WorkerEventKind,
    pub timestamp: DateTime<Utc>,
}

impl WorkerEvent {
    pub fn phase(country: &str, phase: WorkerPhase) -> Self {
        Self {
            country: country.to_string(),
            kind: WorkerEventKind::Phase(phase),
            timestamp: Utc::now(),
        }
    }

    pub fn import_progress(country: &str, progress: ImportProgress) -> Self {
        Self {
            country: country.to_string(),
            kind: WorkerEventKind::Progress(progress),
            timestamp: Utc::now(),
        }
    }

    /// Percent payload, when this event is a percent pulse
    pub fn percent(&self) -> Option<u8> {
        match self.kind {
            WorkerEventKind::Progress(ImportProgress::Percent(p)) => Some(p),
            _ => None,
        }
    }

    /// Whether this event is the import completion sentinel
    pub fn is_complete(&self) -> bool {
        matches!(
            self.kind,
            WorkerEventKind::Progress(ImportProgress::Complete)
        )
    }
}

/// Terminal report of one worker, collected by the manager at shutdown
#[derive(Debug)]
pub enum WorkerOutcome {
    /// The curated record list the worker was serving
    Ready {
        country: String,
        records: Vec<GeonameRecord>,
    },
    /// The import failed; any earlier curation is preserved on disk
    Failed {
        country: String,
        error: WorkerError,
    },
    /// Shutdown arrived before the pipeline finished
    Cancelled { country: String },
}

/// How a pipeline attempt ended, before the worker settles into idle
enum PipelineEnd {
    Cancelled,
    Failed(WorkerError),
}

impl From<WorkerError> for PipelineEnd {
    fn from(error: WorkerError) -> Self {
        match error {
            WorkerError::Parse(ParseError::Cancelled) => Self::Cancelled,
            other => Self::Failed(other),
        }
    }
}

/// Worker importing and serving a single country
pub struct CountryWorker<F> {
    country: String,
    settings: Arc<Settings>,
    coordinator: Arc<FetchCoordinator<F>>,
    events: mpsc::Sender<WorkerEvent>,
    cancel: CancellationToken,
    imports: Arc<Semaphore>,
}

impl<F: Fetch> CountryWorker<F> {
    pub fn new(
        country: impl Into<String>,
        settings: Arc<Settings>,
        coordinator: Arc<FetchCoordinator<F>>,
        events: mpsc::Sender<WorkerEvent>,
        cancel: CancellationToken,
        imports: Arc<Semaphore>,
    ) -> Self {
        Self {
            country: country.into(),
            settings,
            coordinator,
            events,
            cancel,
            imports,
        }
    }

    /// Run the import pipeline, then serve the curated list until shutdown
    ///
    /// The import permit bounds how many pipelines run at once; it is
    /// released as soon as the pipeline ends, before the serving idle.
    pub async fn run(self) -> WorkerOutcome {
        let permit = tokio::select! {
            _ = self.cancel.cancelled() => None,
            permit = self.imports.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            self.report_phase(WorkerPhase::Stopped).await;
            return WorkerOutcome::Cancelled {
                country: self.country,
            };
        };

        let pipeline = self.run_pipeline().await;
        drop(permit);

        let records = match pipeline {
            Ok(records) => records,
            Err(PipelineEnd::Cancelled) => {
                self.report_phase(WorkerPhase::Stopped).await;
                return WorkerOutcome::Cancelled {
                    country: self.country,
                };
            }
            Err(PipelineEnd::Failed(error)) => {
                error!("{}: import failed: {error}", self.country);
                self.report_phase(WorkerPhase::Failed).await;
                self.cancel.cancelled().await;
                self.report_phase(WorkerPhase::Stopped).await;
                return WorkerOutcome::Failed {
                    country: self.country,
                    error,
                };
            }
        };

        self.send(WorkerEvent::import_progress(
            &self.country,
            ImportProgress::Complete,
        ))
        .await;
        self.report_phase(WorkerPhase::Ready).await;
        info!("{}: serving {} curated records", self.country, records.len());

        self.cancel.cancelled().await;
        self.report_phase(WorkerPhase::Stopped).await;
        WorkerOutcome::Ready {
            country: self.country,
            records,
        }
    }

    async fn run_pipeline(&self) -> Result<Vec<GeonameRecord>, PipelineEnd> {
        self.report_phase(WorkerPhase::CheckingForUpdate).await;
        if !self.coordinator.is_stale(&self.country).await {
            return self.load_curated().await;
        }

        self.checkpoint()?;
        self.report_phase(WorkerPhase::Fetching).await;
        let fetched = match self.coordinator.fetch_country(&self.country).await {
            Ok(fetched) => fetched,
            Err(FetchError::RetriesExhausted { .. }) => {
                return Err(WorkerError::RetryExhausted.into())
            }
            Err(FetchError::Stage(e)) => return Err(WorkerError::Archive(e).into()),
        };

        match fetched {
            CountryFetch::NotModified => self.load_curated().await,
            CountryFetch::Fresh { etag, temp_path } => {
                self.refresh(etag.as_deref(), &temp_path).await
            }
        }
    }

    /// Fast path: the curated file on disk is authoritative
    async fn load_curated(&self) -> Result<Vec<GeonameRecord>, PipelineEnd> {
        self.report_phase(WorkerPhase::LoadingFcp).await;
        let path = staging::fcp_path(&self.settings.target_dir, &self.country);
        let records = models::read_fcp(&path)
            .await
            .map_err(|e| PipelineEnd::Failed(WorkerError::Load(e)))?;
        Ok(records)
    }

    /// Refresh path: stage, parse, build, enrich, persist
    async fn refresh(
        &self,
        etag: Option<&str>,
        temp_path: &std::path::Path,
    ) -> Result<Vec<GeonameRecord>, PipelineEnd> {
        self.checkpoint()?;
        self.report_phase(WorkerPhase::Extracting).await;
        let target = FetchTarget::new(&self.country, geonames::ZIP_EXTENSION);
        staging::stage(&self.settings.target_dir, &target, etag, temp_path)
            .await
            .map_err(|e| PipelineEnd::Failed(WorkerError::Archive(e)))?;

        self.checkpoint()?;
        self.report_phase(WorkerPhase::Parsing).await;
        let parsed =
            parser::parse_country_file(&self.settings, &self.country, &self.events, &self.cancel)
                .await
                .map_err(WorkerError::Parse)?;

        self.checkpoint()?;
        self.report_phase(WorkerPhase::BuildingHierarchy).await;
        let hierarchy = hierarchy::spawn(&self.country, parsed.admins);

        self.report_phase(WorkerPhase::Enriching).await;
        let enriched = enrich::enrich(&self.country, parsed.populated, &hierarchy).await;
        drop(hierarchy);

        self.checkpoint()?;
        self.report_phase(WorkerPhase::Persisting).await;
        let fcp = staging::fcp_path(&self.settings.target_dir, &self.country);
        models::write_fcp(&fcp, &enriched)
            .await
            .map_err(|e| PipelineEnd::Failed(WorkerError::Persist(e)))?;

        let text = staging::text_path(&self.settings.target_dir, &self.country);
        if let Err(e) = tokio::fs::remove_file(&text).await {
            // Leftover transient file; the curated output is already safe
            warn!("{}: could not delete {}: {e}", self.country, text.display());
        }

        Ok(enriched)
    }

    fn checkpoint(&self) -> Result<(), PipelineEnd> {
        if self.cancel.is_cancelled() {
            Err(PipelineEnd::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn report_phase(&self, phase: WorkerPhase) {
        self.send(WorkerEvent::phase(&self.country, phase)).await;
    }

    async fn send(&self, event: WorkerEvent) {
        self.events.send(event).await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::app::client::{FetchOutcome, TransportKind};

    enum StubBehavior {
        /// Serve a zip archive holding the given country rows
        Archive(String),
        /// Always answer 304
        Unchanged,
        /// Always refuse the connection
        Refuse,
    }

    struct StubFetch {
        behavior: StubBehavior,
        calls: AtomicU32,
        temp_dir: tempfile::TempDir,
    }

    impl StubFetch {
        fn new(behavior: StubBehavior) -> Self {
            Self {
                behavior,
                calls: AtomicU32::new(0),
                temp_dir: tempfile::tempdir().unwrap(),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Fetch for StubFetch {
        async fn fetch(
            &self,
            filename: &str,
            extension: &str,
            _prior_etag: Option<&str>,
        ) -> FetchOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let target = FetchTarget::new(filename, extension);
            match &self.behavior {
                StubBehavior::Refuse => FetchOutcome::TransportError {
                    target,
                    kind: TransportKind::ConnectionRefused,
                },
                StubBehavior::Unchanged => FetchOutcome::Unchanged { target },
                StubBehavior::Archive(rows) => {
                    let temp_path = self.temp_dir.path().join(format!("{filename}-{n}.part"));
                    let file = std::fs::File::create(&temp_path).unwrap();
                    let mut writer = zip::ZipWriter::new(file);
                    writer
                        .start_file(
                            format!("{filename}.txt"),
                            zip::write::SimpleFileOptions::default(),
                        )
                        .unwrap();
                    writer.write_all(rows.as_bytes()).unwrap();
                    writer.finish().unwrap();
                    FetchOutcome::Fresh {
                        target,
                        etag: Some("\"stub-v1\"".to_string()),
                        temp_path,
                    }
                }
            }
        }
    }

    fn row(
        id: u64,
        name: &str,
        fclass: &str,
        fcode: &str,
        admin1: &str,
        population: &str,
    ) -> String {
        let mut fields = vec![String::new(); 19];
        fields[0] = id.to_string();
        fields[1] = name.to_string();
        fields[4] = "47.1".to_string();
        fields[5] = "9.5".to_string();
        fields[6] = fclass.to_string();
        fields[7] = fcode.to_string();
        fields[8] = "LI".to_string();
        fields[10] = admin1.to_string();
        fields[14] = population.to_string();
        fields[17] = "Europe/Vaduz".to_string();
        fields.join("\t")
    }

    fn test_settings(target_dir: &Path, retry_wait_ms: u64) -> Arc<Settings> {
        Arc::new(Settings {
            target_dir: target_dir.to_path_buf(),
            retry_wait: Duration::from_millis(retry_wait_ms),
            ..Settings::default()
        })
    }

    struct Harness {
        outcome: WorkerOutcome,
        events: Vec<WorkerEvent>,
    }

    async fn run_worker(stub: Arc<StubFetch>, settings: Arc<Settings>) -> Harness {
        let coordinator = Arc::new(FetchCoordinator::new(stub, settings.clone()));
        let (tx, mut rx) = mpsc::channel(1024);
        let cancel = CancellationToken::new();
        let worker = CountryWorker::new(
            "LI",
            settings,
            coordinator,
            tx,
            cancel.clone(),
            Arc::new(Semaphore::new(2)),
        );

        let handle = tokio::spawn(worker.run());
        // Give the pipeline room to finish, then order shutdown
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        let outcome = handle.await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        Harness { outcome, events }
    }

    fn phases(events: &[WorkerEvent]) -> Vec<WorkerPhase> {
        events
            .iter()
            .filter_map(|e| match e.kind {
                WorkerEventKind::Phase(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn cold_start_curates_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let rows = format!(
            "{}\n{}\n",
            row(1, "Oberland", "A", "ADM1", "01", "0"),
            row(2, "Vaduz", "P", "PPLC", "01", "5401"),
        );
        let stub = Arc::new(StubFetch::new(StubBehavior::Archive(rows)));
        let settings = test_settings(dir.path(), 10);

        let harness = run_worker(stub, settings.clone()).await;

        match &harness.outcome {
            WorkerOutcome::Ready { records, .. } => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].name, "Vaduz");
                assert_eq!(records[0].admin1_txt.as_deref(), Some("Oberland"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let country = staging::country_dir(&settings.target_dir, "LI");
        assert!(staging::etag_path(&settings.target_dir, "LI").exists());
        assert!(staging::fcp_path(&settings.target_dir, "LI").exists());
        assert!(!staging::text_path(&settings.target_dir, "LI").exists());
        assert!(!country.join("LI.zip").exists());

        let persisted = models::read_fcp(&staging::fcp_path(&settings.target_dir, "LI"))
            .await
            .unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].admin1_txt.as_deref(), Some("Oberland"));

        assert!(harness.events.iter().any(|e| e.is_complete()));
        assert!(phases(&harness.events).contains(&WorkerPhase::Ready));
    }

    #[tokio::test]
    async fn fresh_etag_takes_the_fast_path_without_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path(), 10);

        // A fresh marker and a valid curated file already on disk
        let fcp = staging::fcp_path(&settings.target_dir, "LI");
        std::fs::create_dir_all(fcp.parent().unwrap()).unwrap();
        std::fs::write(
            staging::etag_path(&settings.target_dir, "LI"),
            "\"cached\"",
        )
        .unwrap();
        let cached = vec![parser::parse_line(&row(2, "Vaduz", "P", "PPLC", "01", "5401")).unwrap()];
        models::write_fcp(&fcp, &cached).await.unwrap();

        let stub = Arc::new(StubFetch::new(StubBehavior::Refuse));
        let harness = run_worker(stub.clone(), settings).await;

        assert_eq!(stub.calls(), 0);
        match &harness.outcome {
            WorkerOutcome::Ready { records, .. } => assert_eq!(records, &cached),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let seen = phases(&harness.events);
        assert!(seen.contains(&WorkerPhase::LoadingFcp));
        assert!(!seen.contains(&WorkerPhase::Fetching));
        assert!(harness.events.iter().any(|e| e.is_complete()));
    }

    #[tokio::test]
    async fn not_modified_reloads_the_existing_curation() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(Settings {
            target_dir: dir.path().to_path_buf(),
            stale_after: Duration::ZERO,
            ..Settings::default()
        });

        let fcp = staging::fcp_path(&settings.target_dir, "LI");
        std::fs::create_dir_all(fcp.parent().unwrap()).unwrap();
        std::fs::write(staging::etag_path(&settings.target_dir, "LI"), "\"old\"").unwrap();
        let cached = vec![parser::parse_line(&row(2, "Vaduz", "P", "PPLC", "01", "5401")).unwrap()];
        models::write_fcp(&fcp, &cached).await.unwrap();
        let fcp_before = std::fs::read(&fcp).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stub = Arc::new(StubFetch::new(StubBehavior::Unchanged));
        let harness = run_worker(stub.clone(), settings.clone()).await;

        assert_eq!(stub.calls(), 1);
        match &harness.outcome {
            WorkerOutcome::Ready { records, .. } => assert_eq!(records, &cached),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // A 304 rewrites neither the curation nor the marker
        assert_eq!(std::fs::read(&fcp).unwrap(), fcp_before);
        assert_eq!(
            std::fs::read(staging::etag_path(&settings.target_dir, "LI")).unwrap(),
            b"\"old\""
        );
        assert!(phases(&harness.events).contains(&WorkerPhase::LoadingFcp));
    }

    #[tokio::test]
    async fn retry_exhaustion_fails_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubFetch::new(StubBehavior::Refuse));
        let settings = test_settings(dir.path(), 10);

        let harness = run_worker(stub.clone(), settings.clone()).await;

        assert_eq!(stub.calls(), 3);
        match &harness.outcome {
            WorkerOutcome::Failed { error, .. } => {
                assert!(matches!(error, WorkerError::RetryExhausted))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!staging::country_dir(&settings.target_dir, "LI").exists());
        assert!(phases(&harness.events).contains(&WorkerPhase::Failed));
    }
}
