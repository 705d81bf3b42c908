//! Country manager: owns the worker fleet
//!
//! Bootstraps the master country index, spawns one worker per selected
//! country and forwards their progress events to an optional sink. Worker
//! failures are aggregated for reporting, never propagated: the manager only
//! fails on its own bootstrap.
//!
//! Shutdown is a command: the manager broadcasts cancellation to every
//! worker, awaits their terminal outcomes under a bounded timeout and
//! answers its caller with a goodbye summary.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::client::Fetch;
use crate::app::fetch::FetchCoordinator;
use crate::app::models::CountryInfo;
use crate::app::staging;
use crate::app::worker::{CountryWorker, WorkerEvent, WorkerEventKind, WorkerOutcome};
use crate::config::Settings;
use crate::constants::{channels, geonames};
use crate::errors::ManagerError;

/// Control messages accepted by a running manager
#[derive(Debug)]
pub enum ManagerCommand {
    /// Stop every worker and reply once they have acknowledged
    Shutdown {
        reply: oneshot::Sender<ManagerReply>,
    },
}

/// Reply to a manager command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerReply {
    /// Shutdown finished; counts summarize the worker outcomes
    Goodbye {
        ready: usize,
        failed: usize,
        cancelled: usize,
    },
}

struct WorkerHandle {
    country: String,
    task: JoinHandle<WorkerOutcome>,
}

/// Manager owning one import worker per selected country
pub struct CountryManager<F> {
    settings: Arc<Settings>,
    coordinator: Arc<FetchCoordinator<F>>,
    sink: Option<mpsc::Sender<WorkerEvent>>,
}

impl<F: Fetch> CountryManager<F> {
    pub fn new(
        settings: Arc<Settings>,
        fetcher: Arc<F>,
        sink: Option<mpsc::Sender<WorkerEvent>>,
    ) -> Self {
        let coordinator = Arc::new(FetchCoordinator::new(fetcher, settings.clone()));
        Self {
            settings,
            coordinator,
            sink,
        }
    }

    /// Bootstrap, spawn the fleet and serve until a shutdown command
    pub async fn run(
        self,
        mut commands: mpsc::Receiver<ManagerCommand>,
    ) -> Result<(), ManagerError> {
        let countries = self.bootstrap().await?;
        info!("Managing {} countries", countries.len());

        let (events_tx, mut events_rx) = mpsc::channel(channels::PROGRESS_BUFFER);
        let cancel = CancellationToken::new();
        let imports = Arc::new(Semaphore::new(self.settings.max_concurrent_imports));

        let mut handles = Vec::with_capacity(countries.len());
        for country in &countries {
            let worker = CountryWorker::new(
                country.code.clone(),
                self.settings.clone(),
                self.coordinator.clone(),
                events_tx.clone(),
                cancel.child_token(),
                imports.clone(),
            );
            handles.push(WorkerHandle {
                country: country.code.clone(),
                task: tokio::spawn(worker.run()),
            });
        }
        drop(events_tx);
        let mut handles = Some(handles);

        loop {
            tokio::select! {
                Some(event) = events_rx.recv() => self.forward(event).await,
                command = commands.recv() => {
                    let reply = match command {
                        Some(ManagerCommand::Shutdown { reply }) => Some(reply),
                        // Controller went away; wind the fleet down anyway
                        None => None,
                    };
                    let fleet = handles.take().unwrap_or_default();
                    let (ready, failed, cancelled) =
                        self.shutdown(&cancel, fleet, &mut events_rx).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(ManagerReply::Goodbye {
                            ready,
                            failed,
                            cancelled,
                        });
                    }
                    info!(
                        "Manager shut down: {ready} ready, {failed} failed, {cancelled} cancelled"
                    );
                    return Ok(());
                }
            }
        }
    }

    /// Fetch the master index and derive the selected country list
    async fn bootstrap(&self) -> Result<Vec<CountryInfo>, ManagerError> {
        self.coordinator.load_master_index().await?;

        let path = staging::text_path(&self.settings.target_dir, geonames::MASTER_INDEX);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ManagerError::Index {
                path: path.clone(),
                source,
            })?;

        let countries: Vec<CountryInfo> = CountryInfo::parse_index(&text)
            .into_iter()
            .filter(|c| self.settings.countries.contains(&c.code))
            .collect();
        if countries.is_empty() {
            return Err(ManagerError::EmptySelection);
        }
        Ok(countries)
    }

    /// Broadcast cancellation and collect every worker's terminal outcome
    async fn shutdown(
        &self,
        cancel: &CancellationToken,
        handles: Vec<WorkerHandle>,
        events_rx: &mut mpsc::Receiver<WorkerEvent>,
    ) -> (usize, usize, usize) {
        info!("Broadcasting shutdown to {} workers", handles.len());
        cancel.cancel();

        // One deadline bounds the whole fleet. Progress events keep draining
        // while we join so no worker blocks on a full channel.
        let deadline = tokio::time::Instant::now() + self.settings.shutdown_timeout;
        let (mut ready, mut failed, mut cancelled) = (0, 0, 0);
        for mut handle in handles {
            let joined = loop {
                tokio::select! {
                    joined = &mut handle.task => break Some(joined),
                    _ = tokio::time::sleep_until(deadline) => break None,
                    Some(event) = events_rx.recv() => self.forward(event).await,
                }
            };
            match joined {
                Some(Ok(WorkerOutcome::Ready { records, .. })) => {
                    debug!("{}: released {} records", handle.country, records.len());
                    ready += 1;
                }
                Some(Ok(WorkerOutcome::Failed { error, .. })) => {
                    warn!("{}: ended in failure: {error}", handle.country);
                    failed += 1;
                }
                Some(Ok(WorkerOutcome::Cancelled { .. })) => cancelled += 1,
                Some(Err(join)) => {
                    error!("{}: worker panicked: {join}", handle.country);
                    failed += 1;
                }
                None => {
                    error!(
                        "{}: no shutdown acknowledgment within {:?}",
                        handle.country, self.settings.shutdown_timeout
                    );
                    handle.task.abort();
                    failed += 1;
                }
            }
        }

        // Drain whatever progress was still in flight
        while let Ok(event) = events_rx.try_recv() {
            self.forward(event).await;
        }
        (ready, failed, cancelled)
    }

    /// Pass one worker event to the sink and the log
    async fn forward(&self, event: WorkerEvent) {
        match &event.kind {
            WorkerEventKind::Phase(phase) => info!("{}: {phase}", event.country),
            WorkerEventKind::Progress(progress) => {
                debug!("{}: file_import {:?}", event.country, progress)
            }
        }
        if let Some(sink) = &self.sink {
            sink.send(event).await.ok();
        }
    }
}
