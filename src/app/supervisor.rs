//! Root supervisor for the country manager
//!
//! Supervises exactly one child. The manager is restarted on its own crash,
//! at most once within a five second window; a second crash inside the
//! window takes the whole subsystem down.
//!
//! Shutdown comes in two flavors. A command on the control channel is
//! relayed to the manager, which winds its fleet down, answers goodbye and
//! exits; orderly per-country shutdown stays the manager's job. The
//! supervisor's own stop signal is a brutal kill: the manager task is
//! aborted on the spot, with no graceful period, and in-flight per-country
//! temp files may leak.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::app::client::Fetch;
use crate::app::manager::{CountryManager, ManagerCommand, ManagerReply};
use crate::app::worker::WorkerEvent;
use crate::config::Settings;
use crate::constants::{channels, limits};
use crate::errors::{ManagerError, SupervisorError};

/// Supervisor starting and restarting the country manager
pub struct RootSupervisor<F> {
    settings: Arc<Settings>,
    fetcher: Arc<F>,
    sink: Option<mpsc::Sender<WorkerEvent>>,
}

impl<F: Fetch> RootSupervisor<F> {
    pub fn new(
        settings: Arc<Settings>,
        fetcher: Arc<F>,
        sink: Option<mpsc::Sender<WorkerEvent>>,
    ) -> Self {
        Self {
            settings,
            fetcher,
            sink,
        }
    }

    /// Supervise until the manager exits normally or the budget is spent
    ///
    /// `control` carries orderly shutdown commands, relayed to the current
    /// manager incarnation. `shutdown` is the kill switch: the manager task
    /// is aborted immediately, without a handshake.
    pub async fn run(
        self,
        shutdown: CancellationToken,
        mut control: mpsc::Receiver<ManagerCommand>,
    ) -> Result<(), SupervisorError> {
        let mut restarts: Vec<Instant> = Vec::new();
        let mut control_open = true;

        loop {
            let (commands_tx, commands_rx) = mpsc::channel(channels::COMMAND_BUFFER);
            let manager = CountryManager::new(
                self.settings.clone(),
                self.fetcher.clone(),
                self.sink.clone(),
            );
            let mut task = tokio::spawn(manager.run(commands_rx));
            info!("Country manager started");

            loop {
                tokio::select! {
                    exit = &mut task => {
                        match exit {
                            Ok(Ok(())) => {
                                info!("Country manager exited normally");
                                return Ok(());
                            }
                            Ok(Err(e)) => error!("Country manager failed: {e}"),
                            Err(join) => error!("Country manager crashed: {join}"),
                        }

                        let now = Instant::now();
                        restarts.retain(|at| now.duration_since(*at) <= limits::RESTART_PERIOD);
                        if restarts.len() as u32 >= limits::MAX_RESTARTS {
                            return Err(SupervisorError::RestartBudgetExhausted {
                                restarts: restarts.len() as u32,
                                period_secs: limits::RESTART_PERIOD.as_secs(),
                            });
                        }
                        restarts.push(now);
                        warn!("Restarting country manager");
                        break;
                    }
                    command = control.recv(), if control_open => match command {
                        Some(ManagerCommand::Shutdown { reply }) => {
                            return self.relay_shutdown(&commands_tx, task, reply).await;
                        }
                        None => control_open = false,
                    },
                    _ = shutdown.cancelled() => {
                        // Brutal kill. Temp files of in-flight imports are
                        // discardable, so nothing is waited for.
                        warn!("Killing the country manager");
                        task.abort();
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Relay one shutdown command and insist on a goodbye back
    ///
    /// The manager bounds its own fleet wind-down, so the only anomaly left
    /// is the handshake breaking, which is fatal with a diagnostic.
    async fn relay_shutdown(
        &self,
        commands: &mpsc::Sender<ManagerCommand>,
        task: JoinHandle<Result<(), ManagerError>>,
        reply: oneshot::Sender<ManagerReply>,
    ) -> Result<(), SupervisorError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if commands
            .send(ManagerCommand::Shutdown { reply: ack_tx })
            .await
            .is_err()
        {
            task.abort();
            return Err(SupervisorError::UnexpectedReply {
                detail: "manager went away before the shutdown command".to_string(),
            });
        }

        match ack_rx.await {
            Ok(ManagerReply::Goodbye {
                ready,
                failed,
                cancelled,
            }) => {
                info!("Manager said goodbye: {ready} ready, {failed} failed, {cancelled} cancelled");
                let _ = reply.send(ManagerReply::Goodbye {
                    ready,
                    failed,
                    cancelled,
                });
                let _ = task.await;
                Ok(())
            }
            Err(_) => {
                task.abort();
                Err(SupervisorError::UnexpectedReply {
                    detail: "shutdown channel closed before goodbye".to_string(),
                })
            }
        }
    }
}
