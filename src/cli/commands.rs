//! Command handlers
//!
//! Assembles the runtime settings, starts the supervisor tree and renders
//! worker progress to stdout until the run ends or ctrl-c arrives.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::client::GeonamesClient;
use crate::app::manager::ManagerCommand;
use crate::app::supervisor::RootSupervisor;
use crate::app::worker::{ImportProgress, WorkerEvent, WorkerEventKind};
use crate::config::{self, CountrySelection, ProxySettings, Settings};
use crate::errors::{AppError, Result};

use super::args::{GlobalArgs, InitConfigArgs, RunArgs};

/// Execute the run command
pub async fn handle_run(global: GlobalArgs, args: RunArgs) -> Result<()> {
    let settings = Arc::new(build_settings(&global, args)?);
    info!(
        "Ingesting into {} from {}",
        settings.target_dir.display(),
        settings.base_url
    );

    let client = Arc::new(GeonamesClient::new(&settings)?);

    let (sink_tx, sink_rx) = mpsc::channel(256);
    let printer = tokio::spawn(print_progress(sink_rx, global.quiet));

    // First ctrl-c asks the manager to wind its fleet down; a second one
    // has the supervisor kill the manager outright.
    let (control_tx, control_rx) = mpsc::channel(4);
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("Shutdown requested; winding the fleet down");
        let (reply_tx, _reply_rx) = oneshot::channel();
        if control_tx
            .send(ManagerCommand::Shutdown { reply: reply_tx })
            .await
            .is_err()
        {
            trigger.cancel();
            return;
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt; killing the manager");
            trigger.cancel();
        }
    });

    let supervisor = RootSupervisor::new(settings, client, Some(sink_tx));
    let outcome = supervisor.run(shutdown, control_rx).await;
    let _ = printer.await;
    outcome?;
    Ok(())
}

/// Execute the init-config command
pub async fn handle_init_config(global: GlobalArgs, args: InitConfigArgs) -> Result<()> {
    let path = args
        .path
        .or(global.config)
        .unwrap_or_else(config::default_config_path);

    if path.exists() && !args.force {
        return Err(AppError::generic(format!(
            "configuration file already exists: {} (use --force to overwrite)",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let contents = Settings::default().to_toml()?;
    tokio::fs::write(&path, contents).await?;
    println!("Wrote configuration to {}", path.display());
    Ok(())
}

/// Layer CLI overrides on top of defaults and the optional config file
fn build_settings(global: &GlobalArgs, args: RunArgs) -> Result<Settings> {
    let mut settings = Settings::load(global.config.as_deref())?;

    if let Some(dir) = args.target_dir {
        settings.target_dir = dir;
    }
    if let Some(url) = args.base_url {
        settings.base_url = url;
    }
    if let (Some(host), Some(port)) = (args.proxy_host, args.proxy_port) {
        settings.proxy = Some(ProxySettings { host, port });
    }
    if let Some(population) = args.min_population {
        settings.min_population = population;
    }
    if let Some(secs) = args.stale_after {
        settings.stale_after = std::time::Duration::from_secs(secs);
    }
    if let Some(imports) = args.max_concurrent_imports {
        settings.max_concurrent_imports = imports;
    }
    if !args.countries.is_empty() {
        settings.countries = CountrySelection::from_codes(&args.countries);
    }
    if global.trace {
        settings.trace = true;
    }

    settings.validate()?;
    Ok(settings)
}

/// Render worker progress to stdout
///
/// Percent pulses stay quiet; completions and failures are one line each.
async fn print_progress(mut events: mpsc::Receiver<WorkerEvent>, quiet: bool) {
    use crate::app::worker::WorkerPhase;

    while let Some(event) = events.recv().await {
        if quiet {
            continue;
        }
        match event.kind {
            WorkerEventKind::Progress(ImportProgress::Complete) => {
                println!("{}: import complete", event.country);
            }
            WorkerEventKind::Phase(WorkerPhase::Failed) => {
                println!("{}: import failed", event.country);
            }
            _ => {}
        }
    }
}
