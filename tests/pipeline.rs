//! End-to-end pipeline tests
//!
//! Drives the country manager against a scripted upstream: cold start,
//! fast path, 304 refresh and the population boundary, checking the
//! on-disk country layout after each run.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use geonames_fetcher::app::client::{Fetch, FetchOutcome, FetchTarget, TransportKind};
use geonames_fetcher::app::manager::{CountryManager, ManagerCommand, ManagerReply};
use geonames_fetcher::app::{models, staging};
use geonames_fetcher::config::Settings;

/// What the scripted upstream answers to country archive requests
enum ZipBehavior {
    /// HTTP 200 with a zip holding the given dump rows
    Archive(String),
    /// HTTP 304
    Unchanged,
    /// Connection refused
    Refuse,
}

/// Scripted upstream serving the master index and one country
struct ScriptedUpstream {
    index: String,
    zip: ZipBehavior,
    zip_calls: AtomicU32,
    temp_dir: tempfile::TempDir,
}

impl ScriptedUpstream {
    fn new(index: &str, zip: ZipBehavior) -> Self {
        Self {
            index: index.to_string(),
            zip,
            zip_calls: AtomicU32::new(0),
            temp_dir: tempfile::tempdir().unwrap(),
        }
    }

    fn zip_calls(&self) -> u32 {
        self.zip_calls.load(Ordering::SeqCst)
    }
}

impl Fetch for ScriptedUpstream {
    async fn fetch(
        &self,
        filename: &str,
        extension: &str,
        _prior_etag: Option<&str>,
    ) -> FetchOutcome {
        let target = FetchTarget::new(filename, extension);
        if extension == ".txt" {
            let temp_path = self.temp_dir.path().join("index.part");
            std::fs::write(&temp_path, &self.index).unwrap();
            return FetchOutcome::Fresh {
                target,
                etag: None,
                temp_path,
            };
        }

        let n = self.zip_calls.fetch_add(1, Ordering::SeqCst);
        match &self.zip {
            ZipBehavior::Refuse => FetchOutcome::TransportError {
                target,
                kind: TransportKind::ConnectionRefused,
            },
            ZipBehavior::Unchanged => FetchOutcome::Unchanged { target },
            ZipBehavior::Archive(rows) => {
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
                    etag: Some("\"integration-v1\"".to_string()),
                    temp_path,
                }
            }
        }
    }
}

/// One 19-column GeoNames dump row
fn row(
    id: u64,
    name: &str,
    fclass: &str,
    fcode: &str,
    cc: &str,
    admin1: &str,
    population: u64,
) -> String {
    let mut fields = vec![String::new(); 19];
    fields[0] = id.to_string();
    fields[1] = name.to_string();
    fields[2] = name.to_ascii_lowercase();
    fields[4] = "47.14151".to_string();
    fields[5] = "9.52154".to_string();
    fields[6] = fclass.to_string();
    fields[7] = fcode.to_string();
    fields[8] = cc.to_string();
    fields[10] = admin1.to_string();
    fields[14] = population.to_string();
    fields[17] = "Europe/Vaduz".to_string();
    fields.join("\t")
}

fn index_for(cc: &str, name: &str) -> String {
    format!("# GeoNames country index\n{cc}\tXXX\t000\tXX\t{name}\tCapital\t1\t1\tEU\t\n")
}

fn settings_for(target_dir: &Path) -> Arc<Settings> {
    Arc::new(Settings {
        target_dir: target_dir.to_path_buf(),
        retry_wait: Duration::from_millis(10),
        ..Settings::default()
    })
}

/// Run a manager to quiescence and shut it down with the command protocol
async fn run_to_goodbye(settings: Arc<Settings>, upstream: Arc<ScriptedUpstream>) -> ManagerReply {
    let manager = CountryManager::new(settings, upstream, None);
    let (cmd_tx, cmd_rx) = mpsc::channel(4);
    let run = tokio::spawn(manager.run(cmd_rx));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let (reply_tx, reply_rx) = oneshot::channel();
    cmd_tx
        .send(ManagerCommand::Shutdown { reply: reply_tx })
        .await
        .unwrap();
    let reply = reply_rx.await.unwrap();
    run.await.unwrap().unwrap();
    reply
}

#[tokio::test]
async fn cold_start_curates_liechtenstein() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(dir.path());
    let rows = format!(
        "{}\n{}\n",
        row(3042058, "Oberland", "A", "ADM1", "LI", "01", 0),
        row(3042030, "Vaduz", "P", "PPLC", "LI", "01", 5400),
    );
    let upstream = Arc::new(ScriptedUpstream::new(
        &index_for("LI", "Liechtenstein"),
        ZipBehavior::Archive(rows),
    ));

    let reply = run_to_goodbye(settings.clone(), upstream).await;
    assert_eq!(
        reply,
        ManagerReply::Goodbye {
            ready: 1,
            failed: 0,
            cancelled: 0
        }
    );

    // Curated output: exactly Vaduz, enriched with its admin1 name
    let records = models::read_fcp(&staging::fcp_path(&settings.target_dir, "LI"))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "Vaduz");
    assert_eq!(records[0].country_code, "LI");
    assert_eq!(records[0].population, 5400);
    assert_eq!(records[0].admin1_txt.as_deref(), Some("Oberland"));

    // Rest layout: etag and curation present, transients gone
    assert!(staging::etag_path(&settings.target_dir, "LI").exists());
    assert!(!staging::text_path(&settings.target_dir, "LI").exists());
    assert!(!staging::country_dir(&settings.target_dir, "LI")
        .join("LI.zip")
        .exists());
}

#[tokio::test]
async fn fresh_cache_skips_the_country_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(dir.path());
    let rows = format!("{}\n", row(3042030, "Vaduz", "P", "PPLC", "LI", "01", 5400));
    let first = Arc::new(ScriptedUpstream::new(
        &index_for("LI", "Liechtenstein"),
        ZipBehavior::Archive(rows),
    ));
    run_to_goodbye(settings.clone(), first).await;

    // Second run within the staleness window: the archive must not be asked for
    let second = Arc::new(ScriptedUpstream::new(
        &index_for("LI", "Liechtenstein"),
        ZipBehavior::Refuse,
    ));
    let reply = run_to_goodbye(settings.clone(), second.clone()).await;

    assert_eq!(
        reply,
        ManagerReply::Goodbye {
            ready: 1,
            failed: 0,
            cancelled: 0
        }
    );
    assert_eq!(second.zip_calls(), 0);
}

#[tokio::test]
async fn not_modified_leaves_the_curation_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(dir.path());
    let rows = format!("{}\n", row(3042030, "Vaduz", "P", "PPLC", "LI", "01", 5400));
    let first = Arc::new(ScriptedUpstream::new(
        &index_for("LI", "Liechtenstein"),
        ZipBehavior::Archive(rows),
    ));
    run_to_goodbye(settings.clone(), first).await;

    let fcp = staging::fcp_path(&settings.target_dir, "LI");
    let etag = staging::etag_path(&settings.target_dir, "LI");
    let fcp_before = std::fs::read(&fcp).unwrap();
    let etag_before = std::fs::read(&etag).unwrap();

    // Everything is stale now, and the server answers 304
    let stale = Arc::new(Settings {
        stale_after: Duration::ZERO,
        ..(*settings).clone()
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let revalidating = Arc::new(ScriptedUpstream::new(
        &index_for("LI", "Liechtenstein"),
        ZipBehavior::Unchanged,
    ));
    let reply = run_to_goodbye(stale, revalidating.clone()).await;

    assert_eq!(
        reply,
        ManagerReply::Goodbye {
            ready: 1,
            failed: 0,
            cancelled: 0
        }
    );
    assert_eq!(revalidating.zip_calls(), 1);
    assert_eq!(std::fs::read(&fcp).unwrap(), fcp_before);
    assert_eq!(std::fs::read(&etag).unwrap(), etag_before);
}

#[tokio::test]
async fn population_boundary_is_inclusive() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(dir.path());
    let rows = format!(
        "{}\n{}\n",
        row(1, "Under", "P", "PPL", "VA", "", 499),
        row(2, "Edge", "P", "PPL", "VA", "", 500),
    );
    let upstream = Arc::new(ScriptedUpstream::new(
        &index_for("VA", "Holy See"),
        ZipBehavior::Archive(rows),
    ));

    run_to_goodbye(settings.clone(), upstream).await;

    let records = models::read_fcp(&staging::fcp_path(&settings.target_dir, "VA"))
        .await
        .unwrap();
    let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["Edge"]);
}

#[tokio::test]
async fn refused_country_preserves_the_previous_curation() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_for(dir.path());
    let rows = format!("{}\n", row(3042030, "Vaduz", "P", "PPLC", "LI", "01", 5400));
    let first = Arc::new(ScriptedUpstream::new(
        &index_for("LI", "Liechtenstein"),
        ZipBehavior::Archive(rows),
    ));
    run_to_goodbye(settings.clone(), first).await;
    let fcp = staging::fcp_path(&settings.target_dir, "LI");
    let fcp_before = std::fs::read(&fcp).unwrap();

    // Stale cache, dead upstream: the worker fails, the file survives
    let stale = Arc::new(Settings {
        stale_after: Duration::ZERO,
        ..(*settings).clone()
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let dead = Arc::new(ScriptedUpstream::new(
        &index_for("LI", "Liechtenstein"),
        ZipBehavior::Refuse,
    ));
    let reply = run_to_goodbye(stale, dead.clone()).await;

    assert_eq!(
        reply,
        ManagerReply::Goodbye {
            ready: 0,
            failed: 1,
            cancelled: 0
        }
    );
    assert_eq!(dead.zip_calls(), 3);
    assert_eq!(std::fs::read(&fcp).unwrap(), fcp_before);
}
