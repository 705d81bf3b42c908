//! Staging store: moves fetched files into the per-country layout
//!
//! Owns the on-disk layout under the target directory. Each fetched file set
//! lives in `<target_dir>/<name>/`: the `etag` marker, the transient
//! `<name>.txt` and the authoritative `<CC>_fcp.txt`.
//!
//! Text files are moved into place (with a copy fallback when the temp file
//! lives on another device); archives have only the `<name>.txt` entry
//! extracted, and the archive itself is deleted right after.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::app::client::FetchTarget;
use crate::constants::geonames;
use crate::errors::{StageError, StageResult};

/// Directory holding a country's file set
pub fn country_dir(target_dir: &Path, name: &str) -> PathBuf {
    target_dir.join(name)
}

/// Path of the cache validator marker
pub fn etag_path(target_dir: &Path, name: &str) -> PathBuf {
    country_dir(target_dir, name).join(geonames::ETAG_FILE)
}

/// Path of the extracted (transient) text file
pub fn text_path(target_dir: &Path, name: &str) -> PathBuf {
    country_dir(target_dir, name).join(format!("{name}{}", geonames::TXT_EXTENSION))
}

/// Path of the curated populated-place file
pub fn fcp_path(target_dir: &Path, cc: &str) -> PathBuf {
    country_dir(target_dir, cc).join(format!("{cc}{}", geonames::FCP_SUFFIX))
}

/// Stage a freshly fetched file into the country directory
///
/// Writes the etag marker (whole-file replace) when the server provided one,
/// then hands the temp file to the type-specific handler. Archive failures
/// are fatal for the country's refresh and surface as [`StageError`].
pub async fn stage(
    target_dir: &Path,
    target: &FetchTarget,
    etag: Option<&str>,
    temp_path: &Path,
) -> StageResult<()> {
    let dir = country_dir(target_dir, &target.filename);
    tokio::fs::create_dir_all(&dir).await?;

    if let Some(etag) = etag {
        tokio::fs::write(etag_path(target_dir, &target.filename), etag).await?;
    }

    match target.extension.as_str() {
        geonames::TXT_EXTENSION => {
            let dest = dir.join(target.remote_name());
            move_into_place(temp_path, &dest).await?;
            debug!("Staged {} at {}", target, dest.display());
            Ok(())
        }
        geonames::ZIP_EXTENSION => {
            let entry = format!("{}{}", target.filename, geonames::TXT_EXTENSION);
            let dest = dir.join(&entry);
            let result = extract_entry(temp_path.to_path_buf(), entry, dest).await;
            if let Err(e) = tokio::fs::remove_file(temp_path).await {
                // Transient file cleanup is logged, never fatal
                warn!("Could not delete temp archive {}: {e}", temp_path.display());
            }
            result?;
            debug!("Extracted {} into {}", target, dir.display());
            Ok(())
        }
        other => Err(StageError::UnsupportedExtension {
            extension: other.to_string(),
        }),
    }
}

/// Move a temp file to its destination, copying when rename cannot cross devices
async fn move_into_place(temp_path: &Path, dest: &Path) -> StageResult<()> {
    if tokio::fs::rename(temp_path, dest).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(temp_path, dest).await?;
    tokio::fs::remove_file(temp_path).await?;
    Ok(())
}

/// Extract a single named entry from a zip archive
///
/// Archive decoding is synchronous, so it runs on the blocking pool.
async fn extract_entry(archive_path: PathBuf, entry: String, dest: PathBuf) -> StageResult<()> {
    let handle = tokio::task::spawn_blocking(move || -> StageResult<()> {
        let file = std::fs::File::open(&archive_path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        let mut source = match archive.by_name(&entry) {
            Ok(source) => source,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(StageError::MissingEntry {
                    archive: archive_path,
                    entry,
                })
            }
            Err(e) => return Err(e.into()),
        };
        let mut out = std::fs::File::create(&dest)?;
        std::io::copy(&mut source, &mut out)?;
        Ok(())
    });
    handle
        .await
        .map_err(|e| StageError::Io(std::io::Error::other(e)))?
}
