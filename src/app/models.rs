//! Data models for the GeoNames fetcher
//!
//! Defines the master country index entries, the curated geoname record and
//! the codec for the persisted FCP (feature-class P) file.
//!
//! A missing TSV field is represented as `None`, which is distinct from an
//! empty string. The curated `name` field is stored as raw text so the
//! serving layer can search it directly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{PersistError, PersistResult};

/// Terminator byte closing a well-formed FCP file
pub const FCP_TERMINATOR: u8 = b'\n';

/// One entry of the master country index (`countryInfo.txt`)
///
/// Created once per process start and stable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryInfo {
    /// ISO2 country code
    pub code: String,
    /// Country display name
    pub name: String,
    /// Continent code
    pub continent: String,
}

impl CountryInfo {
    /// Parse one line of `countryInfo.txt`
    ///
    /// Comment lines (first byte `#`) and rows without the code, name and
    /// continent columns yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        if line.starts_with('#') || line.trim().is_empty() {
            return None;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        // Columns 1, 5 and 9 of the upstream index
        let code = non_empty(fields.first()?)?;
        let name = non_empty(fields.get(4)?)?;
        let continent = non_empty(fields.get(8)?)?;
        Some(Self {
            code: code.to_ascii_uppercase(),
            name,
            continent,
        })
    }

    /// Parse the whole master index, skipping comments and malformed rows
    pub fn parse_index(text: &str) -> Vec<Self> {
        text.lines().filter_map(Self::parse_line).collect()
    }
}

/// A curated subset of one GeoNames TSV row
///
/// `admin1_txt`..`admin4_txt` are populated only for class-P records after
/// enrichment; class-A records carry `None` there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeonameRecord {
    pub id: u64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub feature_class: char,
    pub feature_code: String,
    pub country_code: String,
    pub admin1: Option<String>,
    pub admin2: Option<String>,
    pub admin3: Option<String>,
    pub admin4: Option<String>,
    pub population: u64,
    pub timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin1_txt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin2_txt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin3_txt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin4_txt: Option<String>,
}

/// Encode a curated record list as a single self-delimited term
///
/// The payload is one JSON array followed by a terminator byte; a reader that
/// does not find the terminator at the end knows the file was cut short.
pub fn encode_fcp(records: &[GeonameRecord]) -> PersistResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec(records)?;
    bytes.push(FCP_TERMINATOR);
    Ok(bytes)
}

/// Decode a curated record list, rejecting truncated files
pub fn decode_fcp(path: &Path, bytes: &[u8]) -> PersistResult<Vec<GeonameRecord>> {
    match bytes.last() {
        Some(&FCP_TERMINATOR) => {}
        _ => {
            return Err(PersistError::Truncated {
                path: path.to_path_buf(),
            })
        }
    }
    let records = serde_json::from_slice(&bytes[..bytes.len() - 1])?;
    Ok(records)
}

/// Read and decode a persisted FCP file
pub async fn read_fcp(path: &Path) -> PersistResult<Vec<GeonameRecord>> {
    let bytes = tokio::fs::read(path).await?;
    decode_fcp(path, &bytes)
}

/// Atomically publish a curated record list
///
/// Writes to a temp sibling and renames into place so the file appears fully
/// written or not at all.
pub async fn write_fcp(path: &Path, records: &[GeonameRecord]) -> PersistResult<()> {
    let bytes = encode_fcp(records)?;
    let temp_path = temp_sibling(path);
    tokio::fs::write(&temp_path, &bytes).await?;
    tokio::fs::rename(&temp_path, path).await.map_err(|_| {
        let failure = PersistError::AtomicRename {
            temp_path: temp_path.clone(),
            final_path: path.to_path_buf(),
        };
        // Best effort; the sibling is transient either way
        let _ = std::fs::remove_file(&temp_path);
        failure
    })?;
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn non_empty(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}
