//! Streaming TSV parser and record filter
//!
//! Reads an extracted country file line by line, keeps the curated column
//! subset and partitions survivors into admin (class A) and populated
//! (class P) sequences, both preserving file order. Malformed rows are
//! dropped without failing the country: a single bad line in a forty
//! megabyte dump is not worth losing the rest over.
//!
//! Progress is reported as one-percent pulses derived from the pre-scanned
//! file size, at most one pulse per consumed line with the remainder carried
//! forward.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::app::models::GeonameRecord;
use crate::app::staging;
use crate::app::worker::{ImportProgress, WorkerEvent};
use crate::config::Settings;
use crate::constants::filter;
use crate::errors::{ParseError, ParseResult};

/// File-ordered output of one country parse
#[derive(Debug, Default)]
pub struct ParsedCountry {
    /// Class-A records feeding the hierarchy index
    pub admins: Vec<GeonameRecord>,
    /// Class-P records awaiting enrichment
    pub populated: Vec<GeonameRecord>,
}

/// Which curated sequence a kept record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordClass {
    Admin,
    Populated,
}

/// The keep/drop policy for curated records
///
/// Class A survives with an administrative or political feature code; class P
/// survives with a populated-place code and a population at or above the
/// configured minimum. Everything else is dropped.
pub fn keep_geoname_record(record: &GeonameRecord, min_population: u64) -> Option<RecordClass> {
    match record.feature_class {
        'A' if filter::ADMIN_CODES.contains(&record.feature_code.as_str()) => {
            Some(RecordClass::Admin)
        }
        'P' if record.population >= min_population
            && filter::POPULATED_CODES.contains(&record.feature_code.as_str()) =>
        {
            Some(RecordClass::Populated)
        }
        _ => None,
    }
}

/// Decode one dump line into a curated record
///
/// Retained columns (1-indexed, upstream numbering): 1 id, 2 name,
/// 5 latitude, 6 longitude, 7 feature class, 8 feature code, 9 country code,
/// 11..14 admin1..admin4, 15 population, 18 timezone. Empty fields decode to
/// absent; a row missing any required column is dropped.
pub fn parse_line(line: &str) -> Option<GeonameRecord> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 18 {
        return None;
    }

    let id = fields[0].parse::<u64>().ok()?;
    let name = required(fields[1])?;
    let latitude = fields[4].parse::<f64>().ok()?;
    let longitude = fields[5].parse::<f64>().ok()?;
    let feature_class = single_char(fields[6])?;
    let feature_code = required(fields[7])?;
    let country_code = required(fields[8])?;
    let population = fields[14].parse::<u64>().ok()?;
    let timezone = required(fields[17])?;

    Some(GeonameRecord {
        id,
        name,
        latitude,
        longitude,
        feature_class,
        feature_code,
        country_code,
        admin1: optional(fields[10]),
        admin2: optional(fields[11]),
        admin3: optional(fields[12]),
        admin4: optional(fields[13]),
        population,
        timezone,
        admin1_txt: None,
        admin2_txt: None,
        admin3_txt: None,
        admin4_txt: None,
    })
}

/// Parse and filter one extracted country file
///
/// Emits percent pulses into `events` while consuming the file and observes
/// the cancellation token between lines so shutdown does not have to wait
/// for a large country to finish.
pub async fn parse_country_file(
    settings: &Settings,
    cc: &str,
    events: &mpsc::Sender<WorkerEvent>,
    cancel: &CancellationToken,
) -> ParseResult<ParsedCountry> {
    let path = staging::text_path(&settings.target_dir, cc);
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|source| ParseError::Open {
            path: path.clone(),
            source,
        })?;
    let size = file.metadata().await?.len();
    let mut meter = PulseMeter::new(size, settings.progress_fraction);

    let mut parsed = ParsedCountry::default();
    let mut dropped: u64 = 0;
    let mut lines = BufReader::new(file).lines();

    while let Some(line) = lines.next_line().await? {
        if cancel.is_cancelled() {
            return Err(ParseError::Cancelled);
        }
        if let Some(percent) = meter.advance(line.len() as u64 + 1) {
            events
                .send(WorkerEvent::import_progress(
                    cc,
                    ImportProgress::Percent(percent),
                ))
                .await
                .ok();
        }
        if line.trim().is_empty() {
            continue;
        }
        let Some(record) = parse_line(&line) else {
            dropped += 1;
            continue;
        };
        if !record.country_code.eq_ignore_ascii_case(cc) {
            dropped += 1;
            continue;
        }
        match keep_geoname_record(&record, settings.min_population) {
            Some(RecordClass::Admin) => parsed.admins.push(record),
            Some(RecordClass::Populated) => parsed.populated.push(record),
            None => dropped += 1,
        }
    }

    debug!(
        "{cc}: kept {} admin / {} populated records, dropped {dropped}",
        parsed.admins.len(),
        parsed.populated.len()
    );
    Ok(parsed)
}

/// Percent-pulse bookkeeping over consumed bytes
///
/// One step is `floor(file_size * fraction)` bytes. At most one pulse is
/// emitted per advance call; bytes past the current step carry over, so a
/// burst of long lines raises later pulses instead of skipping them.
struct PulseMeter {
    step: u64,
    consumed: u64,
    emitted: u64,
}

impl PulseMeter {
    fn new(file_size: u64, fraction: f64) -> Self {
        let step = ((file_size as f64) * fraction).floor() as u64;
        Self {
            step: step.max(1),
            consumed: 0,
            emitted: 0,
        }
    }

    fn advance(&mut self, bytes: u64) -> Option<u8> {
        self.consumed += bytes;
        if self.emitted < self.consumed / self.step && self.emitted < 100 {
            self.emitted += 1;
            Some(self.emitted as u8)
        } else {
            None
        }
    }
}

fn required(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

fn optional(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

fn single_char(field: &str) -> Option<char> {
    let mut chars = field.chars();
    let first = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    Some(first)
}
