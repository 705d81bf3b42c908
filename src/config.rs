//! Runtime configuration for the GeoNames fetcher
//!
//! Configuration is assembled once at startup from defaults, an optional TOML
//! file and CLI overrides, then passed explicitly into every component as an
//! immutable value. Nothing in the pipeline reads ambient global state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::limits;
use crate::errors::ConfigError;

/// Which countries to ingest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountrySelection {
    /// Every country listed in the master index
    All,
    /// Only the given ISO2 codes (stored uppercase)
    Only(Vec<String>),
}

impl CountrySelection {
    /// Build a selection from a possibly empty allow-list
    pub fn from_codes(codes: &[String]) -> Self {
        if codes.is_empty() {
            Self::All
        } else {
            Self::Only(codes.iter().map(|c| c.to_ascii_uppercase()).collect())
        }
    }

    /// Whether the given country code is selected
    pub fn contains(&self, code: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(codes) => codes.iter().any(|c| c.eq_ignore_ascii_case(code)),
        }
    }
}

/// Optional upstream HTTP proxy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
}

/// Startup-time settings shared by every component
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory of the per-country file sets
    pub target_dir: PathBuf,
    /// GeoNames dump base URL
    pub base_url: String,
    /// Optional HTTP proxy applied to every request
    pub proxy: Option<ProxySettings>,
    /// Age after which an etag no longer counts as fresh
    pub stale_after: Duration,
    /// Delay between fetch retry rounds
    pub retry_wait: Duration,
    /// Fetch attempts per target before giving up
    pub retry_limit: u32,
    /// Fraction of the country file consumed per progress pulse
    pub progress_fraction: f64,
    /// Minimum population for a curated populated place
    pub min_population: u64,
    /// Concurrent country import pipelines
    pub max_concurrent_imports: usize,
    /// Bound on waiting for worker shutdown acknowledgments
    pub shutdown_timeout: Duration,
    /// Raise the default log filter to trace level
    pub trace: bool,
    /// Countries to ingest
    pub countries: CountrySelection,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_dir: default_target_dir(),
            base_url: crate::constants::geonames::BASE_URL.to_string(),
            proxy: None,
            stale_after: limits::STALE_AFTER,
            retry_wait: limits::RETRY_WAIT,
            retry_limit: limits::RETRY_LIMIT,
            progress_fraction: limits::PROGRESS_FRACTION,
            min_population: limits::MIN_POPULATION,
            max_concurrent_imports: limits::MAX_CONCURRENT_IMPORTS,
            shutdown_timeout: limits::SHUTDOWN_TIMEOUT,
            trace: false,
            countries: CountrySelection::All,
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file on top of the defaults
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            let raw = std::fs::read_to_string(path)?;
            let file: SettingsFile = toml::from_str(&raw)?;
            settings.apply_file(file);
            debug!("Loaded configuration overlay from {}", path.display());
        }
        settings.validate()?;
        Ok(settings)
    }

    fn apply_file(&mut self, file: SettingsFile) {
        if let Some(dir) = file.target_dir {
            self.target_dir = dir;
        }
        if let Some(url) = file.base_url {
            self.base_url = url;
        }
        if let Some(proxy) = file.proxy {
            self.proxy = Some(proxy);
        }
        if let Some(secs) = file.stale_after_secs {
            self.stale_after = Duration::from_secs(secs);
        }
        if let Some(ms) = file.retry_wait_ms {
            self.retry_wait = Duration::from_millis(ms);
        }
        if let Some(limit) = file.retry_limit {
            self.retry_limit = limit;
        }
        if let Some(fraction) = file.progress_fraction {
            self.progress_fraction = fraction;
        }
        if let Some(population) = file.min_population {
            self.min_population = population;
        }
        if let Some(imports) = file.max_concurrent_imports {
            self.max_concurrent_imports = imports;
        }
        if let Some(trace) = file.trace {
            self.trace = trace;
        }
        if let Some(codes) = file.countries {
            self.countries = CountrySelection::from_codes(&codes);
        }
    }

    /// Render this configuration as a TOML starter file
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let file = SettingsFile {
            target_dir: Some(self.target_dir.clone()),
            base_url: Some(self.base_url.clone()),
            proxy: self.proxy.clone(),
            stale_after_secs: Some(self.stale_after.as_secs()),
            retry_wait_ms: Some(self.retry_wait.as_millis() as u64),
            retry_limit: Some(self.retry_limit),
            progress_fraction: Some(self.progress_fraction),
            min_population: Some(self.min_population),
            max_concurrent_imports: Some(self.max_concurrent_imports),
            trace: Some(self.trace),
            countries: match &self.countries {
                CountrySelection::All => None,
                CountrySelection::Only(codes) => Some(codes.clone()),
            },
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry_limit".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.progress_fraction > 0.0 && self.progress_fraction <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "progress_fraction".to_string(),
                reason: "must be within (0, 1]".to_string(),
            });
        }
        if self.max_concurrent_imports == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_imports".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// TOML shape of the configuration file; every field optional
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    target_dir: Option<PathBuf>,
    base_url: Option<String>,
    proxy: Option<ProxySettings>,
    stale_after_secs: Option<u64>,
    retry_wait_ms: Option<u64>,
    retry_limit: Option<u32>,
    progress_fraction: Option<f64>,
    min_population: Option<u64>,
    max_concurrent_imports: Option<usize>,
    trace: Option<bool>,
    countries: Option<Vec<String>>,
}

/// Default target directory under the platform data dir
fn default_target_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("geonames-fetcher")
        .join("countries")
}

/// Default configuration file location under the platform config dir
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("geonames-fetcher")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.retry_limit, 3);
        assert_eq!(settings.min_population, 500);
        assert_eq!(settings.stale_after, Duration::from_secs(86_400));
        assert_eq!(settings.countries, CountrySelection::All);
    }

    #[test]
    fn toml_overlay_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            base_url = "http://localhost:9999/dump/"
            retry_limit = 5
            min_population = 1000
            countries = ["li", "GB"]

            [proxy]
            host = "proxy.internal"
            port = 3128
            "#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.base_url, "http://localhost:9999/dump/");
        assert_eq!(settings.retry_limit, 5);
        assert_eq!(settings.min_population, 1000);
        assert_eq!(
            settings.countries,
            CountrySelection::Only(vec!["LI".to_string(), "GB".to_string()])
        );
        let proxy = settings.proxy.unwrap();
        assert_eq!(proxy.host, "proxy.internal");
        assert_eq!(proxy.port, 3128);
    }

    #[test]
    fn rendered_settings_load_back_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let original = Settings {
            base_url: "http://localhost:9999/dump/".to_string(),
            min_population: 750,
            countries: CountrySelection::Only(vec!["LI".to_string()]),
            ..Settings::default()
        };
        std::fs::write(&path, original.to_toml().unwrap()).unwrap();

        let loaded = Settings::load(Some(&path)).unwrap();
        assert_eq!(loaded.base_url, original.base_url);
        assert_eq!(loaded.min_population, original.min_population);
        assert_eq!(loaded.countries, original.countries);
        assert_eq!(loaded.stale_after, original.stale_after);
        assert_eq!(loaded.retry_limit, original.retry_limit);
    }

    #[test]
    fn zero_retry_limit_is_rejected() {
        let settings = Settings {
            retry_limit: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn selection_matching_is_case_insensitive() {
        let selection = CountrySelection::from_codes(&["li".to_string()]);
        assert!(selection.contains("LI"));
        assert!(selection.contains("li"));
        assert!(!selection.contains("GB"));
        assert!(CountrySelection::All.contains("GB"));
    }
}
