//! Conditional HTTP fetcher for GeoNames dump files
//!
//! Issues a single conditional GET per call, streams the response body to a
//! temporary file on disk (country archives are tens of megabytes, never
//! buffered in memory) and classifies the outcome. Retrying is the fetch
//! coordinator's job; the fetcher itself classifies and returns.
//!
//! The [`Fetch`] trait is the seam between the pipeline and the network, so
//! retry and staleness behavior can be exercised against a stub transport.

use std::future::Future;
use std::path::PathBuf;

use futures::StreamExt;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use crate::config::Settings;
use crate::constants::http;
use crate::errors::ClientError;

/// One remote file, addressed by basename and extension
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchTarget {
    pub filename: String,
    pub extension: String,
}

impl FetchTarget {
    pub fn new(filename: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            extension: extension.into(),
        }
    }

    /// Remote file name, e.g. `LI.zip`
    pub fn remote_name(&self) -> String {
        format!("{}{}", self.filename, self.extension)
    }
}

impl std::fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.filename, self.extension)
    }
}

/// Transport failure classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    ConnectionRefused,
    Other(String),
}

/// Classified result of one conditional GET
#[derive(Debug)]
pub enum FetchOutcome {
    /// HTTP 200; the body was streamed to `temp_path`. `etag` is absent when
    /// the server omits the header.
    Fresh {
        target: FetchTarget,
        etag: Option<String>,
        temp_path: PathBuf,
    },
    /// HTTP 304; the cached copy is still current
    Unchanged { target: FetchTarget },
    /// Any other HTTP status
    HttpError {
        target: FetchTarget,
        status: u16,
        description: String,
    },
    /// The request never produced an HTTP status
    TransportError {
        target: FetchTarget,
        kind: TransportKind,
    },
}

impl FetchOutcome {
    /// Terminal success: either a fresh body or a 304
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Fresh { .. } | Self::Unchanged { .. })
    }

    /// The target this outcome belongs to
    pub fn target(&self) -> &FetchTarget {
        match self {
            Self::Fresh { target, .. }
            | Self::Unchanged { target }
            | Self::HttpError { target, .. }
            | Self::TransportError { target, .. } => target,
        }
    }
}

/// Seam between the pipeline and the network
pub trait Fetch: Send + Sync + 'static {
    /// Issue one conditional GET for `<base_url>/<filename><extension>`
    ///
    /// `prior_etag`, when present, is sent as `If-None-Match`.
    fn fetch(
        &self,
        filename: &str,
        extension: &str,
        prior_etag: Option<&str>,
    ) -> impl Future<Output = FetchOutcome> + Send;
}

/// HTTP client for the GeoNames dump server
#[derive(Debug, Clone)]
pub struct GeonamesClient {
    http: reqwest::Client,
    base_url: Url,
}

impl GeonamesClient {
    /// Build a client from the shared settings
    ///
    /// Applies the configured proxy, timeouts and user agent once; the same
    /// client instance is shared by every country worker. The base URL is
    /// normalized to end in a slash: `Url::join` would otherwise replace the
    /// last path segment instead of appending the file name.
    pub fn new(settings: &Settings) -> Result<Self, ClientError> {
        let mut base = settings.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|source| ClientError::BaseUrl {
            url: settings.base_url.clone(),
            source,
        })?;

        let mut builder = reqwest::Client::builder()
            .user_agent(http::USER_AGENT)
            .timeout(http::DEFAULT_TIMEOUT)
            .connect_timeout(http::CONNECT_TIMEOUT)
            .pool_idle_timeout(http::POOL_IDLE_TIMEOUT);

        if let Some(proxy) = &settings.proxy {
            let proxy_url = format!("http://{}:{}", proxy.host, proxy.port);
            builder = builder.proxy(reqwest::Proxy::all(&proxy_url)?);
        }

        Ok(Self {
            http: builder.build()?,
            base_url,
        })
    }

    async fn attempt(
        &self,
        target: &FetchTarget,
        prior_etag: Option<&str>,
    ) -> Result<FetchOutcome, AttemptError> {
        let url = self
            .base_url
            .join(&target.remote_name())
            .map_err(|e| AttemptError::Io(std::io::Error::other(e)))?;

        let mut request = self.http.get(url);
        if let Some(etag) = prior_etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => {
                // Header lookup is case-insensitive; the value is kept
                // byte-exact for the next If-None-Match round trip.
                let etag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let temp_path = self.stream_to_temp(response, target).await?;
                debug!("Fetched {} to {}", target, temp_path.display());
                Ok(FetchOutcome::Fresh {
                    target: target.clone(),
                    etag,
                    temp_path,
                })
            }
            StatusCode::NOT_MODIFIED => Ok(FetchOutcome::Unchanged {
                target: target.clone(),
            }),
            status => Ok(FetchOutcome::HttpError {
                target: target.clone(),
                status: status.as_u16(),
                description: status
                    .canonical_reason()
                    .unwrap_or("unrecognized status")
                    .to_string(),
            }),
        }
    }

    /// Stream the response body to a freshly created temp file
    async fn stream_to_temp(
        &self,
        response: reqwest::Response,
        target: &FetchTarget,
    ) -> Result<PathBuf, AttemptError> {
        let temp = tempfile::Builder::new()
            .prefix(&format!("{}-", target.filename))
            .suffix(".part")
            .tempfile()
            .map_err(AttemptError::Io)?;
        let path = temp
            .into_temp_path()
            .keep()
            .map_err(|e| AttemptError::Io(e.error))?;

        let result = async {
            let mut file = tokio::fs::File::create(&path).await?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(AttemptError::Http)?;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => Ok(path),
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                Err(e)
            }
        }
    }
}

impl Fetch for GeonamesClient {
    async fn fetch(
        &self,
        filename: &str,
        extension: &str,
        prior_etag: Option<&str>,
    ) -> FetchOutcome {
        let target = FetchTarget::new(filename, extension);
        match self.attempt(&target, prior_etag).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let kind = e.classify();
                warn!("Transport failure fetching {}: {:?}", target, kind);
                FetchOutcome::TransportError { target, kind }
            }
        }
    }
}

/// Internal failure of one fetch attempt, before classification
enum AttemptError {
    Http(reqwest::Error),
    Io(std::io::Error),
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

impl From<std::io::Error> for AttemptError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl AttemptError {
    fn classify(&self) -> TransportKind {
        match self {
            Self::Http(e) if e.is_timeout() => TransportKind::Timeout,
            Self::Http(e) if e.is_connect() => TransportKind::ConnectionRefused,
            Self::Http(e) => TransportKind::Other(e.to_string()),
            Self::Io(e) => TransportKind::Other(format!("temp file I/O: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn target_names_remote_file() {
        let target = FetchTarget::new("LI", ".zip");
        assert_eq!(target.remote_name(), "LI.zip");
        assert_eq!(target.to_string(), "LI.zip");
    }

    #[test]
    fn outcome_success_classification() {
        let target = FetchTarget::new("LI", ".zip");
        assert!(FetchOutcome::Unchanged {
            target: target.clone()
        }
        .is_success());
        assert!(!FetchOutcome::HttpError {
            target: target.clone(),
            status: 500,
            description: "Internal Server Error".to_string(),
        }
        .is_success());
        assert!(!FetchOutcome::TransportError {
            target,
            kind: TransportKind::Timeout,
        }
        .is_success());
    }

    #[test]
    fn client_rejects_malformed_base_url() {
        let settings = Settings {
            base_url: "not a url".to_string(),
            ..Settings::default()
        };
        assert!(GeonamesClient::new(&settings).is_err());
    }

    #[test]
    fn base_url_without_trailing_slash_is_normalized() {
        let settings = Settings {
            base_url: "http://localhost:9999/dump".to_string(),
            ..Settings::default()
        };
        let client = GeonamesClient::new(&settings).unwrap();
        assert_eq!(client.base_url.as_str(), "http://localhost:9999/dump/");
        assert_eq!(
            client.base_url.join("LI.zip").unwrap().as_str(),
            "http://localhost:9999/dump/LI.zip"
        );
    }

    #[test]
    fn client_builds_with_proxy() {
        let settings = Settings {
            proxy: Some(crate::config::ProxySettings {
                host: "proxy.internal".to_string(),
                port: 3128,
            }),
            ..Settings::default()
        };
        GeonamesClient::new(&settings).unwrap();
    }
}
