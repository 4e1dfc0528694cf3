//! Configuration for the enhancement pipeline.
//!
//! All pipeline behaviour is controlled through [`EnhanceConfig`], built via
//! its [`EnhanceConfigBuilder`]. One struct holds every knob so a session,
//! the CLI and the tests can share and log the exact same settings.

use crate::error::EnhanceError;
use crate::observer::SharedObserver;
use crate::pipeline::submit::Predictor;
use std::fmt;
use std::sync::Arc;

/// Form field the submission endpoint reads the image from.
pub const IMAGE_FIELD: &str = "image";

/// File name used by the download action when the caller gives none.
pub const DEFAULT_DOWNLOAD_FILE_NAME: &str = "imagem_replicada.jpg";

/// Configuration for an enhancement session.
///
/// Built via [`EnhanceConfig::builder()`] or using
/// [`EnhanceConfig::default()`].
///
/// # Example
/// ```rust
/// use imgenhance::EnhanceConfig;
///
/// let config = EnhanceConfig::builder()
///     .endpoint("https://example.com/api/predictions")
///     .max_bytes(256_000)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_dimension, 800);
/// ```
#[derive(Clone)]
pub struct EnhanceConfig {
    /// Submission endpoint (`POST`, multipart body with one `image` field).
    pub endpoint: String,

    /// Base URL for status lookups (`GET {base}/{id}`) and job listing
    /// (`GET {base}`). Defaults to `endpoint` when `None`.
    pub status_endpoint: Option<String>,

    /// Byte budget for the normalized image. Default: 512 000.
    pub max_bytes: usize,

    /// Cap on the long edge, in pixels. Default: 800.
    ///
    /// Images whose long edge is already at or below the cap keep their
    /// dimensions; the normalizer never upscales.
    pub max_dimension: u32,

    /// JPEG quality (1–100) for the re-encode. Default: 70.
    pub jpeg_quality: u8,

    /// Follow a pending reply by polling the status endpoint. Default: true.
    pub poll_pending: bool,

    /// Delay between status polls in milliseconds. Default: 1000.
    pub poll_interval_ms: u64,

    /// Stop polling after this many lookups. Default: no limit.
    pub max_polls: Option<u32>,

    /// Client-side timeout for submit/status calls. Default: none, the
    /// remote service's own timeout applies.
    pub request_timeout_secs: Option<u64>,

    /// Timeout for URL inputs and result downloads in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// File name for the download action. Default: `imagem_replicada.jpg`.
    pub download_file_name: String,

    /// Pre-constructed predictor. Takes precedence over `endpoint`; used by
    /// tests and by embedders that talk to the service some other way.
    pub predictor: Option<Arc<dyn Predictor>>,

    /// Receives every state transition. Default: none.
    pub observer: Option<SharedObserver>,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000/api/predictions".to_string(),
            status_endpoint: None,
            max_bytes: 512_000,
            max_dimension: 800,
            jpeg_quality: 70,
            poll_pending: true,
            poll_interval_ms: 1000,
            max_polls: None,
            request_timeout_secs: None,
            download_timeout_secs: 120,
            download_file_name: DEFAULT_DOWNLOAD_FILE_NAME.to_string(),
            predictor: None,
            observer: None,
        }
    }
}

impl fmt::Debug for EnhanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnhanceConfig")
            .field("endpoint", &self.endpoint)
            .field("status_endpoint", &self.status_endpoint)
            .field("max_bytes", &self.max_bytes)
            .field("max_dimension", &self.max_dimension)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("poll_pending", &self.poll_pending)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_polls", &self.max_polls)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("download_file_name", &self.download_file_name)
            .field("predictor", &self.predictor.as_ref().map(|_| "<dyn Predictor>"))
            .field("observer", &self.observer.as_ref().map(|_| "<dyn StateObserver>"))
            .finish()
    }
}

impl EnhanceConfig {
    /// Create a new builder for `EnhanceConfig`.
    pub fn builder() -> EnhanceConfigBuilder {
        EnhanceConfigBuilder {
            config: Self::default(),
        }
    }

    /// URL for a single job's status.
    pub fn status_url(&self, id: &str) -> String {
        format!("{}/{}", self.status_base().trim_end_matches('/'), id)
    }

    /// URL for the job listing.
    pub fn status_base(&self) -> &str {
        self.status_endpoint.as_deref().unwrap_or(&self.endpoint)
    }
}

/// Builder for [`EnhanceConfig`].
#[derive(Debug)]
pub struct EnhanceConfigBuilder {
    config: EnhanceConfig,
}

impl EnhanceConfigBuilder {
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn status_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.status_endpoint = Some(url.into());
        self
    }

    pub fn max_bytes(mut self, n: usize) -> Self {
        self.config.max_bytes = n.max(1);
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px.max(1);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn poll_pending(mut self, v: bool) -> Self {
        self.config.poll_pending = v;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn max_polls(mut self, n: u32) -> Self {
        self.config.max_polls = Some(n);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = Some(secs);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn download_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.download_file_name = name.into();
        self
    }

    pub fn predictor(mut self, predictor: Arc<dyn Predictor>) -> Self {
        self.config.predictor = Some(predictor);
        self
    }

    pub fn observer(mut self, observer: SharedObserver) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EnhanceConfig, EnhanceError> {
        let c = &self.config;
        validate_http_url("endpoint", &c.endpoint)?;
        if let Some(ref status) = c.status_endpoint {
            validate_http_url("status endpoint", status)?;
        }
        if c.download_file_name.trim().is_empty() {
            return Err(EnhanceError::InvalidConfig(
                "Download file name must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

fn validate_http_url(what: &str, url: &str) -> Result<(), EnhanceError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| EnhanceError::InvalidConfig(format!("{what} '{url}' is not a URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(EnhanceError::InvalidConfig(format!(
            "{what} must use http or https, got '{other}'"
        ))),
    }
}
