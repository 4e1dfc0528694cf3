//! Input capture: turn a user-supplied path, URL or byte buffer into a
//! [`SourceImage`].
//!
//! There is no MIME allow-list here. Anything that looks like a file is
//! accepted; the normalizer's decode step is the real validation gate, and
//! when it fails the raw bytes are still submitted as-is.

use crate::error::EnhanceError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use std::path::Path;
use tracing::{debug, info};

/// Media type reported when the bytes match no known image signature.
pub const UNKNOWN_MEDIA_TYPE: &str = "application/octet-stream";

/// Raw bytes plus declared media type, exactly as selected by the user.
///
/// Immutable once captured. Cloning is cheap (`Bytes` is reference counted),
/// which lets the session keep the source for the comparison view while the
/// job consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    bytes: Bytes,
    media_type: String,
    name: Option<String>,
}

impl SourceImage {
    /// Wrap bytes with an explicit media type.
    pub fn new(bytes: impl Into<Bytes>, media_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            media_type: media_type.into(),
            name: None,
        }
    }

    /// Wrap bytes, sniffing the media type from their signature.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let media_type = sniff_media_type(&bytes).unwrap_or(UNKNOWN_MEDIA_TYPE);
        Self::new(bytes, media_type)
    }

    /// Attach the original file name (used for the multipart part).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `data:` URI for embedding the original in a comparison view.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, STANDARD.encode(&self.bytes))
    }
}

/// Guess an image media type from the leading bytes.
pub fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes).ok().map(|f| f.to_mime_type())
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a [`SourceImage`].
///
/// URLs are downloaded into memory; anything else is read from disk.
pub async fn resolve_source(input: &str, timeout_secs: u64) -> Result<SourceImage, EnhanceError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

/// Read a local image file.
pub async fn read_local(path: &Path) -> Result<SourceImage, EnhanceError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => EnhanceError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => EnhanceError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => EnhanceError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let media_type = sniff_media_type(&bytes)
        .or_else(|| image::ImageFormat::from_path(path).ok().map(|f| f.to_mime_type()))
        .unwrap_or(UNKNOWN_MEDIA_TYPE);

    debug!(
        "Read local image {} ({} bytes, {})",
        path.display(),
        bytes.len(),
        media_type
    );

    let mut source = SourceImage::new(bytes, media_type);
    if let Some(name) = file_name(path) {
        source = source.with_name(name);
    }
    Ok(source)
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<SourceImage, EnhanceError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| EnhanceError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            EnhanceError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            EnhanceError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(EnhanceError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let header_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

    let bytes = response
        .bytes()
        .await
        .map_err(|e| EnhanceError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    // The signature is more trustworthy than a CDN's Content-Type.
    let media_type = sniff_media_type(&bytes)
        .map(str::to_string)
        .or(header_type)
        .unwrap_or_else(|| UNKNOWN_MEDIA_TYPE.to_string());

    info!("Downloaded {} bytes ({})", bytes.len(), media_type);

    let mut source = SourceImage::new(bytes, media_type);
    if let Some(name) = url_file_name(url) {
        source = source.with_name(name);
    }
    Ok(source)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Last path segment of a URL when it looks like a file name.
fn url_file_name(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if !last.is_empty() && last.contains('.') {
        Some(last.to_string())
    } else {
        None
    }
}
