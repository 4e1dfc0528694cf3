//! Presenter actions on a ready result: download it, or render a
//! before/after comparison.
//!
//! Both work from the opaque [`PredictionResult`]; the result is never
//! checked to be a usable image until one of these actions needs its bytes.

use crate::config::EnhanceConfig;
use crate::error::EnhanceError;
use crate::output::PredictionResult;
use crate::pipeline::input::SourceImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Save the result image to disk and return the written path.
///
/// `dest` may be a file path, an existing directory (the configured
/// download file name is appended), or `None` for the configured name in the
/// current directory. Both `http(s)` and `data:` references are supported.
/// The write is atomic: bytes go to a temporary sibling that is renamed into
/// place.
///
/// # Example
/// ```rust
/// # tokio_test::block_on(async {
/// use imgenhance::{download_result, EnhanceConfig, PredictionResult};
///
/// let dir = tempfile::tempdir().unwrap();
/// let result = PredictionResult::Url("data:text/plain,hello".into());
/// let path = download_result(&result, Some(dir.path()), &EnhanceConfig::default())
///     .await
///     .unwrap();
/// assert_eq!(std::fs::read(&path).unwrap(), b"hello");
/// # });
/// ```
pub async fn download_result(
    result: &PredictionResult,
    dest: Option<&Path>,
    config: &EnhanceConfig,
) -> Result<PathBuf, EnhanceError> {
    let url = result
        .image_url()
        .ok_or_else(|| EnhanceError::NoDownloadableResult {
            reason: "result carries no image reference".into(),
        })?;

    let path = match dest {
        Some(p) if p.is_dir() => p.join(&config.download_file_name),
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(&config.download_file_name),
    };

    let bytes = fetch_result_bytes(url, config.download_timeout_secs).await?;
    write_atomic(&path, &bytes).await?;
    info!("Saved result to {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

/// Fetch the bytes behind a result reference.
pub async fn fetch_result_bytes(url: &str, timeout_secs: u64) -> Result<Bytes, EnhanceError> {
    if url.starts_with("data:") {
        return decode_data_uri(url).map(Bytes::from);
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(EnhanceError::NoDownloadableResult {
            reason: format!("unsupported reference '{}'", truncate(url, 64)),
        });
    }

    debug!("Fetching result from {}", url);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| EnhanceError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_err = |e: reqwest::Error| {
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
    };

    let response = client.get(url).send().await.map_err(map_err)?;
    if !response.status().is_success() {
        return Err(EnhanceError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }
    response.bytes().await.map_err(map_err)
}

/// Decode a base64 `data:` URI. Non-base64 payloads are taken literally.
fn decode_data_uri(uri: &str) -> Result<Vec<u8>, EnhanceError> {
    let invalid = |reason: &str| EnhanceError::NoDownloadableResult {
        reason: format!("malformed data URI: {reason}"),
    };

    let rest = uri.strip_prefix("data:").ok_or_else(|| invalid("missing scheme"))?;
    let (meta, payload) = rest.split_once(',').ok_or_else(|| invalid("missing ','"))?;
    if meta.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
        STANDARD
            .decode(payload.trim())
            .map_err(|e| invalid(&e.to_string()))
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}

/// Write `bytes` to `path` via a temporary sibling and rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), EnhanceError> {
    let write_err = |e: std::io::Error| EnhanceError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)
}

/// Self-contained HTML page showing the original next to the result.
///
/// The original is embedded as a `data:` URI so the page works offline; the
/// result is referenced as-is.
pub fn comparison_html(source: &SourceImage, result: &PredictionResult) -> Result<String, EnhanceError> {
    let after = result
        .image_url()
        .ok_or_else(|| EnhanceError::NoDownloadableResult {
            reason: "result carries no image reference".into(),
        })?;
    let before = source.to_data_uri();
    let title = source.name().unwrap_or("image");

    Ok(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}: before / after</title>
<style>
body {{ font-family: sans-serif; margin: 2rem; background: #111; color: #eee; }}
.pair {{ display: flex; gap: 1rem; }}
figure {{ flex: 1; margin: 0; }}
img {{ width: 100%; height: auto; }}
</style>
</head>
<body>
<div class="pair">
<figure><img src="{before}" alt="Before"><figcaption>Before</figcaption></figure>
<figure><img src="{after}" alt="After"><figcaption>After</figcaption></figure>
</div>
</body>
</html>
"#,
        title = escape_html(title),
        before = escape_html(&before),
        after = escape_html(after),
    ))
}

/// Render [`comparison_html`] and write it atomically to `path`.
pub async fn save_comparison(
    source: &SourceImage,
    result: &PredictionResult,
    path: &Path,
) -> Result<(), EnhanceError> {
    let html = comparison_html(source, result)?;
    write_atomic(path, html.as_bytes()).await?;
    info!("Wrote comparison view to {}", path.display());
    Ok(())
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
