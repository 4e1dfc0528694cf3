//! Result types produced by the submitter and held by the state machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The opaque reference returned by the enhancement service on success.
///
/// The submitter does not check that a URL points at a usable image; that is
/// the presenter's problem. A new job replaces the result wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PredictionResult {
    /// A direct reference to the enhanced image (http(s) or `data:` URL).
    Url(String),
    /// A nested result object passed through verbatim.
    Structured(Value),
}

impl PredictionResult {
    /// Best-effort image reference: the URL itself, or the first URL-looking
    /// string found inside a structured payload.
    pub fn image_url(&self) -> Option<&str> {
        match self {
            PredictionResult::Url(url) => Some(url.as_str()),
            PredictionResult::Structured(value) => find_url(value),
        }
    }
}

fn find_url(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if looks_like_url(s) => Some(s.as_str()),
        Value::Array(items) => items.iter().find_map(find_url),
        Value::Object(map) => {
            // Prefer the conventional keys before scanning the rest.
            for key in ["output", "url", "image"] {
                if let Some(found) = map.get(key).and_then(find_url) {
                    return Some(found);
                }
            }
            map.values().find_map(find_url)
        }
        _ => None,
    }
}

pub(crate) fn looks_like_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("data:")
}

/// What one submit or status call yielded.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionReply {
    /// The job finished and produced a result.
    Ready(PredictionResult),
    /// The job was accepted but is still running on the remote side.
    Pending { id: String, status: String },
}

/// Diagnostic listing of jobs known to the status endpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobListing {
    /// Number of jobs reported (`count` field when present, otherwise the
    /// number of entries).
    pub count: usize,
    /// Raw job objects as returned by the service.
    pub entries: Vec<Value>,
}
