//! Job submission: send a normalized image to the enhancement endpoint and
//! interpret whatever comes back.
//!
//! The remote collaborator is a thin proxy in front of a hosted model. It
//! answers in one of several shapes depending on the model and on whether
//! the job finished inside the request:
//!
//! | Body | Meaning |
//! |------|---------|
//! | `"https://…/out.png"` | finished, direct reference |
//! | `["https://…"]` | finished, first element |
//! | `{"output": …}` | finished, `output` extracted recursively |
//! | `{"id": "…", "status": "starting"}` | accepted, still running |
//! | `{"error": "…"}` | failed remotely |
//! | `{}`, `null`, `""`, `[]`, `[null]`, empty body | nothing produced → failure |
//!
//! Exactly one request per call. Nothing is retried or deduplicated here; the
//! session decides what to do with the answer.

use crate::config::{EnhanceConfig, IMAGE_FIELD};
use crate::error::SubmitError;
use crate::output::{looks_like_url, JobListing, PredictionReply, PredictionResult};
use crate::pipeline::normalize::NormalizedImage;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Remote statuses that mean the job has not finished yet.
const PENDING_STATUSES: &[&str] = &["starting", "processing", "queued", "pending", "running"];

/// A normalized image wrapped for transport under the fixed field name.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub field: &'static str,
    pub image: NormalizedImage,
}

impl SubmissionRequest {
    pub fn new(image: NormalizedImage) -> Self {
        Self {
            field: IMAGE_FIELD,
            image,
        }
    }
}

/// The remote enhancement service.
///
/// [`HttpPredictor`] is the production implementation; tests and embedders
/// can supply their own to script outcomes and timing.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Submit one image. Exactly one outbound call.
    async fn submit(&self, request: SubmissionRequest) -> Result<PredictionReply, SubmitError>;

    /// Look up a previously accepted job.
    async fn status(&self, id: &str) -> Result<PredictionReply, SubmitError>;

    /// List jobs known to the service (diagnostics only).
    async fn list(&self) -> Result<JobListing, SubmitError>;
}

/// [`Predictor`] over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpPredictor {
    client: reqwest::Client,
    endpoint: String,
    config: EnhanceConfig,
}

impl HttpPredictor {
    pub fn new(config: &EnhanceConfig) -> Result<Self, SubmitError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(|e| SubmitError::Transport {
            reason: e.to_string(),
        })?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            config: config.clone(),
        })
    }

    async fn read_reply(&self, response: reqwest::Response) -> Result<Value, SubmitError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            let message = error_message(&body)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| "request failed".to_string());
            warn!("Enhancement service returned HTTP {}: {}", status.as_u16(), message);
            return Err(SubmitError::Status {
                status: status.as_u16(),
                message,
            });
        }

        if body.trim().is_empty() {
            return Err(SubmitError::EmptyResult);
        }

        serde_json::from_str(&body).map_err(|e| SubmitError::InvalidResponse {
            detail: e.to_string(),
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> SubmitError {
        match (e.is_timeout(), self.config.request_timeout_secs) {
            (true, Some(secs)) => SubmitError::Timeout { secs },
            _ => SubmitError::Transport {
                reason: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn submit(&self, request: SubmissionRequest) -> Result<PredictionReply, SubmitError> {
        let image = request.image;
        info!(
            "Submitting {} bytes ({}) to {}",
            image.byte_size(),
            image.media_type(),
            self.endpoint
        );

        let part = Part::bytes(image.bytes().to_vec())
            .file_name(image.file_name())
            .mime_str(image.media_type())
            .map_err(|e| SubmitError::Transport {
                reason: format!("invalid media type '{}': {e}", image.media_type()),
            })?;
        let form = Form::new().part(request.field, part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let body = self.read_reply(response).await?;
        parse_reply(body)
    }

    async fn status(&self, id: &str) -> Result<PredictionReply, SubmitError> {
        let url = self.config.status_url(id);
        debug!("Polling prediction status: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let body = self.read_reply(response).await?;
        parse_reply(body)
    }

    async fn list(&self) -> Result<JobListing, SubmitError> {
        let response = self
            .client
            .get(self.config.status_base())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let body = self.read_reply(response).await?;
        Ok(parse_listing(body))
    }
}

/// Interpret a 2xx JSON body.
///
/// A remote `status` decides first: pending and failed jobs never yield a
/// result, even when they already carry partial `output`.
pub fn parse_reply(body: Value) -> Result<PredictionReply, SubmitError> {
    if let Value::Object(ref map) = body {
        if let Some(message) = map.get("error").and_then(non_empty_message) {
            return Err(SubmitError::Remote { message });
        }

        let status = map.get("status").and_then(Value::as_str).unwrap_or("");

        if PENDING_STATUSES.contains(&status) {
            let id = map.get("id").and_then(Value::as_str).unwrap_or("");
            if id.is_empty() {
                return Err(SubmitError::InvalidResponse {
                    detail: format!("pending prediction ('{status}') without an id"),
                });
            }
            return Ok(PredictionReply::Pending {
                id: id.to_string(),
                status: status.to_string(),
            });
        }

        if matches!(status, "failed" | "canceled" | "cancelled") {
            return Err(SubmitError::Remote {
                message: format!("prediction {status}"),
            });
        }

        if let Some(output) = map.get("output") {
            return extract_result(output).map(PredictionReply::Ready);
        }

        if status == "succeeded" {
            return Err(SubmitError::EmptyResult);
        }
    }

    extract_result(&body).map(PredictionReply::Ready)
}

/// Pull a result out of a value, treating absence of data as failure.
fn extract_result(value: &Value) -> Result<PredictionResult, SubmitError> {
    match value {
        Value::Null => Err(SubmitError::EmptyResult),
        Value::String(s) if s.trim().is_empty() => Err(SubmitError::EmptyResult),
        Value::String(s) => Ok(PredictionResult::Url(s.clone())),
        Value::Array(items) if items.iter().all(is_blank) => Err(SubmitError::EmptyResult),
        Value::Array(items) => {
            // Multi-output models list one URL per image; the first is the
            // enhanced frame.
            let first_url = items
                .iter()
                .filter_map(Value::as_str)
                .find(|s| looks_like_url(s));
            Ok(match first_url {
                Some(url) => PredictionResult::Url(url.to_string()),
                None => PredictionResult::Structured(value.clone()),
            })
        }
        Value::Object(map) if map.is_empty() => Err(SubmitError::EmptyResult),
        other => Ok(PredictionResult::Structured(other.clone())),
    }
}

/// Null, or a string with nothing in it.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Interpret a listing body: a bare array, or an object with `results` /
/// `predictions` and an optional `count`.
pub fn parse_listing(body: Value) -> JobListing {
    match body {
        Value::Array(entries) => JobListing {
            count: entries.len(),
            entries,
        },
        Value::Object(mut map) => {
            let entries = ["results", "predictions"]
                .iter()
                .find_map(|k| match map.remove(*k) {
                    Some(Value::Array(items)) => Some(items),
                    _ => None,
                })
                .unwrap_or_default();
            let count = map
                .get("count")
                .and_then(Value::as_u64)
                .map(|c| c as usize)
                .unwrap_or(entries.len());
            JobListing { count, entries }
        }
        Value::Number(n) => JobListing {
            count: n.as_u64().unwrap_or(0) as usize,
            entries: Vec::new(),
        },
        _ => JobListing {
            count: 0,
            entries: Vec::new(),
        },
    }
}

/// Best human-readable message from an error body.
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => ["error", "detail", "message"]
            .iter()
            .find_map(|k| map.get(*k).and_then(non_empty_message)),
        Ok(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Ok(_) => None,
        Err(_) => Some(truncate(trimmed, 200)),
    }
}

fn non_empty_message(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("detail"))
            .and_then(non_empty_message),
        _ => None,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{cut}\u{2026}")
    }
}
