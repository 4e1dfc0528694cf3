//! # imgenhance
//!
//! Submit an image to a remote super-resolution service and track the job
//! through a single-flight state machine.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file / URL
//!  │
//!  ├─ 1. Input      capture bytes + media type, no allow-list
//!  ├─ 2. Normalize  long edge ≤ 800 px, JPEG q70, ≤ 512 000 bytes
//!  │                (CPU-bound, spawn_blocking; falls back to the original)
//!  ├─ 3. Submit     multipart POST, one `image` field
//!  ├─ 4. Poll       follow a pending job on the status endpoint
//!  └─ 5. Present    Ready(result) | Failed(error); download or compare
//! ```
//!
//! One [`EnhanceSession`] holds one [`UiState`]. Selecting a new file
//! supersedes whatever job is in flight: the old job's reports are tagged
//! with a retired [`JobId`] and discarded, so a slow old response can never
//! overwrite a newer one.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imgenhance::{resolve_source, EnhanceConfig, EnhanceSession, UiState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EnhanceConfig::builder()
//!         .endpoint("http://localhost:3000/api/predictions")
//!         .build()?;
//!     let session = EnhanceSession::new(config)?;
//!
//!     let source = resolve_source("photo.png", 120).await?;
//!     let snapshot = session.enhance(source).await;
//!     match snapshot.state {
//!         UiState::Ready(result) => println!("{}", result.image_url().unwrap_or("<structured>")),
//!         UiState::Failed(err) => eprintln!("failed: {err}"),
//!         other => eprintln!("superseded while {}", other.phase()),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `imgenhance` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! imgenhance = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod observer;
pub mod output;
pub mod pipeline;
pub mod present;
pub mod session;
pub mod state;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EnhanceConfig, EnhanceConfigBuilder, DEFAULT_DOWNLOAD_FILE_NAME, IMAGE_FIELD};
pub use error::{EnhanceError, ErrorInfo, NormalizeError, SubmitError};
pub use observer::{NoopObserver, SharedObserver, StateObserver};
pub use output::{JobListing, PredictionReply, PredictionResult};
pub use pipeline::input::{resolve_source, SourceImage};
pub use pipeline::normalize::{normalize, NormalizeOptions, NormalizedImage};
pub use pipeline::submit::{HttpPredictor, Predictor, SubmissionRequest};
pub use present::{comparison_html, download_result, save_comparison};
pub use session::{EnhanceSession, JobHandle};
pub use state::{Event, JobId, Phase, Snapshot, StateMachine, UiState};
pub use stream::{job_stream, state_stream, StateStream};
