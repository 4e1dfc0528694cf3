//! Pipeline stages for one enhancement job.
//!
//! Each submodule implements exactly one step, so each can be tested alone
//! and the network side can be swapped through the [`submit::Predictor`]
//! trait.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ submit ──▶ (status polls)
//! (path/URL)  (resize+JPEG)  (multipart POST)
//! ```
//!
//! 1. [`input`]     capture the user's file or URL as a [`input::SourceImage`]
//! 2. [`normalize`] fit the image to the pixel and byte budgets; CPU-bound,
//!    runs in `spawn_blocking`, falls back to the original bytes on failure
//! 3. [`submit`]    post the image under the `image` field and classify the
//!    reply; the only stage with network I/O

pub mod input;
pub mod normalize;
pub mod submit;
