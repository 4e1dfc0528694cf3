//! Observer trait for state-machine events.
//!
//! Inject an [`Arc<dyn StateObserver>`] via
//! [`crate::config::EnhanceConfigBuilder::observer`] to receive every
//! transition as it is applied. Callers forward events wherever they like: a
//! terminal spinner, a log line, a channel to a GUI thread. For a pull-based
//! view use [`crate::session::EnhanceSession::subscribe`] or
//! [`crate::stream::state_stream`] instead.
//!
//! # Example
//!
//! ```rust
//! use imgenhance::{EnhanceConfig, JobId, StateObserver, UiState};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     transitions: AtomicUsize,
//! }
//!
//! impl StateObserver for CountingObserver {
//!     fn on_transition(&self, _job: JobId, _from: &UiState, to: &UiState) {
//!         self.transitions.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("now {}", to.phase());
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver { transitions: AtomicUsize::new(0) });
//!
//! let config = EnhanceConfig::builder()
//!     .observer(observer as Arc<dyn StateObserver>)
//!     .build()
//!     .unwrap();
//! assert!(config.observer.is_some());
//! ```

use crate::state::{JobId, UiState};
use std::sync::Arc;

/// Called by the session as the state machine changes.
///
/// Implementations must be `Send + Sync`: jobs run on the tokio runtime and
/// may report from any worker thread. Callbacks run while the session lock
/// is held, so keep them short and never call back into the session. All
/// methods default to no-ops.
pub trait StateObserver: Send + Sync {
    /// A state change was applied for `job`.
    fn on_transition(&self, job: JobId, from: &UiState, to: &UiState) {
        let _ = (job, from, to);
    }

    /// A superseded job reported and was discarded.
    fn on_stale(&self, job: JobId, current: JobId) {
        let _ = (job, current);
    }
}

/// A no-op observer, the default when none is configured.
pub struct NoopObserver;

impl StateObserver for NoopObserver {}

/// Convenience alias for the type stored in the session.
pub type SharedObserver = Arc<dyn StateObserver>;
