//! The upload/result state machine.
//!
//! One explicit tagged state replaces the loose `loading` / `error` /
//! `result` flags a UI would otherwise juggle, so combinations like "loading
//! and ready at once" cannot be represented.
//!
//! ## Transitions
//!
//! ```text
//!            select_file                Normalized
//!   Idle ───────────────▶ Normalizing ─────────────▶ Submitting
//!    ▲                         ▲                      │   │
//!    │ close_modal             │ select_file          │   │ AwaitingResult
//!    │                         │                      │   ▼
//!    └──────── Ready / Failed ◀┴── Succeeded/Failed ──┴─ AwaitingResult
//! ```
//!
//! ## Generations
//!
//! Every [`StateMachine::select_file`] starts a new job and bumps the
//! generation ([`JobId`]). Events are applied with the job they belong to;
//! an event from any other job is reported as [`Applied::Stale`] and leaves
//! the state untouched. That is the whole cancellation story: the old
//! request keeps running on the wire, its answer is simply never consumed.

use crate::error::ErrorInfo;
use crate::output::PredictionResult;
use crate::pipeline::input::SourceImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generation tag of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// UI-observable state. Exactly one is alive per session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UiState {
    #[default]
    Idle,
    Normalizing,
    Submitting,
    /// The service accepted the job and it is still running remotely.
    AwaitingResult { prediction_id: String },
    Ready(PredictionResult),
    Failed(ErrorInfo),
}

/// Payload-free view of [`UiState`], for logs and observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Normalizing,
    Submitting,
    AwaitingResult,
    Ready,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Normalizing => "normalizing",
            Phase::Submitting => "submitting",
            Phase::AwaitingResult => "awaiting result",
            Phase::Ready => "ready",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl UiState {
    pub fn phase(&self) -> Phase {
        match self {
            UiState::Idle => Phase::Idle,
            UiState::Normalizing => Phase::Normalizing,
            UiState::Submitting => Phase::Submitting,
            UiState::AwaitingResult { .. } => Phase::AwaitingResult,
            UiState::Ready(_) => Phase::Ready,
            UiState::Failed(_) => Phase::Failed,
        }
    }

    /// Normalizing, Submitting or AwaitingResult.
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            UiState::Normalizing | UiState::Submitting | UiState::AwaitingResult { .. }
        )
    }

    pub fn has_result(&self) -> bool {
        matches!(self, UiState::Ready(_))
    }

    pub fn has_error(&self) -> bool {
        matches!(self, UiState::Failed(_))
    }

    /// Ready or Failed: nothing more will happen until the user acts.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UiState::Ready(_) | UiState::Failed(_))
    }

    /// The result view is shown only while a result is ready.
    pub fn result_view_open(&self) -> bool {
        self.has_result()
    }

    pub fn result(&self) -> Option<&PredictionResult> {
        match self {
            UiState::Ready(r) => Some(r),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            UiState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Pipeline progress reported by a running job.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Normalization finished (either way; failures fall back).
    Normalized,
    /// The service accepted the job but has not finished it.
    Accepted { prediction_id: String },
    /// A result is available.
    Succeeded(PredictionResult),
    /// The submission failed.
    SubmitFailed(ErrorInfo),
}

/// What [`StateMachine::apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The state changed.
    Transitioned { from: Phase, to: Phase },
    /// The event belongs to a superseded job and was discarded.
    Stale { job: JobId, current: JobId },
    /// The event does not apply in the current state; nothing changed.
    Ignored { phase: Phase },
}

/// Read-only copy of the machine, published to presenters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub job: JobId,
    pub state: UiState,
    pub is_loading: bool,
    pub has_result: bool,
    pub has_error: bool,
}

impl Snapshot {
    fn capture(job: JobId, state: &UiState) -> Self {
        Self {
            job,
            state: state.clone(),
            is_loading: state.is_loading(),
            has_result: state.has_result(),
            has_error: state.has_error(),
        }
    }
}

/// Single-instance, single-flight state machine.
#[derive(Debug, Default)]
pub struct StateMachine {
    state: UiState,
    current: JobId,
    source: Option<SourceImage>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &UiState {
        &self.state
    }

    pub fn current_job(&self) -> JobId {
        self.current
    }

    /// The image behind the current job, kept for the comparison view.
    pub fn source(&self) -> Option<&SourceImage> {
        self.source.as_ref()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(self.current, &self.state)
    }

    /// Accept a new file from any state.
    ///
    /// Clears the previous result or error, supersedes any job in flight and
    /// returns the id the new job must tag its events with.
    pub fn select_file(&mut self, source: SourceImage) -> JobId {
        self.current = JobId(self.current.0 + 1);
        self.source = Some(source);
        self.state = UiState::Normalizing;
        self.current
    }

    /// Close the result view and return to Idle.
    ///
    /// Also retires the current generation, so a job still in flight can
    /// never reopen the view. Returns `false` if already idle.
    pub fn close_modal(&mut self) -> bool {
        if self.state == UiState::Idle {
            return false;
        }
        self.current = JobId(self.current.0 + 1);
        self.source = None;
        self.state = UiState::Idle;
        true
    }

    /// Apply an event reported by `job`.
    pub fn apply(&mut self, job: JobId, event: Event) -> Applied {
        if job != self.current {
            return Applied::Stale {
                job,
                current: self.current,
            };
        }

        let from = self.state.phase();
        let next = match (&self.state, event) {
            (UiState::Normalizing, Event::Normalized) => UiState::Submitting,
            (UiState::Submitting, Event::Accepted { prediction_id }) => {
                UiState::AwaitingResult { prediction_id }
            }
            (UiState::AwaitingResult { .. }, Event::Accepted { prediction_id }) => {
                UiState::AwaitingResult { prediction_id }
            }
            (UiState::Submitting | UiState::AwaitingResult { .. }, Event::Succeeded(result)) => {
                UiState::Ready(result)
            }
            (UiState::Submitting | UiState::AwaitingResult { .. }, Event::SubmitFailed(error)) => {
                UiState::Failed(error)
            }
            _ => return Applied::Ignored { phase: from },
        };

        self.state = next;
        Applied::Transitioned {
            from,
            to: self.state.phase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceImage {
        SourceImage::new(vec![0xFF, 0xD8, 0xFF], "image/jpeg")
    }

    fn url(s: &str) -> PredictionResult {
        PredictionResult::Url(s.to_string())
    }

    #[test]
    fn starts_idle_with_no_flags() {
        let m = StateMachine::new();
        assert_eq!(m.state(), &UiState::Idle);
        let snap = m.snapshot();
        assert!(!snap.is_loading && !snap.has_result && !snap.has_error);
    }

    #[test]
    fn happy_path_order() {
        let mut m = StateMachine::new();
        let job = m.select_file(source());
        assert_eq!(m.state().phase(), Phase::Normalizing);
        assert!(m.state().is_loading());

        assert_eq!(
            m.apply(job, Event::Normalized),
            Applied::Transitioned {
                from: Phase::Normalizing,
                to: Phase::Submitting
            }
        );
        assert!(m.state().is_loading());

        m.apply(job, Event::Succeeded(url("https://a/b.png")));
        assert_eq!(m.state(), &UiState::Ready(url("https://a/b.png")));
        assert!(m.state().result_view_open());
        assert!(!m.state().is_loading());
    }

    #[test]
    fn failure_sets_error_and_clears_loading() {
        let mut m = StateMachine::new();
        let job = m.select_file(source());
        m.apply(job, Event::Normalized);
        m.apply(job, Event::SubmitFailed(ErrorInfo::new("HTTP 500")));

        let snap = m.snapshot();
        assert!(snap.has_error);
        assert!(!snap.is_loading);
        assert!(!snap.state.result_view_open());
        assert_eq!(m.state().error().unwrap().message, "HTTP 500");
    }

    #[test]
    fn awaiting_result_then_ready() {
        let mut m = StateMachine::new();
        let job = m.select_file(source());
        m.apply(job, Event::Normalized);
        m.apply(
            job,
            Event::Accepted {
                prediction_id: "p1".into(),
            },
        );
        assert!(m.state().is_loading());
        assert_eq!(m.state().phase(), Phase::AwaitingResult);

        m.apply(job, Event::Succeeded(url("https://a/out.png")));
        assert!(m.state().has_result());
    }

    #[test]
    fn stale_events_are_discarded() {
        let mut m = StateMachine::new();
        let first = m.select_file(source());
        m.apply(first, Event::Normalized);

        let second = m.select_file(source());
        assert_ne!(first, second);

        let applied = m.apply(first, Event::Succeeded(url("https://old")));
        assert_eq!(
            applied,
            Applied::Stale {
                job: first,
                current: second
            }
        );
        assert_eq!(m.state(), &UiState::Normalizing);
    }

    #[test]
    fn new_selection_resets_result_and_error() {
        let mut m = StateMachine::new();
        let job = m.select_file(source());
        m.apply(job, Event::Normalized);
        m.apply(job, Event::SubmitFailed(ErrorInfo::new("boom")));
        assert!(m.state().has_error());

        m.select_file(source());
        assert_eq!(m.state(), &UiState::Normalizing);
        assert!(m.state().error().is_none());
    }

    #[test]
    fn close_modal_returns_to_idle_and_retires_job() {
        let mut m = StateMachine::new();
        let job = m.select_file(source());
        m.apply(job, Event::Normalized);
        m.apply(job, Event::Succeeded(url("https://a")));

        assert!(m.close_modal());
        assert_eq!(m.state(), &UiState::Idle);
        assert!(m.source().is_none());
        assert!(matches!(
            m.apply(job, Event::Succeeded(url("https://again"))),
            Applied::Stale { .. }
        ));
        assert!(!m.close_modal());
    }

    #[test]
    fn close_during_submit_ignores_late_result() {
        let mut m = StateMachine::new();
        let job = m.select_file(source());
        m.apply(job, Event::Normalized);
        m.close_modal();

        m.apply(job, Event::SubmitFailed(ErrorInfo::new("late")));
        assert_eq!(m.state(), &UiState::Idle);
    }

    #[test]
    fn out_of_order_events_are_ignored() {
        let mut m = StateMachine::new();
        let job = m.select_file(source());

        // Result before normalization finished: not a valid transition.
        assert_eq!(
            m.apply(job, Event::Succeeded(url("https://x"))),
            Applied::Ignored {
                phase: Phase::Normalizing
            }
        );
        m.apply(job, Event::Normalized);
        assert_eq!(
            m.apply(job, Event::Normalized),
            Applied::Ignored {
                phase: Phase::Submitting
            }
        );
    }

    #[test]
    fn snapshot_serialises_with_state_tag() {
        let mut m = StateMachine::new();
        let job = m.select_file(source());
        m.apply(job, Event::Normalized);
        m.apply(job, Event::SubmitFailed(ErrorInfo::new("nope")));

        let v = serde_json::to_value(m.snapshot()).unwrap();
        assert_eq!(v["state"]["state"], "failed");
        assert_eq!(v["state"]["message"], "nope");
        assert_eq!(v["has_error"], true);
    }
}
