//! The session: drives the state machine from real pipeline work.
//!
//! An [`EnhanceSession`] owns the single [`StateMachine`] for one user and
//! runs one job per file selection:
//!
//! ```text
//! select_file ─▶ normalize (spawn_blocking) ─▶ submit ─▶ [poll status] ─▶ Ready | Failed
//! ```
//!
//! Each step reports back through [`StateMachine::apply`] tagged with the
//! job's [`JobId`]. When a newer selection (or a modal close) has retired
//! that id, the report is discarded and the job stops: a stale job never
//! submits after normalizing and never polls again. A request already on the
//! wire is not aborted; its answer is just ignored.
//!
//! The machine lives behind a `std::sync::Mutex` that is never held across
//! an `.await`. Every applied transition is published on a
//! `tokio::sync::watch` channel and forwarded to the configured observer.

use crate::config::EnhanceConfig;
use crate::error::{EnhanceError, ErrorInfo, SubmitError};
use crate::observer::SharedObserver;
use crate::output::{JobListing, PredictionReply};
use crate::pipeline::input::SourceImage;
use crate::pipeline::normalize::{self, NormalizeOptions};
use crate::pipeline::submit::{HttpPredictor, Predictor, SubmissionRequest};
use crate::state::{Applied, Event, JobId, Snapshot, StateMachine, UiState};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to one enhancement session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EnhanceSession {
    inner: Arc<Shared>,
}

struct Shared {
    machine: Mutex<StateMachine>,
    tx: watch::Sender<Snapshot>,
    predictor: Arc<dyn Predictor>,
    observer: Option<SharedObserver>,
    config: EnhanceConfig,
}

/// A spawned pipeline run.
pub struct JobHandle {
    job: JobId,
    handle: JoinHandle<()>,
}

impl JobHandle {
    pub fn job(&self) -> JobId {
        self.job
    }

    /// Wait for the job's task to finish (including a stale job winding down).
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!("{} task ended abnormally: {}", self.job, e);
        }
    }
}

impl EnhanceSession {
    /// Create a session, resolving the predictor from the config.
    ///
    /// A pre-built `config.predictor` is used as-is; otherwise an
    /// [`HttpPredictor`] is built for `config.endpoint`.
    pub fn new(config: EnhanceConfig) -> Result<Self, EnhanceError> {
        let predictor = resolve_predictor(&config)?;
        let (tx, _rx) = watch::channel(Snapshot::default());
        Ok(Self {
            inner: Arc::new(Shared {
                machine: Mutex::new(StateMachine::new()),
                tx,
                observer: config.observer.clone(),
                predictor,
                config,
            }),
        })
    }

    pub fn config(&self) -> &EnhanceConfig {
        &self.inner.config
    }

    /// Current state plus derived flags.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().snapshot()
    }

    pub fn state(&self) -> UiState {
        self.inner.lock().state().clone()
    }

    /// The image behind the current job (the "before" side of a comparison).
    pub fn source(&self) -> Option<SourceImage> {
        self.inner.lock().source().cloned()
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.tx.subscribe()
    }

    /// Accept a new file and start its pipeline.
    ///
    /// Any job still in flight is superseded: its remaining reports are
    /// discarded.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime, since the job is started
    /// with `tokio::spawn`.
    pub fn select_file(&self, source: SourceImage) -> JobHandle {
        let job = {
            let mut machine = self.inner.lock();
            let from = machine.state().clone();
            let job = machine.select_file(source.clone());
            self.inner.publish(job, &from, &machine);
            job
        };

        info!(
            "{}: accepted {} ({} bytes, {})",
            job,
            source.name().unwrap_or("image"),
            source.len(),
            source.media_type()
        );

        let shared = Arc::clone(&self.inner);
        let handle = tokio::spawn(run_job(shared, job, source));
        JobHandle { job, handle }
    }

    /// Close the result view and return to Idle.
    ///
    /// Retires the current job, so a result still in flight is ignored.
    pub fn close_modal(&self) {
        let mut machine = self.inner.lock();
        let from = machine.state().clone();
        let retired = machine.current_job();
        if machine.close_modal() {
            debug!("{}: result view closed", retired);
            let job = machine.current_job();
            self.inner.publish(job, &from, &machine);
        }
    }

    /// Wait until `job` is no longer loading or has been superseded.
    pub async fn wait_for(&self, job: JobId) -> Snapshot {
        let mut rx = self.subscribe();
        let settled = rx
            .wait_for(|snap| snap.job != job || !snap.is_loading)
            .await
            .map(|snap| snap.clone());
        settled.unwrap_or_else(|_| self.snapshot())
    }

    /// Select `source` and wait for its terminal state.
    pub async fn enhance(&self, source: SourceImage) -> Snapshot {
        let handle = self.select_file(source);
        let job = handle.job();
        let snapshot = self.wait_for(job).await;
        handle.join().await;
        snapshot
    }

    /// Look up a job on the status endpoint (diagnostics).
    pub async fn prediction_status(&self, id: &str) -> Result<PredictionReply, SubmitError> {
        self.inner.predictor.status(id).await
    }

    /// List jobs known to the status endpoint (diagnostics).
    pub async fn predictions(&self) -> Result<JobListing, SubmitError> {
        self.inner.predictor.list().await
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StateMachine> {
        // A panicking observer must not wedge the session.
        self.machine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, job: JobId) -> bool {
        self.lock().current_job() == job
    }

    /// Apply `event` for `job`. Returns `true` if the state changed.
    fn apply(&self, job: JobId, event: Event) -> bool {
        let mut machine = self.lock();
        let from = machine.state().clone();
        match machine.apply(job, event) {
            Applied::Transitioned { from: before, to } => {
                debug!("{}: {} → {}", job, before, to);
                self.publish(job, &from, &machine);
                true
            }
            Applied::Stale { job, current } => {
                debug!("{}: discarding stale report (current is {})", job, current);
                if let Some(ref observer) = self.observer {
                    observer.on_stale(job, current);
                }
                false
            }
            Applied::Ignored { phase } => {
                warn!("{}: event ignored in state '{}'", job, phase);
                false
            }
        }
    }

    /// Notify the observer and publish a snapshot. Called with the lock held
    /// so observers and subscribers see transitions in order.
    fn publish(&self, job: JobId, from: &UiState, machine: &StateMachine) {
        if let Some(ref observer) = self.observer {
            observer.on_transition(job, from, machine.state());
        }
        self.tx.send_replace(machine.snapshot());
    }

    /// Follow a pending job until it resolves, is superseded, or polling
    /// gives up. `None` means the job went stale and must stop quietly.
    async fn await_pending(&self, job: JobId, id: String, status: String) -> Option<Event> {
        if !self.config.poll_pending {
            return Some(failed(SubmitError::PendingUnresolved { id, status }));
        }
        if !self.apply(
            job,
            Event::Accepted {
                prediction_id: id.clone(),
            },
        ) {
            return None;
        }

        let interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut last_status = status;
        let mut polls: u32 = 0;

        loop {
            if self.config.max_polls.is_some_and(|max| polls >= max) {
                return Some(failed(SubmitError::PendingUnresolved {
                    id,
                    status: last_status,
                }));
            }

            tokio::time::sleep(interval).await;
            if !self.is_current(job) {
                debug!("{}: stopped polling '{}' (superseded)", job, id);
                return None;
            }

            polls += 1;
            match self.predictor.status(&id).await {
                Ok(PredictionReply::Ready(result)) => return Some(Event::Succeeded(result)),
                Ok(PredictionReply::Pending { status, .. }) => {
                    debug!("{}: prediction '{}' still {} (poll {})", job, id, status, polls);
                    last_status = status;
                }
                Err(e) => return Some(failed(e)),
            }
        }
    }
}

/// One pipeline run: normalize → submit → (poll) → terminal event.
async fn run_job(shared: Arc<Shared>, job: JobId, source: SourceImage) {
    let start = Instant::now();

    let prepared = normalize::prepare(&source, NormalizeOptions::from(&shared.config)).await;
    if prepared.fallback.is_none() {
        debug!(
            "{}: normalized to {} bytes {:?}",
            job,
            prepared.image.byte_size(),
            prepared.image.dimensions()
        );
    }
    if !shared.apply(job, Event::Normalized) {
        return;
    }

    let request = SubmissionRequest::new(prepared.image);
    let event = match shared.predictor.submit(request).await {
        Ok(PredictionReply::Ready(result)) => Event::Succeeded(result),
        Ok(PredictionReply::Pending { id, status }) => {
            match shared.await_pending(job, id, status).await {
                Some(event) => event,
                None => return,
            }
        }
        Err(e) => failed(e),
    };

    let elapsed_ms = start.elapsed().as_millis() as u64;
    match &event {
        Event::Succeeded(_) => info!("{}: result ready in {}ms", job, elapsed_ms),
        Event::SubmitFailed(e) => warn!("{}: submission failed after {}ms: {}", job, elapsed_ms, e),
        _ => {}
    }
    shared.apply(job, event);
}

fn failed(err: SubmitError) -> Event {
    Event::SubmitFailed(ErrorInfo::from(err))
}

fn resolve_predictor(config: &EnhanceConfig) -> Result<Arc<dyn Predictor>, EnhanceError> {
    if let Some(ref predictor) = config.predictor {
        return Ok(Arc::clone(predictor));
    }
    let http = HttpPredictor::new(config)
        .map_err(|e| EnhanceError::InvalidConfig(format!("HTTP client: {e}")))?;
    Ok(Arc::new(http))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::PredictionResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every submission with the same reply.
    struct FixedPredictor {
        reply: Result<PredictionReply, SubmitError>,
        submits: AtomicUsize,
    }

    impl FixedPredictor {
        fn new(reply: Result<PredictionReply, SubmitError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                submits: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Predictor for FixedPredictor {
        async fn submit(&self, _request: SubmissionRequest) -> Result<PredictionReply, SubmitError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }

        async fn status(&self, _id: &str) -> Result<PredictionReply, SubmitError> {
            self.reply.clone()
        }

        async fn list(&self) -> Result<JobListing, SubmitError> {
            Ok(JobListing {
                count: self.submits.load(Ordering::SeqCst),
                entries: Vec::new(),
            })
        }
    }

    fn session_with(predictor: Arc<dyn Predictor>) -> EnhanceSession {
        let config = EnhanceConfig::builder()
            .predictor(predictor)
            .poll_interval_ms(1)
            .build()
            .unwrap();
        EnhanceSession::new(config).unwrap()
    }

    fn garbage() -> SourceImage {
        SourceImage::new(b"not an image".to_vec(), "image/png")
    }

    #[tokio::test]
    async fn success_reaches_ready() {
        let predictor = FixedPredictor::new(Ok(PredictionReply::Ready(PredictionResult::Url(
            "https://a/out.png".into(),
        ))));
        let session = session_with(predictor.clone());

        let snap = session.enhance(garbage()).await;
        assert!(snap.has_result);
        assert!(!snap.is_loading);
        assert_eq!(predictor.submits.load(Ordering::SeqCst), 1);
        assert!(session.source().is_some());
    }

    #[tokio::test]
    async fn failure_reaches_failed() {
        let session = session_with(FixedPredictor::new(Err(SubmitError::EmptyResult)));
        let snap = session.enhance(garbage()).await;
        assert!(snap.has_error);
        assert!(!snap.is_loading);
        assert!(!snap.state.error().unwrap().message.is_empty());
    }

    #[tokio::test]
    async fn pending_without_polling_fails() {
        let predictor = FixedPredictor::new(Ok(PredictionReply::Pending {
            id: "p1".into(),
            status: "starting".into(),
        }));
        let config = EnhanceConfig::builder()
            .predictor(predictor)
            .poll_pending(false)
            .build()
            .unwrap();
        let session = EnhanceSession::new(config).unwrap();

        let snap = session.enhance(garbage()).await;
        let err = snap.state.error().unwrap();
        assert!(err.message.contains("p1"), "got {}", err.message);
    }

    #[tokio::test]
    async fn polling_stops_at_max_polls() {
        let predictor = FixedPredictor::new(Ok(PredictionReply::Pending {
            id: "p2".into(),
            status: "processing".into(),
        }));
        let config = EnhanceConfig::builder()
            .predictor(predictor)
            .poll_interval_ms(1)
            .max_polls(3)
            .build()
            .unwrap();
        let session = EnhanceSession::new(config).unwrap();

        let snap = session.enhance(garbage()).await;
        assert!(snap.has_error);
        assert!(snap.state.error().unwrap().message.contains("processing"));
    }

    #[tokio::test]
    async fn close_modal_resets_to_idle() {
        let predictor = FixedPredictor::new(Ok(PredictionReply::Ready(PredictionResult::Url(
            "https://a/out.png".into(),
        ))));
        let session = session_with(predictor);
        session.enhance(garbage()).await;

        session.close_modal();
        let snap = session.snapshot();
        assert_eq!(snap.state, UiState::Idle);
        assert!(session.source().is_none());
    }

    #[tokio::test]
    async fn listing_goes_through_predictor() {
        let predictor = FixedPredictor::new(Err(SubmitError::EmptyResult));
        let session = session_with(predictor);
        session.enhance(garbage()).await;
        assert_eq!(session.predictions().await.unwrap().count, 1);
    }

    #[test]
    #[should_panic]
    fn select_file_needs_a_runtime() {
        let session = EnhanceSession::new(EnhanceConfig::default()).unwrap();
        session.select_file(garbage());
    }

    #[test]
    fn http_predictor_is_default() {
        let session = EnhanceSession::new(EnhanceConfig::default()).unwrap();
        assert_eq!(session.snapshot().state, UiState::Idle);
    }
}
