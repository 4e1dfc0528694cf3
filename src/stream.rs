//! Streaming state API: observe a session as a `Stream` of snapshots.
//!
//! The presenter side of a UI usually wants "the latest state, whenever it
//! changes" rather than a callback. [`state_stream`] wraps the session's
//! watch channel so it can be driven with `StreamExt` combinators, selected
//! on, or forwarded over a socket.
//!
//! Snapshots are coalesced: a slow consumer sees the most recent state, not
//! every intermediate one. Use a [`crate::observer::StateObserver`] when each
//! transition matters.

use crate::session::EnhanceSession;
use crate::state::{JobId, Snapshot};
use futures::stream;
use std::pin::Pin;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::Stream;

/// A boxed stream of session snapshots.
pub type StateStream = Pin<Box<dyn Stream<Item = Snapshot> + Send>>;

/// Stream every published snapshot, starting with the current one.
///
/// The stream ends when the session (and all its clones) are dropped.
///
/// # Example
/// ```rust,no_run
/// use imgenhance::{state_stream, EnhanceConfig, EnhanceSession, SourceImage};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let session = EnhanceSession::new(EnhanceConfig::default())?;
/// let mut states = state_stream(&session);
/// session.select_file(SourceImage::from_bytes(std::fs::read("photo.png")?));
/// while let Some(snap) = states.next().await {
///     eprintln!("{} is {}", snap.job, snap.state.phase());
///     if !snap.is_loading && snap.job.0 > 0 {
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn state_stream(session: &EnhanceSession) -> StateStream {
    Box::pin(WatchStream::new(session.subscribe()))
}

/// Stream snapshots for `job` only, ending once it settles or is superseded.
///
/// The final item is the job's terminal snapshot, or the first snapshot of
/// whatever replaced it.
pub fn job_stream(session: &EnhanceSession, job: JobId) -> StateStream {
    let rx = session.subscribe();
    let s = stream::unfold(Some((rx, true)), move |state| async move {
        let (mut rx, mut first) = state?;
        loop {
            // The current value is yielded without waiting for a change.
            if !first && rx.changed().await.is_err() {
                return None;
            }
            first = false;
            let snap = rx.borrow_and_update().clone();
            if snap.job < job {
                continue;
            }
            let settled = snap.job != job || !snap.is_loading;
            let next = if settled { None } else { Some((rx, false)) };
            return Some((snap, next));
        }
    });
    Box::pin(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnhanceConfig;
    use crate::error::SubmitError;
    use crate::output::{JobListing, PredictionReply, PredictionResult};
    use crate::pipeline::input::SourceImage;
    use crate::pipeline::submit::{Predictor, SubmissionRequest};
    use crate::state::Phase;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl Predictor for Echo {
        async fn submit(&self, _request: SubmissionRequest) -> Result<PredictionReply, SubmitError> {
            Ok(PredictionReply::Ready(PredictionResult::Url(
                "https://cdn/out.png".into(),
            )))
        }

        async fn status(&self, _id: &str) -> Result<PredictionReply, SubmitError> {
            Err(SubmitError::EmptyResult)
        }

        async fn list(&self) -> Result<JobListing, SubmitError> {
            Ok(JobListing::default())
        }
    }

    fn session() -> EnhanceSession {
        let config = EnhanceConfig::builder()
            .predictor(Arc::new(Echo))
            .build()
            .unwrap();
        EnhanceSession::new(config).unwrap()
    }

    #[tokio::test]
    async fn stream_starts_with_current_snapshot() {
        let session = session();
        let mut s = state_stream(&session);
        let first = s.next().await.unwrap();
        assert_eq!(first.state.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn job_stream_ends_with_terminal_state() {
        let session = session();
        let handle = session.select_file(SourceImage::new(b"raw".to_vec(), "image/png"));
        let snaps: Vec<Snapshot> = tokio::time::timeout(
            Duration::from_secs(5),
            job_stream(&session, handle.job()).collect(),
        )
        .await
        .expect("job stream did not end");
        handle.join().await;

        let last = snaps.last().unwrap();
        assert!(last.has_result);
        assert!(snaps.iter().all(|s| s.job == last.job));
    }

    #[tokio::test]
    async fn job_stream_of_settled_job_yields_once() {
        let session = session();
        let snap = session
            .enhance(SourceImage::new(b"raw".to_vec(), "image/png"))
            .await;

        let snaps: Vec<Snapshot> = tokio::time::timeout(
            Duration::from_secs(5),
            job_stream(&session, snap.job).collect(),
        )
        .await
        .expect("job stream did not end");
        assert_eq!(snaps, vec![snap]);
    }

    #[tokio::test]
    async fn job_stream_ends_when_superseded() {
        let session = session();
        let snap = session
            .enhance(SourceImage::new(b"raw".to_vec(), "image/png"))
            .await;
        session.close_modal();

        let snaps: Vec<Snapshot> = tokio::time::timeout(
            Duration::from_secs(5),
            job_stream(&session, snap.job).collect(),
        )
        .await
        .expect("job stream did not end");
        assert_eq!(snaps.len(), 1);
        assert!(snaps[0].job > snap.job);
        assert_eq!(snaps[0].state.phase(), Phase::Idle);
    }
}
