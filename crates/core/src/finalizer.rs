use crate::backend::Backend;
use crate::context::UserContext;
use crate::error::FinalizeError;
use crate::models::EndSessionRequest;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_FINALIZE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MIN_SESSION_DURATION: Duration = Duration::from_secs(5);

/// Snapshot of a finished call, taken when teardown begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedSession {
    pub project_id: String,
    pub duration: Duration,
    pub transcript: String,
}

/// What the backend billed for a saved session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReceipt {
    pub session_id: String,
    pub credits_deducted: i64,
    pub remaining_credits: i64,
    /// Balance cached after the post-save refresh.
    pub balance: i64,
    /// False when the profile refresh failed and `remaining_credits` was applied instead.
    pub profile_refreshed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooShort(Duration),
    EmptyTranscript,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooShort(d) => write!(f, "the call lasted only {}s", d.as_secs()),
            SkipReason::EmptyTranscript => f.write_str("nothing was said during the call"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Saved(SessionReceipt),
    Skipped(SkipReason),
}

/// Persists a finished call and refreshes the cached balance.
///
/// The finalizer saves whatever it is given. Making sure a call is finalized
/// at most once is the call controller's job.
pub struct SessionFinalizer {
    backend: Arc<dyn Backend>,
    context: UserContext,
    timeout: Duration,
    min_duration: Duration,
}

impl SessionFinalizer {
    pub fn new(backend: Arc<dyn Backend>, context: UserContext) -> Self {
        Self {
            backend,
            context,
            timeout: DEFAULT_FINALIZE_TIMEOUT,
            min_duration: DEFAULT_MIN_SESSION_DURATION,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_min_duration(mut self, min_duration: Duration) -> Self {
        self.min_duration = min_duration;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn min_duration(&self) -> Duration {
        self.min_duration
    }

    pub async fn finalize(&self, session: FinishedSession) -> Result<FinalizeOutcome, FinalizeError> {
        if session.duration < self.min_duration {
            tracing::info!(
                "skipping save: call lasted {:?}, below the {:?} floor",
                session.duration,
                self.min_duration
            );
            return Ok(FinalizeOutcome::Skipped(SkipReason::TooShort(session.duration)));
        }
        // The backend answers 400 to an empty transcript.
        if session.transcript.trim().is_empty() {
            tracing::info!("skipping save: transcript is empty");
            return Ok(FinalizeOutcome::Skipped(SkipReason::EmptyTranscript));
        }

        let token = self.context.bearer_token().await?;
        let request = EndSessionRequest {
            duration_seconds: session.duration.as_secs(),
            transcript: session.transcript,
        };
        tracing::info!(
            "saving session for project {} ({}s, {} bytes of transcript)",
            session.project_id,
            request.duration_seconds,
            request.transcript.len()
        );

        let response = match tokio::time::timeout(
            self.timeout,
            self.backend.end_session(&token, &session.project_id, &request),
        )
        .await
        {
            Err(_) => {
                tracing::error!("saving session timed out after {:?}", self.timeout);
                return Err(FinalizeError::Timeout(self.timeout));
            }
            Ok(Err(e)) => {
                tracing::error!("backend rejected session: {}", e);
                return Err(FinalizeError::Rejected(e));
            }
            Ok(Ok(response)) => response,
        };
        tracing::info!(
            "session {} saved: {} credits deducted, {} remaining",
            response.session_id,
            response.credits_deducted,
            response.remaining_credits
        );

        let profile_refreshed = match tokio::time::timeout(
            self.timeout,
            self.context.refresh_profile(self.backend.as_ref()),
        )
        .await
        {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::warn!("profile refresh failed, using remainingCredits: {}", e);
                self.context.apply_remaining_credits(response.remaining_credits);
                false
            }
            Err(_) => {
                tracing::warn!("profile refresh timed out, using remainingCredits");
                self.context.apply_remaining_credits(response.remaining_credits);
                false
            }
        };

        Ok(FinalizeOutcome::Saved(SessionReceipt {
            session_id: response.session_id,
            credits_deducted: response.credits_deducted,
            remaining_credits: response.remaining_credits,
            balance: self.context.credits().unwrap_or(response.remaining_credits),
            profile_refreshed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::error::BackendError;
    use crate::models::EndSessionResponse;
    use crate::testing::{self, SlowBackend};

    fn finished(secs: u64, transcript: &str) -> FinishedSession {
        FinishedSession {
            project_id: "p1".into(),
            duration: Duration::from_secs(secs),
            transcript: transcript.into(),
        }
    }

    fn response(deducted: i64, remaining: i64) -> EndSessionResponse {
        EndSessionResponse {
            status: "success".into(),
            message: None,
            session_id: "s1".into(),
            credits_deducted: deducted,
            remaining_credits: remaining,
        }
    }

    #[tokio::test]
    async fn short_calls_are_not_saved() {
        let mut backend = MockBackend::new();
        backend.expect_end_session().never();
        let finalizer = SessionFinalizer::new(Arc::new(backend), testing::context(10));

        let outcome = finalizer.finalize(finished(3, "")).await.unwrap();
        assert_eq!(
            outcome,
            FinalizeOutcome::Skipped(SkipReason::TooShort(Duration::from_secs(3)))
        );
    }

    #[tokio::test]
    async fn empty_transcripts_are_not_saved() {
        let mut backend = MockBackend::new();
        backend.expect_end_session().never();
        let finalizer = SessionFinalizer::new(Arc::new(backend), testing::context(10));

        let outcome = finalizer.finalize(finished(30, "  ")).await.unwrap();
        assert_eq!(outcome, FinalizeOutcome::Skipped(SkipReason::EmptyTranscript));
    }

    #[tokio::test]
    async fn save_refreshes_balance_from_profile() {
        let mut backend = MockBackend::new();
        backend
            .expect_end_session()
            .withf(|_, project_id, request| {
                project_id == "p1" && request.duration_seconds == 130 && request.transcript == "hi"
            })
            .times(1)
            .returning(|_, _, _| Ok(response(6, 4)));
        backend
            .expect_fetch_profile()
            .times(1)
            .returning(|_| Ok(testing::profile(4)));
        let context = testing::context(10);
        let finalizer = SessionFinalizer::new(Arc::new(backend), context.clone());

        let outcome = finalizer.finalize(finished(130, "hi")).await.unwrap();
        let FinalizeOutcome::Saved(receipt) = outcome else {
            panic!("expected a saved session");
        };
        assert_eq!(receipt.credits_deducted, 6);
        assert_eq!(receipt.balance, 4);
        assert!(receipt.profile_refreshed);
        assert_eq!(context.credits(), Some(4));
    }

    #[tokio::test]
    async fn failed_refresh_falls_back_to_remaining_credits() {
        let mut backend = MockBackend::new();
        backend
            .expect_end_session()
            .returning(|_, _, _| Ok(response(3, 7)));
        backend
            .expect_fetch_profile()
            .returning(|_| Err(BackendError::Http("connection reset".into())));
        let context = testing::context(10);
        let finalizer = SessionFinalizer::new(Arc::new(backend), context.clone());

        let FinalizeOutcome::Saved(receipt) = finalizer.finalize(finished(61, "hi")).await.unwrap()
        else {
            panic!("expected a saved session");
        };
        assert!(!receipt.profile_refreshed);
        assert_eq!(context.credits(), Some(7));
    }

    #[tokio::test]
    async fn rejection_leaves_balance_untouched() {
        let mut backend = MockBackend::new();
        backend
            .expect_end_session()
            .returning(|_, _, _| Err(BackendError::from_status(400, "Transcript is empty.".into())));
        backend.expect_fetch_profile().never();
        let context = testing::context(10);
        let finalizer = SessionFinalizer::new(Arc::new(backend), context.clone());

        let err = finalizer.finalize(finished(61, "hi")).await.unwrap_err();
        assert!(matches!(err, FinalizeError::Rejected(BackendError::Status { status: 400, .. })));
        assert_eq!(context.credits(), Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_save_times_out_without_refresh() {
        let backend = Arc::new(SlowBackend::new(Duration::from_secs(20), 4));
        let context = testing::context(10);
        let finalizer = SessionFinalizer::new(backend.clone(), context.clone());

        let err = finalizer.finalize(finished(130, "hi")).await.unwrap_err();
        assert_eq!(err, FinalizeError::Timeout(Duration::from_secs(15)));
        assert_eq!(backend.end_session_calls(), 1);
        assert_eq!(backend.profile_calls(), 0);
        assert_eq!(context.credits(), Some(10));
    }
}
