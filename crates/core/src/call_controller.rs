//! The practice-call lifecycle.
//!
//! ```text
//! Idle -> Connecting -> Connected -> Ending -> Ended -> Idle
//! ```
//!
//! A call leaves `Idle` through [`CallController::start_call`] and comes back
//! to it through exactly one teardown. Whoever moves the session into `Ending`
//! first owns that teardown; later end requests are no-ops. `force_close`
//! cancels an owner that is still waiting on the backend.

use crate::backend::Backend;
use crate::context::UserContext;
use crate::credit_meter::CreditMeter;
use crate::error::{CallError, FinalizeError, PreconditionError};
use crate::finalizer::{
    DEFAULT_FINALIZE_TIMEOUT, DEFAULT_MIN_SESSION_DURATION, FinalizeOutcome, FinishedSession,
    SessionFinalizer, SessionReceipt, SkipReason,
};
use crate::models::Project;
use crate::persona::persona_for;
use crate::transcript::{TranscriptAccumulator, TranscriptTurn};
use crate::transport::{
    CallEvent, ConnectionTarget, EventSink, MicrophoneAccess, StartSession, TransportEvent,
    VAR_AGENT_PERSONA, VAR_CREDIT_BALANCE, VAR_MEMORY_SUMMARY, VAR_PROJECT_DESCRIPTION,
    VAR_PROJECT_KEY_POINTS, VAR_PROJECT_TITLE, VAR_USER_NAME, VoiceTransport,
};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Connecting,
    Connected,
    Ending,
    Ended,
}

impl CallState {
    pub fn can_transition_to(self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Ending)
                | (Connecting, Idle)
                | (Connected, Ending)
                | (Ending, Ended)
                | (Ended, Idle)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    UserEnded,
    CreditsExhausted,
    RemoteHangup,
    TransportError,
    ForceClosed,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminationReason::UserEnded => "you ended the call",
            TerminationReason::CreditsExhausted => "your credits ran out",
            TerminationReason::RemoteHangup => "the agent ended the call",
            TerminationReason::TransportError => "the voice connection failed",
            TerminationReason::ForceClosed => "the call was closed without saving",
        };
        f.write_str(text)
    }
}

/// How a call ended, from the user's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Saved(SessionReceipt),
    Skipped(SkipReason),
    SaveFailed(FinalizeError),
    /// Torn down without saving. The transcript is gone.
    Discarded,
    /// Ended before the agent connected.
    Aborted,
}

/// Published to subscribers as the call moves through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallUpdate {
    Transition {
        call_id: u64,
        from: CallState,
        to: CallState,
    },
    Finished {
        call_id: u64,
        reason: Option<TerminationReason>,
        outcome: CallOutcome,
    },
}

#[derive(Debug, Clone)]
pub struct CallSettings {
    meter: CreditMeter,
    min_start_balance: i64,
    finalize_timeout: Duration,
    min_session_duration: Duration,
    stop_timeout: Duration,
    event_capacity: usize,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            meter: CreditMeter::default(),
            min_start_balance: 3,
            finalize_timeout: DEFAULT_FINALIZE_TIMEOUT,
            min_session_duration: DEFAULT_MIN_SESSION_DURATION,
            stop_timeout: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

impl CallSettings {
    pub fn with_meter(mut self, meter: CreditMeter) -> Self {
        self.meter = meter;
        self
    }

    /// Smallest cached balance that lets a call start.
    pub fn with_min_start_balance(mut self, credits: i64) -> Self {
        self.min_start_balance = credits;
        self
    }

    pub fn with_finalize_timeout(mut self, timeout: Duration) -> Self {
        self.finalize_timeout = timeout;
        self
    }

    pub fn with_min_session_duration(mut self, duration: Duration) -> Self {
        self.min_session_duration = duration;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn meter(&self) -> &CreditMeter {
        &self.meter
    }

    pub fn min_start_balance(&self) -> i64 {
        self.min_start_balance
    }

    pub fn finalize_timeout(&self) -> Duration {
        self.finalize_timeout
    }

    pub fn min_session_duration(&self) -> Duration {
        self.min_session_duration
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }
}

/// State of the current call. Owned by the controller; read through [`CallSnapshot`].
#[derive(Debug)]
struct CallSession {
    call_id: u64,
    state: CallState,
    project: Option<Project>,
    started_at: Option<Instant>,
    conversation_id: Option<String>,
    transcript: TranscriptAccumulator,
    last_error: Option<CallError>,
    termination_reason: Option<TerminationReason>,
    last_outcome: Option<CallOutcome>,
    end_in_flight: bool,
    cancel: CancellationToken,
}

impl CallSession {
    fn new() -> Self {
        Self {
            call_id: 0,
            state: CallState::Idle,
            project: None,
            started_at: None,
            conversation_id: None,
            transcript: TranscriptAccumulator::new(),
            last_error: None,
            termination_reason: None,
            last_outcome: None,
            end_in_flight: false,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub call_id: u64,
    pub state: CallState,
    pub project_id: Option<String>,
    pub conversation_id: Option<String>,
    pub elapsed: Option<Duration>,
    pub transcript: Vec<TranscriptTurn>,
    pub last_error: Option<CallError>,
    pub termination_reason: Option<TerminationReason>,
    pub last_outcome: Option<CallOutcome>,
}

pub struct CallController {
    backend: Arc<dyn Backend>,
    transport: Arc<dyn VoiceTransport>,
    microphone: Arc<dyn MicrophoneAccess>,
    context: UserContext,
    finalizer: SessionFinalizer,
    settings: CallSettings,
    session: Mutex<CallSession>,
    events_tx: mpsc::Sender<CallEvent>,
    updates: broadcast::Sender<CallUpdate>,
}

impl CallController {
    /// Builds a controller and the receiving end of its transport event queue,
    /// which is handed to [`CallController::run`].
    pub fn new(
        backend: Arc<dyn Backend>,
        transport: Arc<dyn VoiceTransport>,
        microphone: Arc<dyn MicrophoneAccess>,
        context: UserContext,
        settings: CallSettings,
    ) -> (Self, mpsc::Receiver<CallEvent>) {
        let (events_tx, events_rx) = mpsc::channel(settings.event_capacity);
        let (updates, _) = broadcast::channel(64);
        let finalizer = SessionFinalizer::new(backend.clone(), context.clone())
            .with_timeout(settings.finalize_timeout)
            .with_min_duration(settings.min_session_duration);
        let controller = Self {
            backend,
            transport,
            microphone,
            context,
            finalizer,
            settings,
            session: Mutex::new(CallSession::new()),
            events_tx,
            updates,
        };
        (controller, events_rx)
    }

    pub fn settings(&self) -> &CallSettings {
        &self.settings
    }

    pub fn context(&self) -> &UserContext {
        &self.context
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallUpdate> {
        self.updates.subscribe()
    }

    pub fn state(&self) -> CallState {
        self.session().state
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let session = self.session();
        CallSnapshot {
            call_id: session.call_id,
            state: session.state,
            project_id: session.project.as_ref().map(|p| p.project_id.clone()),
            conversation_id: session.conversation_id.clone(),
            elapsed: session.started_at.map(|t| t.elapsed()),
            transcript: session.transcript.turns().to_vec(),
            last_error: session.last_error.clone(),
            termination_reason: session.termination_reason,
            last_outcome: session.last_outcome.clone(),
        }
    }

    fn session(&self) -> MutexGuard<'_, CallSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, session: &mut CallSession, to: CallState) {
        let from = session.state;
        debug_assert!(
            from.can_transition_to(to),
            "invalid call transition {from:?} -> {to:?}"
        );
        session.state = to;
        tracing::info!("call {}: {:?} -> {:?}", session.call_id, from, to);
        let _ = self.updates.send(CallUpdate::Transition {
            call_id: session.call_id,
            from,
            to,
        });
    }

    /// Clears everything the call accumulated and rests in `Idle`.
    fn return_to_idle(&self, session: &mut CallSession) {
        if session.state == CallState::Ending {
            self.transition(session, CallState::Ended);
        }
        session.cancel.cancel();
        session.transcript.clear();
        session.started_at = None;
        session.conversation_id = None;
        session.project = None;
        session.end_in_flight = false;
        self.transition(session, CallState::Idle);
    }

    fn check_preconditions(&self, project: Option<&Project>) -> Result<Project, PreconditionError> {
        if !self.context.is_authenticated() {
            return Err(PreconditionError::NotAuthenticated);
        }
        let balance = self
            .context
            .credits()
            .ok_or(PreconditionError::ProfileNotLoaded)?;
        let project = project.ok_or(PreconditionError::ProjectNotLoaded)?;
        let required = self.settings.min_start_balance;
        if balance < required {
            return Err(PreconditionError::InsufficientCredits { balance, required });
        }
        Ok(project.clone())
    }

    /// Begins a call for `project`. Returns once the transport is starting;
    /// the transition to `Connected` arrives later as a transport event.
    pub async fn start_call(&self, project: Option<&Project>) -> Result<(), CallError> {
        let (call_id, cancel, project) = {
            let mut session = self.session();
            if session.state != CallState::Idle {
                tracing::warn!(
                    "start ignored: call {} is {:?}",
                    session.call_id,
                    session.state
                );
                return Err(CallError::CallInProgress);
            }
            session.last_error = None;
            session.termination_reason = None;
            session.last_outcome = None;
            let project = match self.check_preconditions(project) {
                Ok(project) => project,
                Err(e) => {
                    tracing::warn!("cannot start call: {}", e);
                    session.last_error = Some(e.clone().into());
                    return Err(e.into());
                }
            };
            session.call_id += 1;
            session.cancel = CancellationToken::new();
            session.project = Some(project.clone());
            self.transition(&mut session, CallState::Connecting);
            (session.call_id, session.cancel.clone(), project)
        };

        let result = self.bring_up(call_id, &cancel, &project).await;
        let superseded = {
            let session = self.session();
            session.call_id == call_id && session.state == CallState::Idle
        };
        if superseded {
            // Closed while the transport was starting; a session it opened is now orphaned.
            tracing::warn!("call {} was closed during bring-up", call_id);
            self.stop_transport().await;
            return Err(result.err().unwrap_or(CallError::Cancelled));
        }
        if let Err(e) = result {
            self.abort_bring_up(call_id, &e).await;
            return Err(e);
        }
        Ok(())
    }

    async fn bring_up(
        &self,
        call_id: u64,
        cancel: &CancellationToken,
        project: &Project,
    ) -> Result<(), CallError> {
        cancellable(cancel, self.microphone.request_access())
            .await?
            .map_err(|e| PreconditionError::MicrophoneDenied(format!("{e:#}")))?;

        let token = cancellable(cancel, self.context.bearer_token()).await??;
        let briefing =
            cancellable(cancel, self.backend.fetch_briefing(&token, &project.project_id)).await??;
        let signed_url = cancellable(cancel, self.backend.fetch_agent_url(&token)).await??;

        let request = StartSession {
            target: ConnectionTarget::SignedUrl(signed_url),
            dynamic_variables: self.dynamic_variables(project, &briefing),
        };
        let sink = EventSink::new(call_id, self.events_tx.clone());
        tracing::info!(
            "call {}: starting voice session for project {}",
            call_id,
            project.project_id
        );
        cancellable(cancel, self.transport.start_session(request, sink))
            .await?
            .map_err(|e| CallError::Transport(format!("{e:#}")))
    }

    async fn abort_bring_up(&self, call_id: u64, error: &CallError) {
        let owned = {
            let mut session = self.session();
            if session.call_id != call_id || session.state != CallState::Connecting {
                false
            } else {
                tracing::error!("call {} failed to start: {}", call_id, error);
                let reason = matches!(error, CallError::Transport(_))
                    .then_some(TerminationReason::TransportError);
                self.fail_connecting(&mut session, error.clone(), reason);
                true
            }
        };
        if owned && matches!(error, CallError::Transport(_)) {
            self.stop_transport().await;
        }
    }

    /// Drops a call that never connected and reports it as aborted.
    fn fail_connecting(
        &self,
        session: &mut CallSession,
        error: CallError,
        reason: Option<TerminationReason>,
    ) {
        let call_id = session.call_id;
        session.last_error = Some(error);
        session.termination_reason = reason;
        session.last_outcome = Some(CallOutcome::Aborted);
        self.return_to_idle(session);
        let _ = self.updates.send(CallUpdate::Finished {
            call_id,
            reason,
            outcome: CallOutcome::Aborted,
        });
    }

    fn dynamic_variables(&self, project: &Project, briefing: &str) -> BTreeMap<String, String> {
        let balance = self.context.credits().unwrap_or_default();
        BTreeMap::from([
            (VAR_USER_NAME.to_string(), self.context.display_name()),
            (VAR_CREDIT_BALANCE.to_string(), balance.to_string()),
            (VAR_MEMORY_SUMMARY.to_string(), briefing.to_string()),
            (VAR_PROJECT_TITLE.to_string(), project.title.clone()),
            (
                VAR_PROJECT_DESCRIPTION.to_string(),
                project.description().to_string(),
            ),
            (
                VAR_PROJECT_KEY_POINTS.to_string(),
                project.key_points_text().to_string(),
            ),
            (
                VAR_AGENT_PERSONA.to_string(),
                persona_for(project.detected_use_case).to_string(),
            ),
        ])
    }

    /// Applies one transport event. Returns the outcome if the event ended the call.
    pub async fn handle_event(&self, event: CallEvent) -> Option<CallOutcome> {
        enum Next {
            Nothing,
            Abort,
            Conclude(TerminationReason),
        }

        let CallEvent { call_id, event } = event;
        let next = {
            let mut session = self.session();
            if session.call_id != call_id {
                tracing::debug!("dropping event for stale call {}: {:?}", call_id, event);
                return None;
            }
            match (session.state, event) {
                (CallState::Connecting, TransportEvent::Connected { conversation_id }) => {
                    session.started_at = Some(Instant::now());
                    session.conversation_id = conversation_id;
                    session.last_error = None;
                    session.termination_reason = None;
                    session.transcript.clear();
                    self.transition(&mut session, CallState::Connected);
                    Next::Nothing
                }
                (CallState::Connected, TransportEvent::Message { source, text }) => {
                    session.transcript.append(TranscriptTurn::new(source, text));
                    Next::Nothing
                }
                (CallState::Connecting, TransportEvent::Error { message }) => {
                    tracing::error!("call {}: transport error while connecting: {}", call_id, message);
                    self.fail_connecting(
                        &mut session,
                        CallError::Transport(message),
                        Some(TerminationReason::TransportError),
                    );
                    Next::Abort
                }
                (CallState::Connecting, TransportEvent::Disconnected { reason }) => {
                    let message = reason.unwrap_or_else(|| {
                        "the connection closed before the agent answered".to_string()
                    });
                    tracing::error!("call {}: {}", call_id, message);
                    self.fail_connecting(
                        &mut session,
                        CallError::Transport(message),
                        Some(TerminationReason::TransportError),
                    );
                    Next::Abort
                }
                (CallState::Connected, TransportEvent::Error { message }) => {
                    tracing::error!("call {}: transport error: {}", call_id, message);
                    session.last_error = Some(CallError::Transport(message));
                    Next::Conclude(TerminationReason::TransportError)
                }
                (CallState::Connected, TransportEvent::Disconnected { reason }) => {
                    tracing::info!("call {}: remote hangup ({:?})", call_id, reason);
                    Next::Conclude(TerminationReason::RemoteHangup)
                }
                (state, event) => {
                    tracing::debug!("call {}: dropping {:?} while {:?}", call_id, event, state);
                    Next::Nothing
                }
            }
        };

        match next {
            Next::Nothing => None,
            Next::Abort => {
                self.stop_transport().await;
                Some(CallOutcome::Aborted)
            }
            Next::Conclude(reason) => self.conclude(call_id, reason).await,
        }
    }

    /// Polls the credit meter. Ends and saves the call once the projected cost
    /// reaches the cached balance.
    pub async fn check_credits(&self) -> Option<CallOutcome> {
        let call_id = {
            let session = self.session();
            if session.state != CallState::Connected || session.end_in_flight {
                return None;
            }
            let elapsed = session.started_at?.elapsed();
            let balance = self.context.credits().unwrap_or_default();
            if !self.settings.meter.should_terminate(balance, elapsed) {
                return None;
            }
            tracing::warn!(
                "call {}: {} credits projected after {}s, balance is {}; ending call",
                session.call_id,
                self.settings.meter.projected_credits(elapsed),
                elapsed.as_secs(),
                balance
            );
            session.call_id
        };
        self.conclude(call_id, TerminationReason::CreditsExhausted).await
    }

    /// Ends the call and saves it. Returns `None` if another end is already in flight.
    pub async fn end_call(&self) -> Result<Option<CallOutcome>, CallError> {
        let call_id = {
            let session = self.session();
            match session.state {
                CallState::Idle | CallState::Ended => return Err(CallError::NoActiveCall),
                CallState::Connecting => None,
                CallState::Connected | CallState::Ending => Some(session.call_id),
            }
        };
        match call_id {
            Some(call_id) => Ok(self.conclude(call_id, TerminationReason::UserEnded).await),
            None => self
                .discard(TerminationReason::UserEnded)
                .await
                .map(Some),
        }
    }

    /// Tears the call down without saving. Cancels a save that is still waiting on the backend.
    pub async fn force_close(&self, confirmed: bool) -> Result<CallOutcome, CallError> {
        if !confirmed {
            return Err(CallError::ConfirmationRequired);
        }
        self.discard(TerminationReason::ForceClosed).await
    }

    async fn discard(&self, reason: TerminationReason) -> Result<CallOutcome, CallError> {
        let (call_id, outcome) = {
            let mut session = self.session();
            let outcome = match session.state {
                CallState::Idle | CallState::Ended => return Err(CallError::NoActiveCall),
                CallState::Ending => {
                    // The owner of the teardown sees the cancellation and resets the session.
                    tracing::warn!("call {}: abandoning teardown in flight", session.call_id);
                    session.termination_reason = Some(reason);
                    session.cancel.cancel();
                    return Ok(CallOutcome::Discarded);
                }
                CallState::Connecting => CallOutcome::Aborted,
                CallState::Connected => CallOutcome::Discarded,
            };
            session.end_in_flight = true;
            session.termination_reason = Some(reason);
            session.cancel.cancel();
            self.transition(&mut session, CallState::Ending);
            (session.call_id, outcome)
        };
        self.stop_transport().await;
        self.finish(call_id, outcome.clone());
        Ok(outcome)
    }

    /// Runs the save path once per call. The first caller moves the session to
    /// `Ending` and owns the teardown.
    async fn conclude(&self, call_id: u64, reason: TerminationReason) -> Option<CallOutcome> {
        let (finished, cancel) = {
            let mut session = self.session();
            if session.call_id != call_id
                || session.state != CallState::Connected
                || session.end_in_flight
            {
                tracing::debug!("call {}: end already in flight", call_id);
                return None;
            }
            session.end_in_flight = true;
            session.termination_reason = Some(reason);
            self.transition(&mut session, CallState::Ending);
            let duration = session
                .started_at
                .map(|t| t.elapsed())
                .unwrap_or_default();
            let transcript = session.transcript.render();
            let finished = session.project.as_ref().map(|p| FinishedSession {
                project_id: p.project_id.clone(),
                duration,
                transcript,
            });
            (finished, session.cancel.clone())
        };
        tracing::info!("call {}: ending ({})", call_id, reason);

        self.stop_transport().await;

        let outcome = match finished {
            None => CallOutcome::Discarded,
            Some(finished) => tokio::select! {
                biased;
                _ = cancel.cancelled() => CallOutcome::Discarded,
                result = self.finalizer.finalize(finished) => match result {
                    Ok(FinalizeOutcome::Saved(receipt)) => CallOutcome::Saved(receipt),
                    Ok(FinalizeOutcome::Skipped(reason)) => CallOutcome::Skipped(reason),
                    Err(e) => CallOutcome::SaveFailed(e),
                },
            },
        };
        self.finish(call_id, outcome.clone());
        Some(outcome)
    }

    /// Settles `Ending` into `Idle`, unless the call was already reset.
    fn finish(&self, call_id: u64, outcome: CallOutcome) {
        let mut session = self.session();
        if session.call_id != call_id || session.state != CallState::Ending {
            return;
        }
        if let CallOutcome::SaveFailed(e) = &outcome {
            session.last_error = Some(CallError::Finalize(e.clone()));
        }
        session.last_outcome = Some(outcome.clone());
        let reason = session.termination_reason;
        self.return_to_idle(&mut session);
        tracing::info!("call {} finished: {:?}", call_id, outcome);
        let _ = self.updates.send(CallUpdate::Finished {
            call_id,
            reason,
            outcome,
        });
    }

    async fn stop_transport(&self) {
        match tokio::time::timeout(self.settings.stop_timeout, self.transport.end_session()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("failed to stop voice session: {:#}", e),
            Err(_) => tracing::warn!(
                "stopping voice session timed out after {:?}",
                self.settings.stop_timeout
            ),
        }
    }

    /// The control loop: applies transport events in arrival order and polls
    /// the credit meter while a call is connected.
    pub async fn run(&self, mut events: mpsc::Receiver<CallEvent>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(
            self.settings.meter.poll_interval().max(Duration::from_secs(1)),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("call controller shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle_event(event).await;
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    self.check_credits().await;
                }
            }
        }
    }
}

async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, CallError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CallError::Cancelled),
        output = fut => Ok(output),
    }
}
