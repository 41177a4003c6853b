//! Capture-analyze orchestrator
//!
//! Drives one remote analysis call per capture session and resolves it into
//! exactly one terminal [`Outcome`], staying correct when the host process is
//! backgrounded and resumed while the call is in flight.
//!
//! Network completion and lifecycle events race on a single gate: the
//! `has_responded` flag inside the session state, which is only read and
//! written while holding the state mutex. Whoever flips it first decides the
//! outcome; everything after is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classifier::classify;
use crate::config::OrchestratorConfig;
use crate::outcome::{AnalysisSummary, Outcome, SessionPhase};
use crate::ports::analysis::{AnalysisClient, CapturedImage, TransportError};
use crate::ports::history::HistoryRecorder;
use crate::ports::lifecycle::{LifecycleEvent, LifecycleSignal};
use crate::ports::usage::UsageGate;
use crate::prompt::AnalysisPrompt;
use crate::session::{CaptureSession, SessionId};

/// Default tolerance between backgrounding and resume
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(2000);

/// Default number of re-issued calls after an interruption
pub const DEFAULT_RESUME_RETRIES: u32 = 1;

/// Runtime settings for the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// A resume later than this after backgrounding cancels the session
    pub grace_period: Duration,
    /// How many times an interrupted call is re-issued on resume
    pub resume_retries: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            resume_retries: DEFAULT_RESUME_RETRIES,
        }
    }
}

impl From<&OrchestratorConfig> for OrchestratorSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            grace_period: Duration::from_millis(config.grace_period_ms),
            resume_retries: config.resume_retries,
        }
    }
}

/// Errors returned by [`CaptureAnalyzeOrchestrator::start`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    /// An unresolved session already owns the analysis call
    #[error("Session {active} is still in flight, ignoring start of {requested}")]
    AlreadyInFlight {
        active: SessionId,
        requested: SessionId,
    },

    /// The session has already produced its outcome
    #[error("Session {0} has already resolved")]
    AlreadyResolved(SessionId),
}

/// Handle for observing the outcome of one session
///
/// Backed by a watch channel, so a watcher created after resolution still
/// sees the outcome.
#[derive(Debug)]
pub struct OutcomeWatcher {
    session_id: SessionId,
    rx: watch::Receiver<SessionPhase>,
}

impl OutcomeWatcher {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Current phase of the watched session
    pub fn phase(&self) -> SessionPhase {
        self.rx.borrow().clone()
    }

    /// Waits for the next phase change
    ///
    /// Returns `None` once the session has been replaced.
    pub async fn changed(&mut self) -> Option<SessionPhase> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Waits for the terminal outcome
    ///
    /// Returns `None` if the session was dropped without resolving.
    pub async fn wait(mut self) -> Option<Outcome> {
        loop {
            let outcome = self.rx.borrow_and_update().outcome().cloned();
            if outcome.is_some() {
                return outcome;
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

struct SessionState {
    session: CaptureSession,
    phase: SessionPhase,
    /// Terminal emission gate
    has_responded: bool,
    backgrounded_at: Option<Instant>,
    retries_left: u32,
    /// True while an analysis call has not reported back
    call_active: bool,
    cancel_token: CancellationToken,
    task: Option<JoinHandle<()>>,
    /// Tasks of replaced sessions still running their side effects
    draining: Vec<JoinHandle<()>>,
    phase_tx: watch::Sender<SessionPhase>,
}

impl SessionState {
    fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase.clone();
        self.phase_tx.send_replace(phase);
    }

    /// Closes the gate and publishes the outcome. Returns false if the gate
    /// was already closed.
    fn resolve(&mut self, outcome: Outcome) -> bool {
        if self.has_responded {
            return false;
        }
        self.has_responded = true;
        self.backgrounded_at = None;
        self.set_phase(SessionPhase::Resolved(outcome));
        true
    }
}

struct Shared<A, U, H>
where
    A: AnalysisClient + ?Sized,
    U: UsageGate + ?Sized,
    H: HistoryRecorder + ?Sized,
{
    client: Arc<A>,
    usage: Arc<U>,
    history: Arc<H>,
    prompt: AnalysisPrompt,
    settings: OrchestratorSettings,
    state: Mutex<Option<SessionState>>,
}

impl<A, U, H> Shared<A, U, H>
where
    A: AnalysisClient + ?Sized + 'static,
    U: UsageGate + ?Sized + 'static,
    H: HistoryRecorder + ?Sized + 'static,
{
    fn lock(&self) -> MutexGuard<'_, Option<SessionState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_call(
        self: &Arc<Self>,
        id: SessionId,
        image: CapturedImage,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let shared = Arc::clone(self);

        tokio::spawn(async move {
            let raw = tokio::select! {
                biased;
                _ = token.cancelled() => Err(TransportError::cancelled()),
                result = shared.client.analyze(&image, &shared.prompt) => result,
            };

            let outcome = classify(raw);
            shared.complete(id, &image, outcome).await;
        })
    }

    async fn complete(&self, id: SessionId, image: &CapturedImage, outcome: Outcome) {
        {
            let mut guard = self.lock();
            let Some(state) = guard.as_mut().filter(|s| s.session.id() == id) else {
                debug!(session_id = %id, outcome = outcome.name(), "Completion for replaced session dropped");
                return;
            };

            state.call_active = false;

            if state.has_responded {
                debug!(session_id = %id, outcome = outcome.name(), "Late completion dropped");
                return;
            }

            if let Outcome::TransientInterruption { kind } = outcome {
                info!(session_id = %id, kind = %kind, "Analysis interrupted, waiting for resume");
                state.set_phase(SessionPhase::Interrupted(kind));
                return;
            }

            state.resolve(outcome.clone());
            info!(session_id = %id, outcome = %outcome, "Analysis resolved");
        }

        if let Outcome::Success {
            summary,
            raw_payload,
        } = &outcome
        {
            self.record_success(id, image, summary, raw_payload).await;
        }
    }

    /// Usage first, then history. Both are best-effort.
    async fn record_success(
        &self,
        id: SessionId,
        image: &CapturedImage,
        summary: &AnalysisSummary,
        raw_payload: &str,
    ) {
        if let Err(e) = self.usage.record_success().await {
            warn!(session_id = %id, error = %e, "Failed to record usage");
        }

        match self
            .history
            .record(image, &summary.summary_text(), raw_payload)
            .await
        {
            Ok(()) => debug!(session_id = %id, "History entry recorded"),
            Err(e) => warn!(session_id = %id, error = %e, "Failed to record history"),
        }
    }

    fn handle_lifecycle(self: &Arc<Self>, event: LifecycleEvent) {
        let mut guard = self.lock();
        let Some(state) = guard.as_mut() else {
            debug!(event = %event, "Lifecycle event with no session");
            return;
        };

        let id = state.session.id();
        if state.has_responded {
            debug!(session_id = %id, event = %event, "Lifecycle event after resolution ignored");
            return;
        }

        match event {
            LifecycleEvent::Background => {
                if state.backgrounded_at.is_none() {
                    state.backgrounded_at = Some(Instant::now());
                    debug!(session_id = %id, "Session backgrounded");
                }
            }
            LifecycleEvent::Foreground => {
                let elapsed = state.backgrounded_at.take().map(|since| since.elapsed());

                if let Some(elapsed) = elapsed.filter(|e| *e > self.settings.grace_period) {
                    state.cancel_token.cancel();
                    state.resolve(Outcome::Cancelled);
                    info!(
                        session_id = %id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Resumed after grace period, session cancelled"
                    );
                    return;
                }

                self.resume_interrupted(state);
            }
        }
    }

    fn resume_interrupted(self: &Arc<Self>, state: &mut SessionState) {
        let SessionPhase::Interrupted(kind) = &state.phase else {
            return;
        };
        let id = state.session.id();

        if state.call_active {
            return;
        }
        if state.retries_left == 0 {
            debug!(session_id = %id, kind = %kind, "No resume retries left");
            return;
        }

        state.retries_left -= 1;
        state.call_active = true;
        state.set_phase(SessionPhase::InFlight);
        if let Some(previous) = state.task.take().filter(|task| !task.is_finished()) {
            state.draining.push(previous);
        }
        state.task = Some(self.spawn_call(
            id,
            state.session.image().clone(),
            state.cancel_token.clone(),
        ));
        info!(session_id = %id, retries_left = state.retries_left, "Re-issuing interrupted analysis");
    }
}

/// State machine owning the in-flight analysis of the active capture session
pub struct CaptureAnalyzeOrchestrator<A, U, H>
where
    A: AnalysisClient + ?Sized,
    U: UsageGate + ?Sized,
    H: HistoryRecorder + ?Sized,
{
    shared: Arc<Shared<A, U, H>>,
}

impl<A, U, H> Clone for CaptureAnalyzeOrchestrator<A, U, H>
where
    A: AnalysisClient + ?Sized,
    U: UsageGate + ?Sized,
    H: HistoryRecorder + ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A, U, H> CaptureAnalyzeOrchestrator<A, U, H>
where
    A: AnalysisClient + ?Sized + 'static,
    U: UsageGate + ?Sized + 'static,
    H: HistoryRecorder + ?Sized + 'static,
{
    /// Creates an orchestrator
    ///
    /// # Arguments
    /// * `client` - Remote analysis call
    /// * `usage` - Quota consumed on success
    /// * `history` - Store for successful analyses
    /// * `prompt` - Prompt sent with every image
    /// * `settings` - Grace period and resume retries
    pub fn new(
        client: Arc<A>,
        usage: Arc<U>,
        history: Arc<H>,
        prompt: AnalysisPrompt,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                client,
                usage,
                history,
                prompt,
                settings,
                state: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> OrchestratorSettings {
        self.shared.settings
    }

    /// Starts the analysis call for a session
    ///
    /// # Errors
    /// Returns `OrchestratorError::AlreadyInFlight` while another session is
    /// unresolved, and `OrchestratorError::AlreadyResolved` when restarting a
    /// finished session. Neither issues a second call.
    ///
    /// # Panics
    /// Must be called from within a tokio runtime.
    pub fn start(&self, session: CaptureSession) -> Result<(), OrchestratorError> {
        debug_assert!(
            !session.image().is_empty(),
            "capture session started with an empty image"
        );

        let mut guard = self.shared.lock();
        let requested = session.id();

        if let Some(current) = guard.as_ref() {
            let active = current.session.id();
            if !current.has_responded {
                warn!(active = %active, requested = %requested, "Analysis already in flight, ignoring start");
                return Err(OrchestratorError::AlreadyInFlight { active, requested });
            }
            if active == requested {
                warn!(session_id = %requested, "Session already resolved, ignoring start");
                return Err(OrchestratorError::AlreadyResolved(requested));
            }
        }

        let mut draining = Vec::new();
        if let Some(previous) = guard.take() {
            draining = previous.draining;
            draining.extend(previous.task);
            draining.retain(|task| !task.is_finished());
        }

        let cancel_token = CancellationToken::new();
        let (phase_tx, _) = watch::channel(SessionPhase::InFlight);
        let task = self.shared.spawn_call(
            requested,
            session.image().clone(),
            cancel_token.clone(),
        );

        info!(
            session_id = %requested,
            bytes = session.image().len(),
            media_type = %session.image().media_type,
            "Analysis started"
        );

        *guard = Some(SessionState {
            session,
            phase: SessionPhase::InFlight,
            has_responded: false,
            backgrounded_at: None,
            retries_left: self.shared.settings.resume_retries,
            call_active: true,
            cancel_token,
            task: Some(task),
            draining,
            phase_tx,
        });

        Ok(())
    }

    /// Feeds a foreground/background transition into the state machine
    ///
    /// Safe to call at any time, including with no session.
    pub fn on_lifecycle_event(&self, event: LifecycleEvent) {
        self.shared.handle_lifecycle(event);
    }

    /// Cancels the active session
    ///
    /// Returns true if this call resolved the session.
    pub fn cancel(&self) -> bool {
        let mut guard = self.shared.lock();
        let Some(state) = guard.as_mut() else {
            return false;
        };

        state.cancel_token.cancel();
        let resolved = state.resolve(Outcome::Cancelled);
        if resolved {
            info!(session_id = %state.session.id(), "Session cancelled");
        }
        resolved
    }

    /// Returns a watcher for the current session's outcome
    pub fn outcome(&self) -> Option<OutcomeWatcher> {
        let guard = self.shared.lock();
        guard.as_ref().map(|state| OutcomeWatcher {
            session_id: state.session.id(),
            rx: state.phase_tx.subscribe(),
        })
    }

    /// Phase of the current session
    pub fn phase(&self) -> Option<SessionPhase> {
        self.shared.lock().as_ref().map(|state| state.phase.clone())
    }

    /// Id of the current session, resolved or not
    pub fn current_session(&self) -> Option<SessionId> {
        self.shared.lock().as_ref().map(|state| state.session.id())
    }

    /// Waits until no analysis task is running, including success side
    /// effects of sessions replaced by a later `start`
    pub async fn settle(&self) {
        loop {
            let task = self
                .shared
                .lock()
                .as_mut()
                .and_then(|state| state.task.take().or_else(|| state.draining.pop()));

            let Some(task) = task else {
                break;
            };

            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("Analysis task panicked: {}", e);
                }
            }
        }
    }

    /// Forwards every event of a lifecycle source into this orchestrator
    ///
    /// The listener stops when the source closes or the orchestrator is
    /// dropped. Must be called from within a tokio runtime.
    pub fn attach<L>(&self, signal: &L) -> JoinHandle<()>
    where
        L: LifecycleSignal + ?Sized,
    {
        let mut rx = signal.subscribe();
        let shared = Arc::downgrade(&self.shared);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(shared) = shared.upgrade() else {
                            break;
                        };
                        shared.handle_lifecycle(event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Lifecycle listener lagged behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Lifecycle listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::OverloadCause;
    use crate::ports::analysis::{AnalysisPayload, TransportErrorKind};
    use crate::ports::history::HistoryError;
    use crate::ports::lifecycle::LifecycleBroadcaster;
    use crate::ports::usage::{Tier, UsageError};
    use crate::prompt::{PromptBuilder, DEFAULT_INSTRUCTION};
    use crate::session::SessionSequence;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    type Reply = Result<AnalysisPayload, TransportError>;
    type Journal = Arc<Mutex<Vec<&'static str>>>;

    const SUCCESS: &str =
        r#"{"noContent":false,"totalAmount":640,"confidence":7,"description":"burger"}"#;
    const NO_CONTENT: &str =
        r#"{"noContent":true,"totalAmount":0,"confidence":0,"description":""}"#;

    /// Client whose calls complete when the test sends on the queued channel.
    /// With nothing queued a call never completes.
    struct MockClient {
        replies: Mutex<VecDeque<oneshot::Receiver<Reply>>>,
        calls: AtomicUsize,
    }

    impl MockClient {
        fn new() -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn queue(&self) -> oneshot::Sender<Reply> {
            let (tx, rx) = oneshot::channel();
            self.replies.lock().unwrap().push_back(rx);
            tx
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnalysisClient for MockClient {
        async fn analyze(
            &self,
            _image: &CapturedImage,
            _prompt: &AnalysisPrompt,
        ) -> Result<AnalysisPayload, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.lock().unwrap().pop_front();
            match reply {
                Some(rx) => rx.await.unwrap_or_else(|_| {
                    Err(TransportError::new(
                        TransportErrorKind::ConnectionLost,
                        "reply dropped",
                    ))
                }),
                None => std::future::pending().await,
            }
        }
    }

    struct MockUsage {
        journal: Journal,
        recorded: AtomicUsize,
        should_fail: AtomicBool,
    }

    #[async_trait]
    impl UsageGate for MockUsage {
        async fn remaining(&self, _tier: Tier) -> Result<u32, UsageError> {
            Ok(10)
        }

        async fn record_success(&self) -> Result<(), UsageError> {
            self.journal.lock().unwrap().push("usage");
            if self.should_fail.load(Ordering::SeqCst) {
                return Err(UsageError::DatabaseError("disk full".to_string()));
            }
            self.recorded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockHistory {
        journal: Journal,
        entries: Mutex<Vec<(String, String)>>,
        should_fail: AtomicBool,
        /// When set, the next record waits for this before writing
        gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl HistoryRecorder for MockHistory {
        async fn record(
            &self,
            _image: &CapturedImage,
            summary: &str,
            raw_payload: &str,
        ) -> Result<(), HistoryError> {
            self.journal.lock().unwrap().push("history");
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if self.should_fail.load(Ordering::SeqCst) {
                return Err(HistoryError::DatabaseError("locked".to_string()));
            }
            self.entries
                .lock()
                .unwrap()
                .push((summary.to_string(), raw_payload.to_string()));
            Ok(())
        }
    }

    struct Harness {
        client: Arc<MockClient>,
        usage: Arc<MockUsage>,
        history: Arc<MockHistory>,
        journal: Journal,
        sequence: SessionSequence,
        orchestrator: CaptureAnalyzeOrchestrator<MockClient, MockUsage, MockHistory>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_settings(OrchestratorSettings::default())
        }

        fn with_settings(settings: OrchestratorSettings) -> Self {
            let journal: Journal = Arc::new(Mutex::new(Vec::new()));
            let client = Arc::new(MockClient::new());
            let usage = Arc::new(MockUsage {
                journal: Arc::clone(&journal),
                recorded: AtomicUsize::new(0),
                should_fail: AtomicBool::new(false),
            });
            let history = Arc::new(MockHistory {
                journal: Arc::clone(&journal),
                entries: Mutex::new(Vec::new()),
                should_fail: AtomicBool::new(false),
                gate: Mutex::new(None),
            });
            let prompt = PromptBuilder::build_analysis_prompt(DEFAULT_INSTRUCTION).unwrap();
            let orchestrator = CaptureAnalyzeOrchestrator::new(
                Arc::clone(&client),
                Arc::clone(&usage),
                Arc::clone(&history),
                prompt,
                settings,
            );

            Self {
                client,
                usage,
                history,
                journal,
                sequence: SessionSequence::new(),
                orchestrator,
            }
        }

        fn session(&self) -> CaptureSession {
            self.sequence
                .open(CapturedImage::new(vec![0xFFu8, 0xD8, 0xFF, 0xE0], "image/jpeg"))
                .unwrap()
        }

        fn usage_count(&self) -> usize {
            self.usage.recorded.load(Ordering::SeqCst)
        }

        fn history_count(&self) -> usize {
            self.history.entries.lock().unwrap().len()
        }

        fn resolved(&self) -> Option<Outcome> {
            self.orchestrator
                .phase()
                .and_then(|phase| phase.outcome().cloned())
        }
    }

    async fn run_pending() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn payload(text: &str) -> Reply {
        Ok(AnalysisPayload::new(text))
    }

    // === Lifecycle scenarios ===

    #[tokio::test(start_paused = true)]
    async fn test_short_background_then_success() {
        let h = Harness::new();
        let reply = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        run_pending().await;

        h.orchestrator.on_lifecycle_event(LifecycleEvent::Background);
        tokio::time::advance(Duration::from_secs(1)).await;
        h.orchestrator.on_lifecycle_event(LifecycleEvent::Foreground);
        assert_eq!(h.orchestrator.phase(), Some(SessionPhase::InFlight));

        reply.send(payload(SUCCESS)).unwrap();
        h.orchestrator.settle().await;

        match h.resolved() {
            Some(Outcome::Success { summary, .. }) => {
                assert_eq!(summary.total_amount, 640.0);
                assert_eq!(summary.description, "burger");
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(h.usage_count(), 1);
        assert_eq!(h.history_count(), 1);
        assert_eq!(h.history.entries.lock().unwrap()[0].0, "burger: 640");
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_background_cancels() {
        let h = Harness::new();
        let reply = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        run_pending().await;

        h.orchestrator.on_lifecycle_event(LifecycleEvent::Background);
        tokio::time::advance(Duration::from_secs(5)).await;
        h.orchestrator.on_lifecycle_event(LifecycleEvent::Foreground);

        assert_eq!(h.resolved(), Some(Outcome::Cancelled));

        h.orchestrator.settle().await;
        assert!(reply.is_closed(), "in-flight call should be abandoned");
        assert_eq!(h.usage_count(), 0);
        assert_eq!(h.history_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interruption_during_short_background_keeps_session_open() {
        let h = Harness::new();
        let first = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        run_pending().await;

        h.orchestrator.on_lifecycle_event(LifecycleEvent::Background);
        first
            .send(Err(TransportError::new(
                TransportErrorKind::ConnectionLost,
                "socket closed",
            )))
            .unwrap();
        run_pending().await;
        assert_eq!(
            h.orchestrator.phase(),
            Some(SessionPhase::Interrupted(TransportErrorKind::ConnectionLost))
        );

        tokio::time::advance(Duration::from_millis(800)).await;
        h.orchestrator.on_lifecycle_event(LifecycleEvent::Foreground);
        run_pending().await;

        assert_eq!(h.resolved(), None);
        assert_eq!(h.orchestrator.phase(), Some(SessionPhase::InFlight));
        assert_eq!(h.client.call_count(), 2);
        assert_eq!(h.usage_count(), 0);
        assert_eq!(h.history_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_connected_while_backgrounded_resumes_within_grace() {
        let h = Harness::new();
        let first = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        run_pending().await;

        h.orchestrator.on_lifecycle_event(LifecycleEvent::Background);
        first
            .send(Err(TransportError::new(
                TransportErrorKind::NotConnected,
                "network unreachable",
            )))
            .unwrap();
        run_pending().await;
        assert_eq!(
            h.orchestrator.phase(),
            Some(SessionPhase::Interrupted(TransportErrorKind::NotConnected))
        );

        tokio::time::advance(Duration::from_millis(500)).await;
        h.orchestrator.on_lifecycle_event(LifecycleEvent::Foreground);
        run_pending().await;

        assert_eq!(h.resolved(), None);
        assert_eq!(h.orchestrator.phase(), Some(SessionPhase::InFlight));
        assert_eq!(h.client.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumed_call_can_succeed() {
        let h = Harness::new();
        let first = h.client.queue();
        let second = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        run_pending().await;

        first
            .send(Err(TransportError::new(
                TransportErrorKind::NotConnected,
                "offline",
            )))
            .unwrap();
        run_pending().await;
        h.orchestrator.on_lifecycle_event(LifecycleEvent::Foreground);
        run_pending().await;

        second.send(payload(SUCCESS)).unwrap();
        h.orchestrator.settle().await;

        assert!(h.resolved().is_some_and(|o| o.is_success()));
        assert_eq!(h.usage_count(), 1);
        assert_eq!(h.history_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_resume_retries_stays_interrupted() {
        let h = Harness::with_settings(OrchestratorSettings {
            resume_retries: 0,
            ..OrchestratorSettings::default()
        });
        let first = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        run_pending().await;

        first
            .send(Err(TransportError::new(
                TransportErrorKind::ConnectionLost,
                "reset",
            )))
            .unwrap();
        run_pending().await;
        h.orchestrator.on_lifecycle_event(LifecycleEvent::Foreground);
        run_pending().await;

        assert_eq!(
            h.orchestrator.phase(),
            Some(SessionPhase::Interrupted(TransportErrorKind::ConnectionLost))
        );
        assert_eq!(h.client.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_is_overloaded_without_side_effects() {
        let h = Harness::new();
        let reply = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        run_pending().await;

        reply.send(payload("{\"noContent\": false, \"total")).unwrap();
        h.orchestrator.settle().await;

        assert_eq!(
            h.resolved(),
            Some(Outcome::ServiceOverloaded {
                cause: OverloadCause::MalformedPayload
            })
        );
        assert_eq!(h.usage_count(), 0);
        assert_eq!(h.history_count(), 0);
    }

    // === Grace window ===

    #[tokio::test(start_paused = true)]
    async fn test_resume_exactly_at_grace_does_not_cancel() {
        let h = Harness::new();
        let _reply = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();

        h.orchestrator.on_lifecycle_event(LifecycleEvent::Background);
        tokio::time::advance(DEFAULT_GRACE_PERIOD).await;
        h.orchestrator.on_lifecycle_event(LifecycleEvent::Foreground);

        assert_eq!(h.orchestrator.phase(), Some(SessionPhase::InFlight));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_just_past_grace_cancels() {
        let h = Harness::new();
        let _reply = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();

        h.orchestrator.on_lifecycle_event(LifecycleEvent::Background);
        tokio::time::advance(DEFAULT_GRACE_PERIOD + Duration::from_millis(1)).await;
        h.orchestrator.on_lifecycle_event(LifecycleEvent::Foreground);

        assert_eq!(h.resolved(), Some(Outcome::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_background_keeps_earliest_timestamp() {
        let h = Harness::new();
        let _reply = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();

        h.orchestrator.on_lifecycle_event(LifecycleEvent::Background);
        tokio::time::advance(Duration::from_millis(1500)).await;
        h.orchestrator.on_lifecycle_event(LifecycleEvent::Background);
        tokio::time::advance(Duration::from_millis(1000)).await;
        h.orchestrator.on_lifecycle_event(LifecycleEvent::Foreground);

        assert_eq!(h.resolved(), Some(Outcome::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_without_background_is_noop() {
        let h = Harness::new();
        let _reply = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        h.orchestrator.on_lifecycle_event(LifecycleEvent::Foreground);

        assert_eq!(h.orchestrator.phase(), Some(SessionPhase::InFlight));
    }

    #[tokio::test]
    async fn test_lifecycle_events_without_session_are_ignored() {
        let h = Harness::new();
        h.orchestrator.on_lifecycle_event(LifecycleEvent::Background);
        h.orchestrator.on_lifecycle_event(LifecycleEvent::Foreground);

        assert!(h.orchestrator.phase().is_none());
        assert!(h.orchestrator.outcome().is_none());
        assert_eq!(h.client.call_count(), 0);
    }

    // === Terminal emission gate ===

    #[tokio::test(start_paused = true)]
    async fn test_late_completion_after_cancel_is_dropped() {
        let h = Harness::new();
        let reply = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        run_pending().await;
        let mut watcher = h.orchestrator.outcome().unwrap();

        h.orchestrator.on_lifecycle_event(LifecycleEvent::Background);
        tokio::time::advance(Duration::from_secs(3)).await;
        h.orchestrator.on_lifecycle_event(LifecycleEvent::Foreground);

        // The abandoned call can no longer deliver
        assert!(reply.send(payload(SUCCESS)).is_err());
        h.orchestrator.settle().await;

        assert_eq!(
            watcher.changed().await,
            Some(SessionPhase::Resolved(Outcome::Cancelled))
        );
        assert_eq!(h.resolved(), Some(Outcome::Cancelled));
        assert_eq!(h.usage_count(), 0);
        assert_eq!(h.history_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_wins_over_later_long_resume() {
        let h = Harness::new();
        let reply = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        run_pending().await;

        h.orchestrator.on_lifecycle_event(LifecycleEvent::Background);
        reply.send(payload(NO_CONTENT)).unwrap();
        h.orchestrator.settle().await;

        tokio::time::advance(Duration::from_secs(10)).await;
        h.orchestrator.on_lifecycle_event(LifecycleEvent::Foreground);

        assert_eq!(h.resolved(), Some(Outcome::NoContent));
        assert!(!h.orchestrator.cancel());
    }

    #[tokio::test]
    async fn test_outcome_watcher_sees_outcome_once_resolved() {
        let h = Harness::new();
        let reply = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        let watcher = h.orchestrator.outcome().unwrap();

        reply.send(payload(NO_CONTENT)).unwrap();
        assert_eq!(watcher.wait().await, Some(Outcome::NoContent));

        // A watcher created after resolution still observes it
        let late = h.orchestrator.outcome().unwrap();
        assert_eq!(late.wait().await, Some(Outcome::NoContent));
    }

    // === start() idempotence ===

    #[tokio::test]
    async fn test_start_twice_issues_one_call() {
        let h = Harness::new();
        let _reply = h.client.queue();
        let session = h.session();

        h.orchestrator.start(session.clone()).unwrap();
        let err = h.orchestrator.start(session.clone()).unwrap_err();
        run_pending().await;

        assert_eq!(
            err,
            OrchestratorError::AlreadyInFlight {
                active: session.id(),
                requested: session.id(),
            }
        );
        assert_eq!(h.client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_start_other_session_while_in_flight_rejected() {
        let h = Harness::new();
        let _reply = h.client.queue();
        let first = h.session();
        let second = h.session();

        h.orchestrator.start(first.clone()).unwrap();
        let err = h.orchestrator.start(second).unwrap_err();
        run_pending().await;

        assert!(matches!(err, OrchestratorError::AlreadyInFlight { active, .. } if active == first.id()));
        assert_eq!(h.orchestrator.current_session(), Some(first.id()));
        assert_eq!(h.client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_resolved_session_rejected_new_session_accepted() {
        let h = Harness::new();
        let reply = h.client.queue();
        let first = h.session();

        h.orchestrator.start(first.clone()).unwrap();
        reply.send(payload(NO_CONTENT)).unwrap();
        h.orchestrator.settle().await;

        assert_eq!(
            h.orchestrator.start(first.clone()),
            Err(OrchestratorError::AlreadyResolved(first.id()))
        );

        let _next = h.client.queue();
        let second = h.session();
        h.orchestrator.start(second.clone()).unwrap();
        run_pending().await;

        assert_eq!(h.orchestrator.current_session(), Some(second.id()));
        assert_eq!(h.orchestrator.phase(), Some(SessionPhase::InFlight));
        assert_eq!(h.client.call_count(), 2);
    }

    // === Side effects ===

    #[tokio::test]
    async fn test_side_effects_only_on_success() {
        let replies: Vec<Reply> = vec![
            payload(NO_CONTENT),
            payload("not json"),
            Err(TransportError::new(TransportErrorKind::TimedOut, "60s")),
            Err(TransportError::new(TransportErrorKind::Overloaded, "529")),
        ];

        for reply in replies {
            let h = Harness::new();
            let tx = h.client.queue();
            h.orchestrator.start(h.session()).unwrap();
            tx.send(reply).unwrap();
            h.orchestrator.settle().await;

            let outcome = h.resolved().expect("session should resolve");
            assert!(!outcome.is_success());
            assert_eq!(h.usage_count(), 0, "outcome: {}", outcome);
            assert_eq!(h.history_count(), 0, "outcome: {}", outcome);
        }

        let h = Harness::new();
        let tx = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        tx.send(Err(TransportError::new(
            TransportErrorKind::Cancelled,
            "suspended",
        )))
        .unwrap();
        h.orchestrator.settle().await;
        assert!(h.resolved().is_none());
        assert_eq!(h.usage_count(), 0);

        let h = Harness::new();
        let _tx = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        assert!(h.orchestrator.cancel());
        h.orchestrator.settle().await;
        assert_eq!(h.resolved(), Some(Outcome::Cancelled));
        assert_eq!(h.usage_count(), 0);
        assert_eq!(h.history_count(), 0);
    }

    #[tokio::test]
    async fn test_usage_recorded_before_history() {
        let h = Harness::new();
        let reply = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        reply.send(payload(SUCCESS)).unwrap();
        h.orchestrator.settle().await;

        assert_eq!(*h.journal.lock().unwrap(), vec!["usage", "history"]);
    }

    #[tokio::test]
    async fn test_side_effect_failures_do_not_change_outcome() {
        let h = Harness::new();
        h.usage.should_fail.store(true, Ordering::SeqCst);
        h.history.should_fail.store(true, Ordering::SeqCst);

        let reply = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        let watcher = h.orchestrator.outcome().unwrap();
        reply.send(payload(SUCCESS)).unwrap();

        assert!(watcher.wait().await.is_some_and(|o| o.is_success()));
        h.orchestrator.settle().await;
        assert_eq!(*h.journal.lock().unwrap(), vec!["usage", "history"]);
    }

    #[test]
    #[should_panic(expected = "Tokio 1.x runtime")]
    fn test_start_outside_runtime_panics() {
        let h = Harness::new();
        let _ = h.orchestrator.start(h.session());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_waits_for_side_effects_of_replaced_session() {
        let h = Harness::new();
        let (release, gate) = oneshot::channel();
        *h.history.gate.lock().unwrap() = Some(gate);

        let first = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        first.send(payload(SUCCESS)).unwrap();
        run_pending().await;
        assert!(h.resolved().is_some_and(|o| o.is_success()));
        assert_eq!(h.history_count(), 0);

        let second = h.client.queue();
        h.orchestrator.start(h.session()).unwrap();
        second.send(payload(NO_CONTENT)).unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = release.send(());
        });

        h.orchestrator.settle().await;
        assert_eq!(h.resolved(), Some(Outcome::NoContent));
        assert_eq!(h.history_count(), 1);
        assert_eq!(h.usage_count(), 1);
    }

    // === Cancel and attach ===

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let h = Harness::new();
        let _reply = h.client.queue();
        assert!(!h.orchestrator.cancel());

        h.orchestrator.start(h.session()).unwrap();
        assert!(h.orchestrator.cancel());
        assert!(!h.orchestrator.cancel());
        assert_eq!(h.resolved(), Some(Outcome::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attached_signal_drives_lifecycle() {
        let h = Harness::new();
        let _reply = h.client.queue();
        let signal = LifecycleBroadcaster::new();
        let listener = h.orchestrator.attach(&signal);

        h.orchestrator.start(h.session()).unwrap();
        run_pending().await;

        signal.emit(LifecycleEvent::Background);
        run_pending().await;
        tokio::time::advance(Duration::from_secs(4)).await;
        signal.emit(LifecycleEvent::Foreground);
        run_pending().await;

        assert_eq!(h.resolved(), Some(Outcome::Cancelled));

        drop(signal);
        listener.await.unwrap();
    }

    #[test]
    fn test_settings_from_config() {
        let config = OrchestratorConfig {
            grace_period_ms: 3500,
            resume_retries: 2,
        };
        let settings = OrchestratorSettings::from(&config);
        assert_eq!(settings.grace_period, Duration::from_millis(3500));
        assert_eq!(settings.resume_retries, 2);
    }
}
