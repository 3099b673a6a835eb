//! Session arena, timers and the token-source loop
//!
//! Sessions live in a [`DashMap`] keyed by [`SessionId`]; callers only ever
//! hold ids. Each slot owns the session behind a mutex, a
//! [`CancellationToken`] and the per-session timer tasks. Timers are held as
//! [`AbortOnDropHandle`]s, so dropping them (on any terminal transition or on
//! removal) stops them.

use crate::assembler::AssemblyUpdate;
use crate::budget::{ContextBudgeter, ContextWindow};
use crate::chunk::StreamChunk;
use crate::config::{BudgetConfig, StreamConfig};
use crate::error::SessionError;
use crate::recovery::{ErrorContext, RecoveryDecision};
use crate::session::StreamingSession;
use crate::source::TokenSource;
use crate::state::{StreamState, StreamStatus};
use chrono::Utc;
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use sde_buffer::{EngineEvent, EventSink, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

/// Parameters for a new session
#[derive(Debug, Clone, Default)]
pub struct SessionRequest {
    pub windows: Vec<ContextWindow>,
    /// Context budget; the configured default when `None`
    pub max_context_tokens: Option<usize>,
    /// Expected chunk count, when known
    pub total_chunks: Option<u64>,
}

impl SessionRequest {
    #[inline]
    #[must_use]
    pub fn new(windows: Vec<ContextWindow>) -> Self {
        Self {
            windows,
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn with_max_context_tokens(mut self, tokens: usize) -> Self {
        self.max_context_tokens = Some(tokens);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_total_chunks(mut self, total: u64) -> Self {
        self.total_chunks = Some(total);
        self
    }
}

struct SessionSlot {
    session: Arc<Mutex<StreamingSession>>,
    token: CancellationToken,
    resumed: Arc<Notify>,
    timers: Vec<AbortOnDropHandle<()>>,
}

#[derive(Clone)]
struct SlotHandle {
    session: Arc<Mutex<StreamingSession>>,
    token: CancellationToken,
    resumed: Arc<Notify>,
}

/// Owns every live session
pub struct SessionManager {
    sessions: Arc<DashMap<SessionId, SessionSlot>>,
    config: StreamConfig,
    budgeter: ContextBudgeter,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    #[must_use]
    pub fn new(config: StreamConfig, budget: BudgetConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            config,
            budgeter: ContextBudgeter::new(budget),
            sink,
        }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Budget the context and start an idle session with its timers
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// `Budget` if the windows cannot be fit into the context budget
    pub fn create_session(&self, request: SessionRequest) -> Result<SessionId, SessionError> {
        let budget_config = self.budgeter.config();
        let max_tokens = request
            .max_context_tokens
            .unwrap_or(budget_config.max_context_tokens);
        let outcome = self.budgeter.optimize(request.windows, max_tokens)?;

        let session_id = SessionId::new();
        if outcome.was_optimized() {
            self.sink.emit(EngineEvent::ContextOptimized {
                session_id,
                original_tokens: outcome.original_tokens,
                optimized_tokens: outcome.total_tokens,
                removed: outcome.removed.len(),
                truncated: outcome.truncated.len(),
            });
        }
        let window_count = outcome.windows.len();
        let session = StreamingSession::new(
            session_id,
            &self.config,
            budget_config.chars_per_token,
            outcome.windows,
            Arc::clone(&self.sink),
        )
        .with_total_chunks(request.total_chunks);

        let handle = SlotHandle {
            session: Arc::new(Mutex::new(session)),
            token: CancellationToken::new(),
            resumed: Arc::new(Notify::new()),
        };
        let timers = self.spawn_timers(session_id, &handle);
        self.sessions.insert(
            session_id,
            SessionSlot {
                session: handle.session,
                token: handle.token,
                resumed: handle.resumed,
                timers,
            },
        );

        tracing::info!(%session_id, windows = window_count, tokens = outcome.total_tokens, "session created");
        self.sink.emit(EngineEvent::StreamingSessionCreated {
            session_id,
            window_count,
            context_tokens: outcome.total_tokens,
        });
        Ok(session_id)
    }

    fn spawn_timers(&self, session_id: SessionId, handle: &SlotHandle) -> Vec<AbortOnDropHandle<()>> {
        let heartbeat = {
            let session = Arc::clone(&handle.session);
            let token = handle.token.clone();
            let period = self.config.heartbeat_interval().max(Duration::from_millis(1));
            tokio::spawn(async move {
                let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticks.tick() => {
                            let session = session.lock();
                            if session.status().is_terminal() {
                                break;
                            }
                            session.heartbeat();
                        }
                    }
                }
            })
        };

        let soft = {
            let session = Arc::clone(&handle.session);
            let token = handle.token.clone();
            let after = self.config.soft_timeout();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(after) => {
                        let mut session = session.lock();
                        if !session.status().is_terminal() {
                            session.timeout_warning(u64::try_from(after.as_millis()).unwrap_or(u64::MAX));
                        }
                    }
                }
            })
        };

        let hard = {
            let session = Arc::clone(&handle.session);
            let sessions = Arc::clone(&self.sessions);
            let token = handle.token.clone();
            let after = self.config.hard_timeout();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(after) => {
                        let status = {
                            let mut session = session.lock();
                            session.fail_terminal(ErrorContext::ChunkProcessing, "hard timeout");
                            session.status()
                        };
                        settle(&sessions, session_id, status);
                    }
                }
            })
        };

        vec![
            AbortOnDropHandle::new(heartbeat),
            AbortOnDropHandle::new(soft),
            AbortOnDropHandle::new(hard),
        ]
    }

    fn handle(&self, session_id: SessionId) -> Result<SlotHandle, SessionError> {
        self.sessions
            .get(&session_id)
            .map(|slot| SlotHandle {
                session: Arc::clone(&slot.session),
                token: slot.token.clone(),
                resumed: Arc::clone(&slot.resumed),
            })
            .ok_or(SessionError::NotFound(session_id))
    }

    fn settle(&self, session_id: SessionId, status: StreamStatus) {
        settle(&self.sessions, session_id, status);
    }

    /// Feed one raw fragment through the session's coalescer
    ///
    /// # Errors
    /// `NotFound`, `InvalidState`, or `OutputLimitExceeded`
    pub fn process_stream_chunk(
        &self,
        session_id: SessionId,
        fragment: &str,
        metadata: IndexMap<String, serde_json::Value>,
    ) -> Result<Option<AssemblyUpdate>, SessionError> {
        let handle = self.handle(session_id)?;
        let (result, status) = {
            let mut session = handle.session.lock();
            let result = session.process_fragment(fragment, metadata);
            (result, session.status())
        };
        self.settle(session_id, status);
        result
    }

    /// Process an already built chunk
    ///
    /// # Errors
    /// `NotFound`, `InvalidState`, or `OutputLimitExceeded`
    pub fn process_chunk(&self, session_id: SessionId, chunk: StreamChunk) -> Result<AssemblyUpdate, SessionError> {
        let handle = self.handle(session_id)?;
        let (result, status) = {
            let mut session = handle.session.lock();
            let result = session.process_chunk(chunk);
            (result, session.status())
        };
        self.settle(session_id, status);
        result
    }

    /// # Errors
    /// `NotFound` for an unknown id
    pub fn pause(&self, session_id: SessionId) -> Result<bool, SessionError> {
        let handle = self.handle(session_id)?;
        let paused = handle.session.lock().pause();
        Ok(paused)
    }

    /// # Errors
    /// `NotFound` for an unknown id
    pub fn resume(&self, session_id: SessionId) -> Result<bool, SessionError> {
        let handle = self.handle(session_id)?;
        let resumed = handle.session.lock().resume();
        if resumed {
            handle.resumed.notify_one();
        }
        Ok(resumed)
    }

    /// Cancel the session and its driver; false if already terminal
    ///
    /// # Errors
    /// `NotFound` for an unknown id
    pub fn cancel(&self, session_id: SessionId, reason: &str) -> Result<bool, SessionError> {
        let handle = self.handle(session_id)?;
        let (cancelled, status) = {
            let mut session = handle.session.lock();
            (session.cancel(reason), session.status())
        };
        self.settle(session_id, status);
        Ok(cancelled)
    }

    /// Finalize the session's content
    ///
    /// # Errors
    /// `NotFound`, or `InvalidState` if already terminal
    pub fn complete(&self, session_id: SessionId) -> Result<String, SessionError> {
        let handle = self.handle(session_id)?;
        let (result, status) = {
            let mut session = handle.session.lock();
            (session.complete(), session.status())
        };
        self.settle(session_id, status);
        result
    }

    /// Route an error through the session's recovery
    ///
    /// # Errors
    /// `NotFound` for an unknown id
    pub fn fail(
        &self,
        session_id: SessionId,
        context: ErrorContext,
        message: &str,
    ) -> Result<RecoveryDecision, SessionError> {
        let handle = self.handle(session_id)?;
        let (decision, status) = {
            let mut session = handle.session.lock();
            (session.fail(context, message), session.status())
        };
        self.settle(session_id, status);
        Ok(decision)
    }

    /// Snapshot of the session state
    ///
    /// # Errors
    /// `NotFound` for an unknown id
    pub fn state(&self, session_id: SessionId) -> Result<StreamState, SessionError> {
        Ok(self.handle(session_id)?.session.lock().state().clone())
    }

    /// Budgeted context windows of the session
    ///
    /// # Errors
    /// `NotFound` for an unknown id
    pub fn windows(&self, session_id: SessionId) -> Result<Vec<ContextWindow>, SessionError> {
        Ok(self.handle(session_id)?.session.lock().windows().to_vec())
    }

    /// Drop a session and its timers, returning its last state
    pub fn remove(&self, session_id: SessionId) -> Option<StreamState> {
        self.sessions.remove(&session_id).map(|(_, slot)| {
            slot.token.cancel();
            let state = slot.session.lock().state().clone();
            state
        })
    }

    /// Remove terminal sessions older than the retention window
    pub fn cleanup_expired(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention()).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let session = entry.session.lock();
                let finished = session.state().completed_at?;
                (session.status().is_terminal() && now - finished >= retention).then_some(*entry.key())
            })
            .collect();
        for id in &expired {
            self.remove(*id);
        }
        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), "expired sessions cleaned up");
        }
        expired.len()
    }

    async fn wait_while_paused(&self, handle: &SlotHandle) {
        loop {
            let paused = handle.session.lock().status() == StreamStatus::Paused;
            if !paused {
                return;
            }
            tokio::select! {
                _ = handle.token.cancelled() => return,
                _ = handle.resumed.notified() => {}
            }
        }
    }

    fn stopped(handle: &SlotHandle) -> SessionError {
        let session = handle.session.lock();
        SessionError::Cancelled(session.stop_reason().unwrap_or("cancelled").to_string())
    }

    /// Complete the session, backing off between completion retries
    async fn finish(&self, session_id: SessionId, handle: &SlotHandle) -> Result<String, SessionError> {
        loop {
            let error = match self.complete(session_id) {
                Ok(content) => return Ok(content),
                Err(error) => error,
            };
            let delay = {
                let session = handle.session.lock();
                if session.status().is_terminal() {
                    return Err(error);
                }
                session.retry_delay(ErrorContext::SessionCompletion, &error.to_string())
            };
            tokio::select! {
                _ = handle.token.cancelled() => return Err(Self::stopped(handle)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Pull fragments from `source` until it ends, then complete the session
    ///
    /// Cancellation is checked between fragments; a fragment already pulled
    /// is processed before the loop exits. Transport errors are retried with
    /// backoff until the recovery budget is exhausted.
    ///
    /// # Errors
    /// `Cancelled` when the session is cancelled or times out,
    /// `RetriesExhausted` after repeated transport or completion failures,
    /// and any error
    /// from chunk processing
    pub async fn drive<S>(&self, session_id: SessionId, mut source: S) -> Result<String, SessionError>
    where
        S: TokenSource,
    {
        let handle = self.handle(session_id)?;
        loop {
            if handle.token.is_cancelled() {
                return Err(Self::stopped(&handle));
            }
            let next = tokio::select! {
                biased;
                _ = handle.token.cancelled() => continue,
                next = source.next_fragment() => next,
            };
            match next {
                None => return self.finish(session_id, &handle).await,
                Some(Ok(fragment)) => {
                    self.wait_while_paused(&handle).await;
                    let status = handle.session.lock().status();
                    if status.is_terminal() {
                        return Err(Self::stopped(&handle));
                    }
                    self.process_stream_chunk(session_id, &fragment.text, fragment.metadata)?;
                }
                Some(Err(error)) => match self.fail(session_id, ErrorContext::ChunkProcessing, &error.message)? {
                    RecoveryDecision::Retry { delay, .. } => {
                        tokio::select! {
                            _ = handle.token.cancelled() => {}
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    RecoveryDecision::Exhausted { attempts } => {
                        return Err(SessionError::RetriesExhausted {
                            context: ErrorContext::ChunkProcessing,
                            attempts,
                            message: error.message,
                        });
                    }
                },
            }
        }
    }
}

/// Stop timers and wake waiters once the session is terminal
fn settle(sessions: &DashMap<SessionId, SessionSlot>, session_id: SessionId, status: StreamStatus) {
    if !status.is_terminal() {
        return;
    }
    if let Some(mut slot) = sessions.get_mut(&session_id) {
        slot.timers.clear();
        slot.token.cancel();
        slot.resumed.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::SourceType;
    use crate::source::VecSource;
    use sde_buffer::NullSink;

    fn manager(config: StreamConfig) -> SessionManager {
        SessionManager::new(config, BudgetConfig::default(), Arc::new(NullSink))
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let manager = manager(StreamConfig::default());
        let id = SessionId::new();
        assert_eq!(manager.state(id), Err(SessionError::NotFound(id)));
        assert!(manager.remove(id).is_none());
    }

    #[tokio::test]
    async fn drive_assembles_and_completes() {
        let manager = manager(StreamConfig::default());
        let id = manager
            .create_session(SessionRequest::new(vec![ContextWindow::new(
                "sys",
                SourceType::System,
                100,
                "You edit code.",
                4,
            )]))
            .unwrap();
        let content = manager
            .drive(id, VecSource::new(["fn main() ", "{\n", "  run();\n", "}\n"]))
            .await
            .unwrap();
        assert_eq!(content, "fn main() {\n  run();\n}");
        let state = manager.state(id).unwrap();
        assert_eq!(state.status, StreamStatus::Completed);
        assert_eq!(state.processed_chunks, 4);
        assert_eq!(manager.windows(id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_session_stops_driver() {
        let manager = manager(StreamConfig::default());
        let id = manager.create_session(SessionRequest::default()).unwrap();
        assert!(manager.cancel(id, "user abort").unwrap());
        let err = manager.drive(id, VecSource::new(["a"])).await.unwrap_err();
        assert_eq!(err, SessionError::Cancelled("user abort".into()));
        assert!(!manager.cancel(id, "again").unwrap());
    }

    #[tokio::test]
    async fn cleanup_removes_only_terminal_sessions() {
        let manager = manager(StreamConfig::default().with_retention(Duration::ZERO));
        let done = manager.create_session(SessionRequest::default()).unwrap();
        let live = manager.create_session(SessionRequest::default()).unwrap();
        manager.complete(done).unwrap();
        assert_eq!(manager.cleanup_expired(), 1);
        assert!(manager.state(done).is_err());
        assert!(manager.state(live).is_ok());
    }
}
