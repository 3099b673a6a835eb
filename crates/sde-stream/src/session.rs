//! One streaming session
//!
//! [`StreamingSession`] is the single owner of a session's [`StreamState`]:
//! it coalesces fragments, validates and assembles chunks, keeps the
//! counters and emits the per-chunk events. It is synchronous; the
//! [`SessionManager`](crate::manager::SessionManager) wraps it in a mutex and
//! supplies the timers and the token-source loop.

use crate::assembler::{AssemblyUpdate, ContentAssembler};
use crate::budget::ContextWindow;
use crate::chunk::StreamChunk;
use crate::coalesce::ChunkCoalescer;
use crate::config::StreamConfig;
use crate::error::SessionError;
use crate::recovery::{ErrorContext, RecoveryDecision, RecoveryManager};
use crate::state::{can_transition, StreamState, StreamStatus};
use crate::validator::PartialValidator;
use chrono::Utc;
use indexmap::IndexMap;
use sde_buffer::{EngineEvent, EventSink, SessionId};
use std::sync::Arc;
use tokio::time::Instant;

/// State, assembly and recovery for one session
#[derive(Debug)]
pub struct StreamingSession {
    state: StreamState,
    windows: Vec<ContextWindow>,
    assembler: ContentAssembler,
    coalescer: ChunkCoalescer,
    validator: PartialValidator,
    recovery: RecoveryManager,
    chars_per_token: usize,
    next_sequence: u64,
    started: Option<Instant>,
    stop_reason: Option<String>,
    sink: Arc<dyn EventSink>,
}

impl StreamingSession {
    /// New idle session over already budgeted `windows`
    #[must_use]
    pub fn new(
        session_id: SessionId,
        config: &StreamConfig,
        chars_per_token: usize,
        windows: Vec<ContextWindow>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let validator = PartialValidator::new(config.partial_imbalance_tolerance);
        Self {
            state: StreamState::new(session_id, config.max_output_tokens),
            windows,
            assembler: ContentAssembler::new(validator),
            coalescer: ChunkCoalescer::new(config.min_chunk_size),
            validator,
            recovery: RecoveryManager::new(config.max_retries, config.retry_base_delay()),
            chars_per_token: chars_per_token.max(1),
            next_sequence: 0,
            started: None,
            stop_reason: None,
            sink,
        }
    }

    /// Expected number of chunks, used for progress and ETA
    #[must_use]
    pub fn with_total_chunks(mut self, total: Option<u64>) -> Self {
        self.state.total_chunks = total;
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.state.session_id
    }

    #[inline]
    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.state.status
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Budgeted context the session was created with
    #[inline]
    #[must_use]
    pub fn windows(&self) -> &[ContextWindow] {
        &self.windows
    }

    /// Why the session stopped, for cancelled or failed sessions
    #[must_use]
    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    fn transition(&mut self, to: StreamStatus) -> bool {
        let from = self.state.status;
        if !can_transition(from, to) {
            return false;
        }
        self.state.status = to;
        if to.is_terminal() {
            self.state.completed_at = Some(Utc::now());
        }
        self.state.update_progress();
        tracing::debug!(session_id = %self.id(), %from, %to, "session transition");
        true
    }

    fn ensure_accepting(&self, operation: &'static str) -> Result<(), SessionError> {
        match self.state.status {
            StreamStatus::Idle | StreamStatus::Streaming => Ok(()),
            status => Err(SessionError::InvalidState {
                session_id: self.id(),
                status,
                operation,
            }),
        }
    }

    /// Coalesce a raw fragment; processes a chunk once enough text is buffered
    ///
    /// # Errors
    /// `InvalidState` outside idle/streaming; `OutputLimitExceeded` when the
    /// chunk would pass the output token ceiling
    pub fn process_fragment(
        &mut self,
        fragment: &str,
        metadata: IndexMap<String, serde_json::Value>,
    ) -> Result<Option<AssemblyUpdate>, SessionError> {
        self.ensure_accepting("process fragment")?;
        match self.coalescer.push(fragment) {
            Some(text) => {
                let chunk = StreamChunk::new(self.next_sequence, text, self.chars_per_token)
                    .with_metadata(metadata);
                self.process_chunk(chunk).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Validate, tag and assemble one chunk, then update counters
    ///
    /// # Errors
    /// `InvalidState` outside idle/streaming; `OutputLimitExceeded` when the
    /// chunk would pass the output token ceiling (the session moves to error)
    pub fn process_chunk(&mut self, chunk: StreamChunk) -> Result<AssemblyUpdate, SessionError> {
        self.ensure_accepting("process chunk")?;
        if self.state.status == StreamStatus::Idle {
            self.transition(StreamStatus::Streaming);
            self.state.started_at = Some(Utc::now());
            self.started = Some(Instant::now());
            tracing::info!(session_id = %self.id(), "session streaming");
        }

        let used = self.state.tokens_used + chunk.token_count();
        if used > self.state.max_tokens {
            let error = SessionError::OutputLimitExceeded {
                used,
                max: self.state.max_tokens,
            };
            self.fail_terminal(ErrorContext::ChunkProcessing, &error.to_string());
            return Err(error);
        }

        let check = self.validator.validate_chunk(&chunk, self.assembler.content());
        if let Some(warning) = &check.error {
            self.state.warnings.push(warning.clone());
        }
        let sequence = chunk.sequence();
        let token_count = chunk.token_count();
        let category = chunk.category().to_string();
        let chunk = chunk
            .tagged("partial_valid", serde_json::Value::Bool(check.is_valid))
            .tagged("category", serde_json::Value::String(category.clone()));

        let update = self.assembler.add_chunk(chunk);
        if update.duplicate {
            self.state
                .warnings
                .push(format!("duplicate chunk {sequence} ignored"));
            return Ok(update);
        }

        self.state.processed_chunks += 1;
        self.state.current_sequence = Some(self.state.current_sequence.map_or(sequence, |s| s.max(sequence)));
        self.next_sequence = self.next_sequence.max(sequence + 1);
        self.state.tokens_used = used;
        self.state.content.clone_from(&update.content);
        self.state.last_chunk_at = Some(Utc::now());
        if let Some(started) = self.started {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
            self.state.average_chunk_ms = Some(elapsed_ms / self.state.processed_chunks as f64);
        }
        self.state.update_progress();

        self.sink.emit(EngineEvent::ChunkProcessed {
            session_id: self.id(),
            sequence,
            category,
            token_count,
            is_valid: update.is_valid,
        });
        self.sink.emit(EngineEvent::ProgressUpdate {
            session_id: self.id(),
            progress: self.state.progress,
            processed_chunks: self.state.processed_chunks,
            eta_ms: self.state.eta_ms,
        });
        Ok(update)
    }

    /// Streaming → paused; false (no-op) from any other status
    pub fn pause(&mut self) -> bool {
        if self.state.status != StreamStatus::Streaming || !self.transition(StreamStatus::Paused) {
            return false;
        }
        tracing::info!(session_id = %self.id(), "session paused");
        self.sink.emit(EngineEvent::StreamingSessionPaused { session_id: self.id() });
        true
    }

    /// Paused → streaming; false (no-op) from any other status
    pub fn resume(&mut self) -> bool {
        if self.state.status != StreamStatus::Paused || !self.transition(StreamStatus::Streaming) {
            return false;
        }
        tracing::info!(session_id = %self.id(), "session resumed");
        self.sink.emit(EngineEvent::StreamingSessionResumed { session_id: self.id() });
        true
    }

    /// Cancel from any non-terminal status; false if already terminal
    pub fn cancel(&mut self, reason: &str) -> bool {
        if !self.transition(StreamStatus::Cancelled) {
            return false;
        }
        self.stop_reason = Some(reason.to_string());
        tracing::info!(session_id = %self.id(), reason, "session cancelled");
        self.sink.emit(EngineEvent::StreamingSessionCancelled {
            session_id: self.id(),
            reason: reason.to_string(),
        });
        true
    }

    /// Flush, finalize and validate the content; returns the final text
    ///
    /// Final validation failures are recorded as warnings; the session still
    /// completes. A flushed remainder that passes the output ceiling goes
    /// through recovery as a completion error and stays buffered, so a later
    /// `complete` sees the same text.
    ///
    /// # Errors
    /// `InvalidState` if the session is already terminal;
    /// `OutputLimitExceeded` while completion retries remain, then
    /// `RetriesExhausted` (the session moves to error)
    pub fn complete(&mut self) -> Result<String, SessionError> {
        if self.state.status.is_terminal() {
            return Err(SessionError::InvalidState {
                session_id: self.id(),
                status: self.state.status,
                operation: "complete",
            });
        }
        if let Some(rest) = self.coalescer.flush() {
            let chunk = StreamChunk::new(self.next_sequence, rest, self.chars_per_token).finished();
            let used = self.state.tokens_used + chunk.token_count();
            if used > self.state.max_tokens {
                self.coalescer.restore(chunk.content().to_string());
                let error = SessionError::OutputLimitExceeded {
                    used,
                    max: self.state.max_tokens,
                };
                let message = error.to_string();
                return match self.fail(ErrorContext::SessionCompletion, &message) {
                    RecoveryDecision::Retry { .. } => Err(error),
                    RecoveryDecision::Exhausted { attempts } => Err(SessionError::RetriesExhausted {
                        context: ErrorContext::SessionCompletion,
                        attempts,
                        message,
                    }),
                };
            }
            if self.state.status == StreamStatus::Paused {
                self.transition(StreamStatus::Streaming);
            }
            self.process_chunk(chunk)?;
        }

        let content = self.assembler.finalize();
        let outcome = self.validator.validate_complete(&content);
        if let Some(problem) = &outcome.error {
            tracing::warn!(session_id = %self.id(), %problem, "final validation failed");
            self.state.warnings.push(problem.clone());
        }
        self.state.content.clone_from(&content);
        self.state.is_valid = Some(outcome.is_valid);
        self.transition(StreamStatus::Completed);

        let duration_ms = self
            .started
            .map_or(0, |s| u64::try_from(s.elapsed().as_millis()).unwrap_or(u64::MAX));
        tracing::info!(
            session_id = %self.id(),
            chunks = self.state.processed_chunks,
            is_valid = outcome.is_valid,
            "session completed"
        );
        self.sink.emit(EngineEvent::StreamingSessionCompleted {
            session_id: self.id(),
            content_length: content.chars().count(),
            is_valid: outcome.is_valid,
            duration_ms,
        });
        Ok(content)
    }

    /// Route an error through recovery; exhaustion moves the session to error
    pub fn fail(&mut self, context: ErrorContext, message: &str) -> RecoveryDecision {
        let decision = self.recovery.record(context, message);
        self.state.errors.push(message.to_string());
        self.sink.emit(EngineEvent::StreamingError {
            session_id: self.id(),
            context: context.to_string(),
            message: message.to_string(),
            attempt: decision.attempt(),
            recoverable: decision.is_retry(),
        });
        match decision {
            RecoveryDecision::Retry { attempt, delay } => {
                tracing::warn!(session_id = %self.id(), %context, attempt, ?delay, error = message, "retrying");
            }
            RecoveryDecision::Exhausted { attempts } => {
                tracing::error!(session_id = %self.id(), %context, attempts, error = message, "retries exhausted");
                self.stop_reason = Some(message.to_string());
                self.transition(StreamStatus::Error);
            }
        }
        decision
    }

    /// Backoff before the next attempt of a failed operation
    #[must_use]
    pub fn retry_delay(&self, context: ErrorContext, message: &str) -> std::time::Duration {
        self.recovery.delay_for(self.recovery.attempts(context, message))
    }

    /// Move straight to error without consulting recovery
    pub fn fail_terminal(&mut self, context: ErrorContext, message: &str) {
        if self.state.status.is_terminal() {
            return;
        }
        tracing::error!(session_id = %self.id(), %context, error = message, "session failed");
        self.state.errors.push(message.to_string());
        self.stop_reason = Some(message.to_string());
        self.transition(StreamStatus::Error);
        self.sink.emit(EngineEvent::StreamingError {
            session_id: self.id(),
            context: context.to_string(),
            message: message.to_string(),
            attempt: 0,
            recoverable: false,
        });
    }

    /// Liveness signal for the heartbeat timer
    pub fn heartbeat(&self) {
        self.sink.emit(EngineEvent::StreamingHeartbeat {
            session_id: self.id(),
            status: self.state.status.to_string(),
            processed_chunks: self.state.processed_chunks,
        });
    }

    /// Soft timeout signal
    pub fn timeout_warning(&mut self, elapsed_ms: u64) {
        self.state
            .warnings
            .push(format!("no completion after {elapsed_ms}ms"));
        tracing::warn!(session_id = %self.id(), elapsed_ms, "soft timeout");
        self.sink.emit(EngineEvent::StreamingTimeoutWarning {
            session_id: self.id(),
            elapsed_ms,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sde_buffer::NullSink;
    use std::time::Duration;

    fn session(config: StreamConfig) -> StreamingSession {
        StreamingSession::new(SessionId::new(), &config, 4, Vec::new(), Arc::new(NullSink))
    }

    #[test]
    fn first_chunk_starts_streaming() {
        let mut s = session(StreamConfig::default()).with_total_chunks(Some(2));
        assert_eq!(s.status(), StreamStatus::Idle);
        s.process_chunk(StreamChunk::new(0, "fn a() {", 4)).unwrap();
        assert_eq!(s.status(), StreamStatus::Streaming);
        assert!(s.state().started_at.is_some());
        assert!((s.state().progress - 50.0).abs() < f64::EPSILON);
        assert_eq!(s.state().current_sequence, Some(0));
    }

    #[test]
    fn pause_resume_only_between_streaming_and_paused() {
        let mut s = session(StreamConfig::default());
        assert!(!s.pause());
        s.process_fragment("x", IndexMap::new()).unwrap();
        assert!(s.pause());
        assert!(!s.pause());
        assert!(matches!(
            s.process_fragment("y", IndexMap::new()),
            Err(SessionError::InvalidState { .. })
        ));
        assert!(s.resume());
        assert!(!s.resume());
        assert_eq!(s.status(), StreamStatus::Streaming);
    }

    #[test]
    fn complete_flushes_and_finalizes() {
        let mut s = session(StreamConfig::default().with_min_chunk_size(100));
        assert!(s.process_fragment("  fn a() ", IndexMap::new()).unwrap().is_none());
        assert!(s.process_fragment("{ }", IndexMap::new()).unwrap().is_none());
        let content = s.complete().unwrap();
        assert_eq!(content, "fn a() { }");
        assert_eq!(s.status(), StreamStatus::Completed);
        assert_eq!(s.state().is_valid, Some(true));
        assert!((s.state().progress - 100.0).abs() < f64::EPSILON);
        assert!(s.complete().is_err());
    }

    #[test]
    fn invalid_final_content_still_completes() {
        let mut s = session(StreamConfig::default());
        s.process_fragment("fn a() {", IndexMap::new()).unwrap();
        s.complete().unwrap();
        assert_eq!(s.state().is_valid, Some(false));
        assert!(!s.state().warnings.is_empty());
    }

    #[test]
    fn output_limit_is_terminal() {
        let mut s = session(StreamConfig::default().with_max_output_tokens(2));
        s.process_fragment("abcd", IndexMap::new()).unwrap();
        let err = s.process_fragment("efghijkl", IndexMap::new()).unwrap_err();
        assert!(err.is_resource());
        assert_eq!(s.status(), StreamStatus::Error);
    }

    #[test]
    fn completion_overflow_goes_through_recovery() {
        let sink = Arc::new(sde_test_utils::RecordingSink::new());
        let config = StreamConfig::default()
            .with_min_chunk_size(100)
            .with_max_output_tokens(2)
            .with_max_retries(1);
        let mut s = StreamingSession::new(SessionId::new(), &config, 4, Vec::new(), sink.clone());
        assert!(s.process_fragment("abcdefghijkl", IndexMap::new()).unwrap().is_none());

        let err = s.complete().unwrap_err();
        assert!(matches!(err, SessionError::OutputLimitExceeded { used: 3, max: 2 }));
        assert!(!s.status().is_terminal());
        let Some(EngineEvent::StreamingError { context, attempt, recoverable, .. }) = sink.events().pop() else {
            panic!("expected a streaming error");
        };
        assert_eq!(context, "session_completion");
        assert_eq!(attempt, 1);
        assert!(recoverable);
        assert!(s.retry_delay(ErrorContext::SessionCompletion, &err.to_string()) > Duration::ZERO);

        let err = s.complete().unwrap_err();
        assert!(matches!(
            err,
            SessionError::RetriesExhausted {
                context: ErrorContext::SessionCompletion,
                attempts: 2,
                ..
            }
        ));
        assert_eq!(s.status(), StreamStatus::Error);
        assert_eq!(sink.count("streaming_error"), 2);
        assert!(!sink.contains("streaming_session_completed"));
    }

    #[test]
    fn retries_exhaust_into_error() {
        let config = StreamConfig::default()
            .with_max_retries(1)
            .with_retry_base_delay(Duration::from_millis(10));
        let mut s = session(config);
        assert!(s.fail(ErrorContext::ChunkProcessing, "reset after 1ms").is_retry());
        assert_eq!(s.status(), StreamStatus::Idle);
        let decision = s.fail(ErrorContext::ChunkProcessing, "reset after 2ms");
        assert_eq!(decision, RecoveryDecision::Exhausted { attempts: 2 });
        assert_eq!(s.status(), StreamStatus::Error);
        assert_eq!(s.stop_reason(), Some("reset after 2ms"));
    }

    #[test]
    fn cancel_from_any_live_status() {
        let mut s = session(StreamConfig::default());
        assert!(s.cancel("user"));
        assert!(!s.cancel("again"));
        assert_eq!(s.status(), StreamStatus::Cancelled);
        assert_eq!(s.stop_reason(), Some("user"));
    }

    #[test]
    fn chunks_are_tagged() {
        let mut s = session(StreamConfig::default());
        let update = s.process_chunk(StreamChunk::new(0, "use std::fmt;\n", 4)).unwrap();
        assert!(update.is_valid);
        let dup = s.process_chunk(StreamChunk::new(0, "other", 4)).unwrap();
        assert!(dup.duplicate);
        assert_eq!(s.state().processed_chunks, 1);
        assert_eq!(s.state().warnings.len(), 1);
    }
}
