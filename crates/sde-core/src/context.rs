//! Engine context
//!
//! One explicit object owning every shared component. Construct it at
//! startup and pass it around by reference or `Arc`; nothing in the engine
//! is global.

use crate::config::EngineConfig;
use crate::conflicts::ConflictStore;
use crate::error::EngineError;
use crate::extract::DiffExtractor;
use crate::pipeline::{SafeApplyPipeline, SafeApplyResult};
use crate::registry::{FileLockGuard, FileState, FileStateRegistry, ProjectFile};
use sde_buffer::{BackupId, ConflictId, DiffKind, DiffOperation, EngineEvent, EventSink, FileId, LineRange, SessionId};
use sde_conflict::{Conflict, ResolutionAction};
use sde_ledger::{BackupLedger, BackupState, ChangeOperation, ChangeTracker, ChangeTrackingEntry, RollbackResult};
use sde_stream::{SessionError, SessionManager, SessionRequest, StreamStatus, TokenSource};
use std::sync::Arc;

/// Shared engine state and the operations that span components
#[derive(Debug)]
pub struct EngineContext {
    config: EngineConfig,
    registry: FileStateRegistry,
    tracker: Arc<ChangeTracker>,
    ledger: Arc<BackupLedger>,
    conflicts: Arc<ConflictStore>,
    pipeline: SafeApplyPipeline,
    sessions: Arc<SessionManager>,
    extractor: DiffExtractor,
    sink: Arc<dyn EventSink>,
}

impl EngineContext {
    /// Build every component from `config`
    ///
    /// # Errors
    /// `Config` if the configuration does not validate
    pub fn new(config: EngineConfig, sink: Arc<dyn EventSink>) -> Result<Self, EngineError> {
        config.validate()?;
        let tracker = Arc::new(ChangeTracker::new());
        let ledger = Arc::new(BackupLedger::new(
            config.ledger.max_backups_per_file,
            Arc::clone(&tracker),
        ));
        let conflicts = Arc::new(ConflictStore::new());
        let pipeline = SafeApplyPipeline::new(
            config.pipeline.clone(),
            Arc::clone(&ledger),
            Arc::clone(&conflicts),
            Arc::clone(&sink),
        );
        let sessions = Arc::new(SessionManager::new(
            config.stream.clone(),
            config.budget.clone(),
            Arc::clone(&sink),
        ));
        tracing::debug!(?config, "engine context created");
        Ok(Self {
            config,
            registry: FileStateRegistry::new(),
            tracker,
            ledger,
            conflicts,
            pipeline,
            sessions,
            extractor: DiffExtractor::new(),
            sink,
        })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &FileStateRegistry {
        &self.registry
    }

    #[inline]
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    #[inline]
    #[must_use]
    pub fn pipeline(&self) -> &SafeApplyPipeline {
        &self.pipeline
    }

    /// Seed the registry from the project file provider
    ///
    /// # Errors
    /// `Registry(Locked)` if the file is being mutated
    pub fn register_file(&self, file: ProjectFile) -> Result<FileState, EngineError> {
        let state = self.registry.register(file)?;
        self.tracker.record(
            ChangeTrackingEntry::new(state.id.clone(), ChangeOperation::Register)
                .with_contents("", state.content.as_str())
                .with_success(true),
        );
        Ok(state)
    }

    /// Current state of a file
    ///
    /// # Errors
    /// `Registry(NotFound)` for unknown files
    pub fn file(&self, file_id: &FileId) -> Result<FileState, EngineError> {
        Ok(self.registry.get(file_id)?)
    }

    /// Run the safe apply pipeline and commit the result on success
    ///
    /// Pipeline failures are reported in the returned result, not as errors.
    ///
    /// # Errors
    /// `Registry` if the file is unknown or locked by another apply
    pub fn apply_diffs(&self, file_id: &FileId, diffs: Vec<DiffOperation>) -> Result<SafeApplyResult, EngineError> {
        let guard = self.registry.lock(file_id)?;
        self.apply_locked(file_id, &guard, &diffs)
    }

    fn apply_locked(
        &self,
        file_id: &FileId,
        guard: &FileLockGuard,
        diffs: &[DiffOperation],
    ) -> Result<SafeApplyResult, EngineError> {
        let state = self.registry.get(file_id)?;
        let result = self
            .pipeline
            .safely_apply_diffs(file_id, &state.content, diffs, &state);
        if result.success && !diffs.is_empty() {
            self.registry.commit(file_id, guard, result.updated_content.as_str())?;
        }
        Ok(result)
    }

    /// Extract diffs from a completed session's output and apply them
    ///
    /// # Errors
    /// `Session` if the session is unknown or not completed, `Extract` for
    /// malformed hunks, `Registry` as for [`Self::apply_diffs`]
    pub fn apply_session_output(
        &self,
        session_id: SessionId,
        file_id: &FileId,
    ) -> Result<SafeApplyResult, EngineError> {
        let session = self.sessions.state(session_id)?;
        if session.status != StreamStatus::Completed {
            return Err(SessionError::InvalidState {
                session_id,
                status: session.status,
                operation: "apply output",
            }
            .into());
        }
        let guard = self.registry.lock(file_id)?;
        let line_count = self.registry.get(file_id)?.content.lines().count();
        let diffs = self.extractor.extract(&session.content, line_count)?;
        tracing::debug!(session = %session_id, file = %file_id, diffs = diffs.len(), "session output extracted");
        self.apply_locked(file_id, &guard, &diffs)
    }

    /// Create a session, drive it from `source` and apply its output
    ///
    /// # Errors
    /// Any session failure, then as [`Self::apply_session_output`]
    pub async fn stream_to_file<S>(
        &self,
        request: SessionRequest,
        source: S,
        file_id: &FileId,
    ) -> Result<SafeApplyResult, EngineError>
    where
        S: TokenSource,
    {
        self.registry.get(file_id)?;
        let session_id = self.sessions.create_session(request)?;
        self.sessions.drive(session_id, source).await?;
        self.apply_session_output(session_id, file_id)
    }

    /// Queue diffs for review
    ///
    /// # Errors
    /// `Registry(NotFound)` for unknown files
    pub fn propose_diffs(&self, file_id: &FileId, diffs: Vec<DiffOperation>) -> Result<usize, EngineError> {
        let pending = self.registry.propose_diffs(file_id, diffs)?;
        tracing::debug!(file = %file_id, pending, "diffs proposed");
        Ok(pending)
    }

    /// Apply every pending diff as one batch
    ///
    /// # Errors
    /// `Registry` if the file is unknown, locked or has nothing pending
    pub fn approve_pending(&self, file_id: &FileId) -> Result<SafeApplyResult, EngineError> {
        let guard = self.registry.lock(file_id)?;
        let diffs = self.registry.take_pending(file_id)?;
        self.apply_locked(file_id, &guard, &diffs)
    }

    /// Discard pending diffs, returning how many were dropped
    ///
    /// # Errors
    /// `Registry(NotFound)` for unknown files
    pub fn reject_pending(&self, file_id: &FileId) -> Result<usize, EngineError> {
        Ok(self.registry.clear_pending(file_id)?)
    }

    /// Open conflicts of a file
    #[must_use]
    pub fn conflicts(&self, file_id: &FileId) -> Vec<Conflict> {
        self.conflicts.get(file_id)
    }

    /// Settle a stored conflict, returning the diffs to resubmit
    ///
    /// `AcceptCurrent` keeps the file as is (no diffs), `AcceptIncoming`
    /// returns the involved diffs unchanged and `Merge` folds them into one
    /// replace over their combined range. The conflict is dropped from the
    /// store unless resolution is manual.
    ///
    /// # Errors
    /// `ConflictNotFound` for unknown ids, `ManualResolutionRequired` for
    /// `Manual`
    pub fn resolve_conflict(
        &self,
        file_id: &FileId,
        conflict_id: ConflictId,
        action: ResolutionAction,
    ) -> Result<Vec<DiffOperation>, EngineError> {
        let conflict = self
            .conflicts
            .find(file_id, conflict_id)
            .ok_or_else(|| EngineError::ConflictNotFound {
                file_id: file_id.clone(),
                conflict_id,
            })?;
        let diffs = match action {
            ResolutionAction::Manual => return Err(EngineError::ManualResolutionRequired(conflict_id)),
            ResolutionAction::AcceptCurrent => Vec::new(),
            ResolutionAction::AcceptIncoming => conflict.diffs,
            ResolutionAction::Merge => merge(&conflict.diffs).into_iter().collect(),
        };
        self.conflicts.remove(file_id, conflict_id);
        tracing::info!(file = %file_id, conflict = %conflict_id, ?action, diffs = diffs.len(), "conflict resolved");
        Ok(diffs)
    }

    /// Restore a backup into the registry
    ///
    /// An unknown backup is reported in the result, not as an error.
    ///
    /// # Errors
    /// `Registry` if the file is unknown or locked
    pub fn rollback(&self, file_id: &FileId, backup_id: BackupId) -> Result<RollbackResult, EngineError> {
        let guard = self.registry.lock(file_id)?;
        let current = self.registry.get(file_id)?.content;
        let result = self.ledger.rollback_to_backup(file_id, backup_id, &current);
        if let (true, Some(restored)) = (result.success, result.restored_content.as_deref()) {
            self.registry.commit(file_id, &guard, restored)?;
            self.tracker.record(
                ChangeTrackingEntry::new(file_id.clone(), ChangeOperation::Commit)
                    .with_contents(current, restored)
                    .with_success(true)
                    .with_backup(Some(backup_id)),
            );
        }
        self.sink.emit(EngineEvent::RollbackCompleted {
            file_id: file_id.clone(),
            backup_id,
            success: result.success,
        });
        Ok(result)
    }

    /// Snapshots of a file, oldest first
    #[must_use]
    pub fn backups(&self, file_id: &FileId) -> Vec<BackupState> {
        self.ledger.backups(file_id)
    }

    /// Audit entries of a file, oldest first
    #[must_use]
    pub fn history(&self, file_id: &FileId) -> Vec<ChangeTrackingEntry> {
        self.tracker.entries(file_id)
    }

    /// Check the audit hash chain of a file
    ///
    /// # Errors
    /// `Ledger(IntegrityViolation)` naming the first broken entry
    pub fn verify_audit(&self, file_id: &FileId) -> Result<(), EngineError> {
        Ok(self.tracker.verify_integrity(file_id)?)
    }
}

/// Fold overlapping diffs into one mergeable edit
///
/// Ranged edits collapse into a replace over their union; inserts only
/// contribute content. Contents are joined in start-line order.
fn merge(diffs: &[DiffOperation]) -> Option<DiffOperation> {
    let mut ordered: Vec<&DiffOperation> = diffs.iter().collect();
    ordered.sort_by_key(|d| d.range.start);
    let content = ordered
        .iter()
        .filter(|d| !d.content.is_empty())
        .map(|d| d.content.trim_end_matches('\n'))
        .collect::<Vec<_>>()
        .join("\n");
    let span = ordered
        .iter()
        .filter(|d| d.kind != DiffKind::Insert)
        .map(|d| d.range)
        .reduce(|a, b| a.union(&b));
    let merged = match span {
        Some(LineRange { start, end }) => DiffOperation::replace(start, end, content),
        None => DiffOperation::insert(ordered.first()?.range.start, content),
    };
    Some(merged.mergeable().with_description("merged from conflicting edits"))
}
